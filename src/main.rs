// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Walk & Run Tracker API Server
//!
//! Records fitness activities for a small group of users and notifies
//! everyone else whenever someone adds one.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkrun_tracker::{
    config::{Config, StoreBackend},
    db::{FirestoreDb, MemoryDb, Store},
    services::{
        seed_default_activity_types, ActivityFeedConsumer, FanOutWorker, FcmTransport,
        GoogleOidcVerifier, LogOnlyTransport, NotificationHub, PushTransport, TasksService,
    },
    AppState, FanOutTrigger,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        store = ?config.store_backend,
        "Starting Walk & Run Tracker API"
    );

    // Initialize the document store
    let db: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    // Default activity types, once, before serving
    seed_default_activity_types(db.as_ref()).await?;

    // Push transport: FCM when credentials can be obtained
    let push: Arc<dyn PushTransport> =
        if config.store_backend == StoreBackend::Memory && config.fcm_access_token.is_none() {
            tracing::info!("No push credentials, push messages are only logged");
            Arc::new(LogOnlyTransport)
        } else {
            Arc::new(FcmTransport::new(
                &config.gcp_project_id,
                config.fcm_access_token.clone(),
            ))
        };

    let hub = NotificationHub::new();
    let worker = Arc::new(
        FanOutWorker::new(Arc::clone(&db), push)
            .with_hub(hub.clone())
            .with_concurrency(config.fanout_concurrency),
    );

    // Pick how created activities reach the worker
    let (trigger, tasks_service) = if config.fanout_queue_enabled {
        let tasks = TasksService::new(&config.gcp_project_id, &config.gcp_region);
        tracing::info!(queue = %tasks.queue_path(), "Fan-out via Cloud Tasks");
        (FanOutTrigger::Queue, Some(tasks))
    } else if let Some(feed) = db.activity_feed() {
        tracing::info!("Fan-out via store change feed");
        tokio::spawn(ActivityFeedConsumer::new(Arc::clone(&worker), feed).run());
        (FanOutTrigger::ChangeFeed, None)
    } else {
        tracing::info!("Fan-out inline with activity creation");
        (FanOutTrigger::Inline, None)
    };

    // Cloud Tasks callbacks must carry an ID token for our service account
    let tasks_verifier = Arc::new(GoogleOidcVerifier::new(&config)?);

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        worker,
        hub,
        tasks_service,
        tasks_verifier,
        trigger,
    });

    // Build router
    let app = walkrun_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("walkrun_tracker=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
