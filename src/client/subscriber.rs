// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Foreground notification subscriber.
//!
//! Keeps the live unread view of the signed-in user and surfaces each newly
//! observed notification once. The durable [`DedupLedger`] is the only
//! dedup layer: a notification whose id is in the ledger is never presented
//! again, whatever path re-delivers it.

use crate::client::ledger::{DedupLedger, DurableStorage};
use crate::client::ClientError;
use crate::models::{ChangeEvent, ChangeKind, Notification};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Path of the background push handler, relative to the app origin.
pub const BACKGROUND_HANDLER_PATH: &str = "/walk-and-run/push-handler.js";
/// Scope the background handler is registered under.
pub const BACKGROUND_HANDLER_SCOPE: &str = "/walk-and-run/";

/// OS/browser notification surface used while the app is in the foreground.
pub trait Presenter: Send + Sync {
    fn present(&self, notification: &Notification);
}

// ─── Live View ───────────────────────────────────────────────────

/// Unread notifications of `me` plus the dedup ledger.
pub struct NotificationSubscriber<S> {
    me: String,
    ledger: DedupLedger<S>,
    /// Newest first
    view: Vec<Notification>,
    presenter: Arc<dyn Presenter>,
}

impl<S: DurableStorage> NotificationSubscriber<S> {
    pub fn new(me: impl Into<String>, ledger: DedupLedger<S>, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            me: me.into(),
            ledger,
            view: Vec::new(),
            presenter,
        }
    }

    /// Current live view, newest first.
    pub fn view(&self) -> &[Notification] {
        &self.view
    }

    pub fn ledger(&self) -> &DedupLedger<S> {
        &self.ledger
    }

    /// Apply one change record. Returns true if the notification was
    /// presented to the user.
    pub async fn apply(&mut self, event: ChangeEvent<Notification>) -> bool {
        if event.data.user_id != self.me {
            return false;
        }

        match event.kind {
            ChangeKind::Added => {
                let already_shown = self.ledger.contains(&event.id);
                self.upsert(event.data.clone());
                if already_shown {
                    tracing::debug!(notification_id = %event.id, "Notification already shown");
                    return false;
                }

                // The in-memory ledger is updated even if persisting fails,
                // so this session still never shows it twice
                if let Err(e) = self.ledger.insert_and_persist(&event.id).await {
                    tracing::warn!(
                        notification_id = %event.id,
                        error = %e,
                        "Failed to persist notification ledger"
                    );
                }
                self.presenter.present(&event.data);
                true
            }
            ChangeKind::Modified => {
                if event.data.read {
                    self.view.retain(|n| n.id != event.id);
                } else {
                    self.upsert(event.data);
                }
                false
            }
            ChangeKind::Removed => {
                self.view.retain(|n| n.id != event.id);
                false
            }
        }
    }

    fn upsert(&mut self, notification: Notification) {
        self.view.retain(|n| n.id != notification.id);
        // RFC3339 timestamps with a fixed format sort lexicographically
        let pos = self
            .view
            .iter()
            .position(|n| n.created_at < notification.created_at)
            .unwrap_or(self.view.len());
        self.view.insert(pos, notification);
    }
}

impl<S: DurableStorage + 'static> NotificationSubscriber<S> {
    /// Consume a live change stream in the background.
    pub fn attach<St>(self, events: St) -> Subscription<S>
    where
        St: Stream<Item = ChangeEvent<Notification>> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(self));
        let task_state = Arc::clone(&state);

        let handle = tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                task_state.lock().await.apply(event).await;
            }
            tracing::debug!("Notification stream ended");
        });

        Subscription { state, handle }
    }
}

/// Handle of an attached subscriber.
pub struct Subscription<S> {
    state: Arc<Mutex<NotificationSubscriber<S>>>,
    handle: JoinHandle<()>,
}

impl<S: DurableStorage> Subscription<S> {
    /// Snapshot of the live view.
    pub async fn view(&self) -> Vec<Notification> {
        self.state.lock().await.view().to_vec()
    }

    /// Whether `id` has been recorded in the ledger.
    pub async fn was_shown(&self, id: &str) -> bool {
        self.state.lock().await.ledger().contains(id)
    }

    /// Stop consuming immediately. Events not yet applied are discarded;
    /// the durable ledger keeps what was already recorded.
    pub fn detach(self) {
        self.handle.abort();
    }
}

// ─── Push Registration ───────────────────────────────────────────

/// OS notification permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Default,
    Granted,
    Denied,
}

/// Registration of the background push handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub scope: String,
}

/// Host facilities needed to obtain a push delivery token.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn permission(&self) -> PermissionState;

    async fn request_permission(&self) -> PermissionState;

    async fn register_worker(
        &self,
        script_path: &str,
        scope: &str,
    ) -> Result<WorkerRegistration, ClientError>;

    async fn get_token(
        &self,
        registration: &WorkerRegistration,
        application_key: &str,
    ) -> Result<String, ClientError>;
}

/// Destination of the obtained token (the user's record).
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn write_token(&self, token: &str) -> Result<(), ClientError>;
}

/// Writes the token through `PUT /api/me/push-token`.
pub struct ApiTokenSink {
    http: reqwest::Client,
    api_url: String,
    session_token: String,
}

impl ApiTokenSink {
    pub fn new(api_url: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            session_token: session_token.into(),
        }
    }
}

#[async_trait]
impl TokenSink for ApiTokenSink {
    async fn write_token(&self, token: &str) -> Result<(), ClientError> {
        self.http
            .put(format!("{}/api/me/push-token", self.api_url))
            .bearer_auth(&self.session_token)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// How notifications reach this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// OS pushes while backgrounded, plus the live in-app list.
    PushAndStore,
    /// Live in-app list only.
    StoreOnly,
}

/// Session-start push setup: permission, handler registration, token,
/// write-back. Any failure degrades to [`DeliveryMode::StoreOnly`].
pub async fn register_push(
    platform: &dyn PushPlatform,
    sink: &dyn TokenSink,
    application_key: &str,
) -> DeliveryMode {
    match try_register_push(platform, sink, application_key).await {
        Ok(()) => DeliveryMode::PushAndStore,
        Err(e) => {
            tracing::warn!(error = %e, "Push setup failed, continuing with in-app notifications");
            DeliveryMode::StoreOnly
        }
    }
}

async fn try_register_push(
    platform: &dyn PushPlatform,
    sink: &dyn TokenSink,
    application_key: &str,
) -> Result<(), ClientError> {
    let mut permission = platform.permission();
    if permission == PermissionState::Default {
        permission = platform.request_permission().await;
    }
    if permission != PermissionState::Granted {
        return Err(ClientError::Permission(format!("{:?}", permission).to_lowercase()));
    }

    let registration = platform
        .register_worker(BACKGROUND_HANDLER_PATH, BACKGROUND_HANDLER_SCOPE)
        .await?;
    let token = platform.get_token(&registration, application_key).await?;
    if token.is_empty() {
        return Err(ClientError::Token("empty token".to_string()));
    }

    sink.write_token(&token).await
}
