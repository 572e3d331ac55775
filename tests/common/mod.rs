// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use walkrun_tracker::config::{tasks_service_account_email, Config};
use walkrun_tracker::db::{FirestoreDb, MemoryDb, Store};
use walkrun_tracker::middleware::auth::create_jwt;
use walkrun_tracker::models::{PushMessage, User};
use walkrun_tracker::routes::create_router;
use walkrun_tracker::services::{
    seed_default_activity_types, FanOutWorker, GoogleOidcVerifier, NotificationHub, PushError,
    PushTransport,
};
use walkrun_tracker::{AppState, FanOutTrigger};

const TASKS_OIDC_KID: &str = "test-tasks-key";
const TASKS_OIDC_PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/tasks_oidc_private.pem");
const TASKS_OIDC_PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/tasks_oidc_public.pem");

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Push transport that records every send.
#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<(String, PushMessage)>>,
}

#[allow(dead_code)]
impl RecordingPush {
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect();
        tokens.sort();
        tokens
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.notification.body.clone())
            .collect()
    }
}

#[async_trait]
impl PushTransport for RecordingPush {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), message.clone()));
        Ok(())
    }
}

/// Everything a test needs to drive the app and inspect its effects.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: MemoryDb,
    pub push: Arc<RecordingPush>,
}

/// Create a test app over the memory store with seeded default types.
///
/// Fan-out runs inline, so its effects are visible as soon as the create
/// request returns.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    let config = Config::test_default();
    let db = MemoryDb::new();
    seed_default_activity_types(&db)
        .await
        .expect("Failed to seed activity types");

    let push = Arc::new(RecordingPush::default());
    let hub = NotificationHub::new();
    let store: Arc<dyn Store> = Arc::new(db.clone());
    let worker = Arc::new(FanOutWorker::new(Arc::clone(&store), push.clone()).with_hub(hub.clone()));

    let tasks_verifier = Arc::new(
        GoogleOidcVerifier::new_with_static_key(
            &config,
            TASKS_OIDC_KID,
            DecodingKey::from_rsa_pem(TASKS_OIDC_PUBLIC_PEM).expect("Bad test public key"),
        )
        .expect("Failed to build OIDC verifier"),
    );

    let state = Arc::new(AppState {
        config,
        db: store,
        worker,
        hub,
        tasks_service: None,
        tasks_verifier,
        trigger: FanOutTrigger::Inline,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        push,
    }
}

/// Create a test JWT token.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    create_jwt(user_id, signing_key).expect("Failed to create JWT")
}

/// Create an ID token like the one Cloud Tasks attaches to callbacks.
#[allow(dead_code)]
pub fn create_test_tasks_oidc_jwt(config: &Config) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": config.api_url,
        "sub": "tasks-service-account",
        "iat": now,
        "exp": now + 600,
        "email": tasks_service_account_email(&config.gcp_project_id),
        "email_verified": true,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TASKS_OIDC_KID.to_string());
    jsonwebtoken::encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(TASKS_OIDC_PRIVATE_PEM).expect("Bad test private key"),
    )
    .expect("Failed to sign OIDC token")
}

/// Register a user directly in the store.
#[allow(dead_code)]
pub async fn add_user(db: &MemoryDb, id: &str, name: &str, token: Option<&str>) {
    db.upsert_user(&User {
        id: id.to_string(),
        display_name: Some(name.to_string()),
        email: None,
        avatar_url: None,
        push_token: token.map(String::from),
        created_at: "2025-01-01T00:00:00.000Z".to_string(),
    })
    .await
    .expect("Failed to add user");
}

impl TestApp {
    /// Send an authenticated JSON request as `user_id`.
    #[allow(dead_code)]
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        user_id: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let token = create_test_jwt(user_id, &self.state.config.jwt_signing_key);
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    /// Create an activity as `user_id` and return its id.
    #[allow(dead_code)]
    pub async fn create_activity(&self, user_id: &str, type_id: &str, value: f64) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/activities",
                user_id,
                Some(serde_json::json!({
                    "type_id": type_id,
                    "value": value,
                    "date": "2025-03-14",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }
}
