// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets arrive as environment variables (Cloud Run secret bindings), so
//! everything is read once at startup and cached in memory.

use std::env;

/// Cloud Tasks queue that carries fan-out invocations.
pub const FANOUT_QUEUE_NAME: &str = "activity-fanout";

/// Default bound on concurrent per-recipient writes and push sends.
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 50;

/// Service account that Cloud Tasks signs fan-out callbacks as.
pub fn tasks_service_account_email(project_id: &str) -> String {
    format!("walkrun-tracker-api@{}.iam.gserviceaccount.com", project_id)
}

/// Which document store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Cloud Firestore (production, or the emulator when
    /// `FIRESTORE_EMULATOR_HOST` is set).
    Firestore,
    /// In-process store with a live change feed (local development).
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::Invalid("STORE_BACKEND")),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL (CORS origin, notification click target)
    pub frontend_url: String,
    /// Public URL of this API (Cloud Tasks callback target)
    pub api_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region hosting the task queue
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Store backend selection
    pub store_backend: StoreBackend,
    /// Whether created activities are handed to Cloud Tasks for fan-out.
    /// When false, the store's change feed consumer performs the fan-out.
    pub fanout_queue_enabled: bool,
    /// Bound on concurrent per-recipient operations in one fan-out
    pub fanout_concurrency: usize,
    /// Static FCM access token (local development). When absent the
    /// metadata server is asked for one.
    pub fcm_access_token: Option<String>,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Config for tests: memory store, no queue, no push credentials.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "europe-west3".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            fanout_queue_enabled: false,
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
            fcm_access_token: None,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "firestore".to_string())
            .parse()?;

        let fanout_concurrency = match env::var("FANOUT_CONCURRENCY") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid("FANOUT_CONCURRENCY"))?,
            Err(_) => DEFAULT_FANOUT_CONCURRENCY,
        };

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "europe-west3".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend,
            fanout_queue_enabled: env::var("FANOUT_QUEUE_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            fanout_concurrency,
            fcm_access_token: env::var("FCM_ACCESS_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
