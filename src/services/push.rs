// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Push transport: best-effort delivery of `(token, title, body, data)`.
//!
//! Production sends through the FCM HTTP v1 API. Access tokens come from a
//! static override or the GCE metadata server and are cached until shortly
//! before expiry.

use crate::models::PushMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1";
/// Refresh access tokens this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Push delivery failure for one token.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The token is no longer registered with the transport.
    #[error("push token is no longer registered")]
    Unregistered,

    #[error("push transport error: {0}")]
    Transport(String),
}

/// Sends one push message to one delivery token.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError>;
}

/// Transport that only logs. Used when no push credentials are configured.
#[derive(Debug, Default, Clone)]
pub struct LogOnlyTransport;

#[async_trait]
impl PushTransport for LogOnlyTransport {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        tracing::debug!(
            token_len = token.len(),
            body = %message.notification.body,
            "Push delivery disabled, message dropped"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedAccessToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Serialize)]
struct FcmSendRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: &'a crate::models::notification::PushNotification,
    data: &'a crate::models::notification::PushData,
}

/// FCM HTTP v1 client.
pub struct FcmTransport {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    static_token: Option<String>,
    cached: Mutex<Option<CachedAccessToken>>,
}

impl FcmTransport {
    pub fn new(project_id: &str, static_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: FCM_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            static_token,
            cached: Mutex::new(None),
        }
    }

    /// Point the client at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, PushError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(entry.token.clone());
            }
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| PushError::Transport(format!("Metadata token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PushError::Transport(format!(
                "Metadata token request returned {}",
                response.status()
            )));
        }

        let body: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::Transport(format!("Invalid metadata token response: {}", e)))?;

        *cached = Some(CachedAccessToken {
            token: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(body.access_token)
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/projects/{}/messages:send",
            self.base_url, self.project_id
        );

        let request = FcmSendRequest {
            message: FcmMessage {
                token,
                notification: &message.notification,
                data: &message.data,
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &body))
    }
}

/// Map an FCM error response to a [`PushError`].
fn classify_failure(status: u16, body: &str) -> PushError {
    if status == 404 || body.contains("UNREGISTERED") {
        return PushError::Unregistered;
    }
    PushError::Transport(format!("HTTP {}: {}", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_unregistered_tokens() {
        assert!(matches!(classify_failure(404, ""), PushError::Unregistered));
        assert!(matches!(
            classify_failure(400, r#"{"error":{"details":[{"errorCode":"UNREGISTERED"}]}}"#),
            PushError::Unregistered
        ));
    }

    #[test]
    fn classify_other_failures_as_transport() {
        match classify_failure(503, "unavailable") {
            PushError::Transport(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn static_token_bypasses_metadata_server() {
        let transport = FcmTransport::new("p", Some("static".to_string()));
        assert_eq!(transport.access_token().await.unwrap(), "static");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let transport = FcmTransport::new("p", Some("static".to_string()))
            .with_base_url("http://127.0.0.1:1");
        let message = crate::models::NotificationTemplate {
            activity_id: "a1".to_string(),
            activity_type_name: "Laufen".to_string(),
            actor_name: "Anna".to_string(),
            value: 5.0,
            unit_label: "km".to_string(),
            created_at: String::new(),
        }
        .push_message(0);

        let result = transport.send("t1", &message).await;
        assert!(matches!(result, Err(PushError::Transport(_))));
    }
}
