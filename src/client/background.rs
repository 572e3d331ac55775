// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Background push handler.
//!
//! Runs without any page. A push is suppressed while a window at the app
//! origin is visible (the foreground subscriber shows it); otherwise it is
//! rendered with the activity id as tag, so repeated pushes for the same
//! activity replace one another instead of stacking.
//!
//! The handler only exists after [`BackgroundPushHandler::install`] has
//! fetched its config document.

use crate::client::ClientError;
use crate::models::PushMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Config document path, relative to the app origin.
pub const CONFIG_PATH: &str = "/config.json";
/// Title of the single notification action.
pub const OPEN_ACTION_TITLE: &str = "Öffnen";
/// Id of the single notification action.
pub const OPEN_ACTION: &str = "open";

/// Push credentials and app identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub project_id: String,
    pub app_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub messaging_sender_id: Option<String>,
}

/// Where the handler gets its config from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<HandlerConfig, ClientError>;
}

/// Fetches `{origin}/config.json` over HTTP.
pub struct HttpConfigSource {
    http: reqwest::Client,
    url: String,
}

impl HttpConfigSource {
    pub fn new(origin: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}{}", origin.trim_end_matches('/'), CONFIG_PATH),
        }
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<HandlerConfig, ClientError> {
        let config = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(config)
    }
}

/// Window page visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// One open window of any origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
    pub visibility: Visibility,
}

/// Host window management.
#[async_trait]
pub trait WindowClients: Send + Sync {
    /// All windows, including ones this handler does not control.
    async fn match_all(&self) -> Vec<WindowClient>;

    async fn focus(&self, id: &str) -> Result<(), ClientError>;

    async fn open_window(&self, url: &str) -> Result<(), ClientError>;
}

/// Host OS notification surface.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn show(&self, title: &str, options: &RenderOptions) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Options of a rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub body: String,
    /// Coalescing key: same tag replaces an existing notification
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    /// Push data plus `timestamp` (ms) and `notificationId` (= tag)
    pub data: serde_json::Value,
}

/// What the handler did with a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushDecision {
    /// A window at the origin was visible.
    Suppressed,
    Rendered(RenderOptions),
}

/// Installed background push handler.
pub struct BackgroundPushHandler<W, N> {
    config: HandlerConfig,
    origin: String,
    windows: W,
    surface: N,
}

impl<W: WindowClients, N: NotificationSurface> BackgroundPushHandler<W, N> {
    /// Fetch config and return a handler ready for pushes.
    pub async fn install(
        origin: &str,
        source: &dyn ConfigSource,
        windows: W,
        surface: N,
    ) -> Result<Self, ClientError> {
        let config = source.fetch().await?;
        tracing::info!(project_id = %config.project_id, "Background push handler installed");
        Ok(Self {
            config,
            origin: origin.trim_end_matches('/').to_string(),
            windows,
            surface,
        })
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Root URL of the app.
    pub fn root_url(&self) -> String {
        format!("{}/", self.origin)
    }

    /// Whether `url` is on the app origin. A longer host or another port
    /// sharing the origin's prefix is a different origin.
    fn is_app_url(&self, url: &str) -> bool {
        url.strip_prefix(self.origin.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
    }

    /// Handle one push payload. `now_ms` is the arrival time.
    pub async fn handle_push(
        &self,
        message: &PushMessage,
        now_ms: i64,
    ) -> Result<PushDecision, ClientError> {
        let windows = self.windows.match_all().await;
        let app_visible = windows
            .iter()
            .any(|w| w.visibility == Visibility::Visible && self.is_app_url(&w.url));

        if app_visible {
            tracing::debug!(ts = now_ms, "App is visible, suppressing push");
            return Ok(PushDecision::Suppressed);
        }

        let options = render_options(message, now_ms);
        self.surface
            .show(&message.notification.title, &options)
            .await?;
        Ok(PushDecision::Rendered(options))
    }

    /// Handle a click on a rendered notification: focus an existing window
    /// at the app root, else open one.
    pub async fn handle_click(&self) -> Result<(), ClientError> {
        let root = self.root_url();
        let windows = self.windows.match_all().await;

        if let Some(window) = windows.iter().find(|w| w.url == root) {
            return self.windows.focus(&window.id).await;
        }
        self.windows.open_window(&root).await
    }
}

fn render_options(message: &PushMessage, now_ms: i64) -> RenderOptions {
    let tag = message
        .data
        .activity_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| now_ms.to_string());

    let mut data = serde_json::to_value(&message.data)
        .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
    if let Some(map) = data.as_object_mut() {
        map.insert("timestamp".to_string(), now_ms.into());
        map.insert("notificationId".to_string(), tag.clone().into());
    }

    RenderOptions {
        body: message.notification.body.clone(),
        tag,
        renotify: false,
        require_interaction: true,
        actions: vec![NotificationAction {
            action: OPEN_ACTION.to_string(),
            title: OPEN_ACTION_TITLE.to_string(),
        }],
        data,
    }
}
