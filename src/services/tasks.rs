// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks service carrying fan-out invocations.
//!
//! Creating an activity enqueues one task per activity. Cloud Tasks delivers
//! it to `/tasks/fan-out` at least once and retries on non-2xx responses,
//! which is the delivery contract the fan-out worker is built for.
//!
//! Uses the official google-cloud-tasks-v2 SDK.

use crate::error::AppError;
use crate::error::Result;
use crate::models::Activity;
use serde::{Deserialize, Serialize};

/// Task endpoint handling fan-out invocations.
pub const FAN_OUT_PATH: &str = "/tasks/fan-out";

/// Payload of a fan-out task: the created activity's snapshot.
///
/// The handler fans out the stored document named by `activity_id`; the
/// snapshot is kept for logging and id cross-checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutPayload {
    pub activity_id: String,
    pub activity: Activity,
}

impl FanOutPayload {
    pub fn new(activity: &Activity) -> Self {
        Self {
            activity_id: activity.id.clone(),
            activity: activity.clone(),
        }
    }
}

/// Cloud Tasks client wrapper.
pub struct TasksService {
    project_id: String,
    location: String,
    queue_name: String,
    /// Mock: Activity IDs that should fail when queued (test builds only).
    #[cfg(test)]
    mock_fail_ids: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl TasksService {
    pub fn new(project_id: &str, region: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: region.to_string(),
            queue_name: crate::config::FANOUT_QUEUE_NAME.to_string(),
            #[cfg(test)]
            mock_fail_ids: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Set activity IDs that should fail when queued (test builds only).
    #[cfg(test)]
    pub fn set_mock_fail_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.mock_fail_ids.lock().unwrap();
        guard.clear();
        guard.extend(ids.into_iter().map(Into::into));
    }

    /// Fully qualified queue path.
    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        )
    }

    /// Queue one fan-out invocation for a newly created activity.
    pub async fn queue_fan_out(&self, service_url: &str, payload: FanOutPayload) -> Result<()> {
        #[cfg(test)]
        {
            if self
                .mock_fail_ids
                .lock()
                .unwrap()
                .contains(&payload.activity_id)
            {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Mock queue failure for {}",
                    payload.activity_id
                )));
            }
        }

        tracing::debug!(activity_id = %payload.activity_id, "Queuing fan-out task");
        self.queue_task(service_url, FAN_OUT_PATH, &payload).await
    }

    /// Generic task queuing helper.
    async fn queue_task<T: Serialize>(
        &self,
        service_url: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<()> {
        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        let http_request = HttpRequest::default()
            .set_url(format!("{}{}", service_url, endpoint))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(std::collections::HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(crate::config::tasks_service_account_email(
                        &self.project_id,
                    ))
                    .set_audience(service_url.to_string()),
            );

        let task = Task::default().set_http_request(http_request);

        let _response = client
            .create_task()
            .set_parent(self.queue_path())
            .set_task(task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        Ok(())
    }
}
