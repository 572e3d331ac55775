// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users.
//! Queue header and OIDC checks are applied in routes/mod.rs.

use crate::services::tasks::{FanOutPayload, FAN_OUT_PATH};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use std::sync::Arc;

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(FAN_OUT_PATH, post(fan_out))
}

/// Fan out one created activity.
///
/// The stored document is the source of truth: the task only names the
/// activity, and a task for an activity that no longer exists is dropped.
/// Answers 200 once the worker settles, since per-recipient failures are
/// logged by the worker. A failed load answers 500 so Cloud Tasks retries.
async fn fan_out(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FanOutPayload>,
) -> StatusCode {
    if payload.activity.id != payload.activity_id {
        tracing::warn!(
            activity_id = %payload.activity_id,
            snapshot_id = %payload.activity.id,
            "Fan-out payload id mismatch, dropping task"
        );
        return StatusCode::OK;
    }

    let activity = match state.db.get_activity(&payload.activity_id).await {
        Ok(Some(activity)) => activity,
        Ok(None) => {
            tracing::warn!(
                activity_id = %payload.activity_id,
                "Fan-out task for unknown activity, dropping task"
            );
            return StatusCode::OK;
        }
        Err(e) => {
            tracing::error!(
                activity_id = %payload.activity_id,
                error = %e,
                "Failed to load activity for fan-out"
            );
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    tracing::info!(
        activity_id = %activity.id,
        user_id = %activity.user_id,
        "Processing fan-out from Cloud Task"
    );

    let report = state.worker.fan_out(&activity).await;

    tracing::info!(
        activity_id = %activity.id,
        created = report.created,
        duplicates = report.duplicates,
        pushes_sent = report.pushes_sent,
        "Fan-out task finished"
    );
    StatusCode::OK
}
