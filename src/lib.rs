// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Walk & Run tracker: shared fitness-activity log with cross-user notifications.
//!
//! This crate provides the backend API for recording activities, fanning
//! each new activity out as per-user notifications and push messages, and
//! the client-side pipeline that surfaces those notifications exactly once.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Store;
use models::Activity;
use services::{FanOutPayload, FanOutWorker, GoogleOidcVerifier, NotificationHub, TasksService};
use std::sync::Arc;

/// How a created activity reaches the fan-out worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutTrigger {
    /// Enqueue a Cloud Task that calls `/tasks/fan-out`.
    Queue,
    /// A feed consumer watching the store picks it up.
    ChangeFeed,
    /// Run the worker before the create request returns.
    Inline,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn Store>,
    pub worker: Arc<FanOutWorker>,
    pub hub: NotificationHub,
    pub tasks_service: Option<TasksService>,
    pub tasks_verifier: Arc<GoogleOidcVerifier>,
    pub trigger: FanOutTrigger,
}

impl AppState {
    /// Hand a freshly committed activity to the fan-out worker.
    ///
    /// Never fails the caller: the activity is already stored, and a failed
    /// hand-off is logged.
    pub async fn trigger_fan_out(&self, activity: &Activity) {
        match (self.trigger, &self.tasks_service) {
            (FanOutTrigger::Queue, Some(tasks)) => {
                if let Err(e) = tasks
                    .queue_fan_out(&self.config.api_url, FanOutPayload::new(activity))
                    .await
                {
                    tracing::error!(
                        activity_id = %activity.id,
                        error = %e,
                        "Failed to queue fan-out task"
                    );
                }
            }
            (FanOutTrigger::Queue, None) => {
                tracing::error!(
                    activity_id = %activity.id,
                    "Fan-out queue enabled without a tasks service"
                );
            }
            (FanOutTrigger::ChangeFeed, _) => {}
            (FanOutTrigger::Inline, _) => {
                self.worker.fan_out(activity).await;
            }
        }
    }
}
