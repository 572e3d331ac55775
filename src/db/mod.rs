// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer: the document store and user directory.
//!
//! [`Store`] is the interface the notification pipeline consumes. Firestore
//! backs it in production; [`MemoryDb`] backs local development and tests and
//! additionally exposes a live activity change feed.

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{Activity, ActivityType, ChangeEvent, Notification, ProfileUpdate, User};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const ACTIVITY_TYPES: &str = "activityTypes";
    pub const ACTIVITIES: &str = "activities";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    AlreadyExists,
}

/// Typed document store operations.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Users ───────────────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError>;

    async fn upsert_user(&self, user: &User) -> Result<(), AppError>;

    /// Every registered user, in one pass.
    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    /// Overwrite only the push token field of a user.
    async fn set_push_token(&self, user_id: &str, token: &str) -> Result<(), AppError>;

    /// Write only the profile fields set in `update`, creating the user if
    /// absent, and return the stored profile.
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate)
        -> Result<User, AppError>;

    // ─── Activity Types ──────────────────────────────────────────

    async fn get_activity_type(&self, type_id: &str) -> Result<Option<ActivityType>, AppError>;

    /// All types including hidden and purged, oldest first.
    async fn list_activity_types(&self) -> Result<Vec<ActivityType>, AppError>;

    async fn set_activity_type(&self, activity_type: &ActivityType) -> Result<(), AppError>;

    async fn insert_activity_type(
        &self,
        activity_type: &ActivityType,
    ) -> Result<InsertOutcome, AppError>;

    /// Whether any activity references the type.
    async fn activity_type_in_use(&self, type_id: &str) -> Result<bool, AppError>;

    // ─── Activities ──────────────────────────────────────────────

    async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, AppError>;

    async fn create_activity(&self, activity: &Activity) -> Result<(), AppError>;

    async fn update_activity(&self, activity: &Activity) -> Result<(), AppError>;

    async fn delete_activity(&self, activity_id: &str) -> Result<(), AppError>;

    /// Activities newest `date` first, optionally for one owner.
    async fn list_activities(&self, user_id: Option<&str>) -> Result<Vec<Activity>, AppError>;

    // ─── Notifications ───────────────────────────────────────────

    /// Create the notification unless a document with its id exists.
    /// An existing document is left untouched.
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, AppError>;

    async fn get_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, AppError>;

    /// Unread notifications of a recipient, newest first.
    async fn list_unread_notifications(&self, user_id: &str)
        -> Result<Vec<Notification>, AppError>;

    async fn list_notifications_for_activity(
        &self,
        activity_id: &str,
    ) -> Result<Vec<Notification>, AppError>;

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), AppError>;

    // ─── Change Feed ─────────────────────────────────────────────

    /// Live change events for the activities collection, if this store
    /// can produce them in-process.
    fn activity_feed(&self) -> Option<broadcast::Receiver<ChangeEvent<Activity>>> {
        None
    }

    /// Live changes to a recipient's unread notifications, watched by the
    /// backend itself so they reach every server instance. The stream
    /// starts with the current unread set as `added` events. `None` when
    /// the store cannot watch queries.
    async fn watch_unread_notifications(
        &self,
        _user_id: &str,
    ) -> Result<Option<NotificationWatch>, AppError> {
        Ok(None)
    }
}

/// Stream of changes to one recipient's unread notifications.
pub type NotificationWatch = BoxStream<'static, ChangeEvent<Notification>>;
