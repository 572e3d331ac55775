// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document store.
//!
//! Mirrors the Firestore semantics the pipeline relies on (create-if-absent,
//! field-level push token writes, query orderings) and publishes activity
//! changes on a broadcast feed, standing in for the store's trigger.

use crate::db::{InsertOutcome, Store};
use crate::error::AppError;
use crate::models::{Activity, ActivityType, ChangeEvent, Notification, ProfileUpdate, User};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 1024;

/// Memory-backed store. Cloning shares the underlying collections.
#[derive(Clone)]
pub struct MemoryDb {
    users: Arc<DashMap<String, User>>,
    activity_types: Arc<DashMap<String, ActivityType>>,
    activities: Arc<DashMap<String, Activity>>,
    notifications: Arc<DashMap<String, Notification>>,
    activity_feed: broadcast::Sender<ChangeEvent<Activity>>,
    /// Recipients whose notification writes fail (test builds only).
    #[cfg(test)]
    fail_notification_writes_for: Arc<dashmap::DashSet<String>>,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        let (activity_feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            users: Arc::new(DashMap::new()),
            activity_types: Arc::new(DashMap::new()),
            activities: Arc::new(DashMap::new()),
            notifications: Arc::new(DashMap::new()),
            activity_feed,
            #[cfg(test)]
            fail_notification_writes_for: Arc::new(dashmap::DashSet::new()),
        }
    }

    /// Make notification writes for `user_id` fail (test builds only).
    #[cfg(test)]
    pub(crate) fn fail_notification_writes_for(&self, user_id: &str) {
        self.fail_notification_writes_for.insert(user_id.to_string());
    }

    /// Number of stored notifications.
    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    fn publish(&self, event: ChangeEvent<Activity>) {
        // No receivers is fine: nobody is watching the feed
        let _ = self.activity_feed.send(event);
    }
}

#[async_trait]
impl Store for MemoryDb {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push_token = Some(token.to_string());
            }
            Entry::Vacant(entry) => {
                entry.insert(User {
                    id: user_id.to_string(),
                    display_name: None,
                    email: None,
                    avatar_url: None,
                    push_token: Some(token.to_string()),
                    created_at: String::new(),
                });
            }
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<User, AppError> {
        let mut entry = self.users.entry(user_id.to_string()).or_insert_with(|| User {
            id: user_id.to_string(),
            display_name: None,
            email: None,
            avatar_url: None,
            push_token: None,
            created_at: String::new(),
        });
        update.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn get_activity_type(&self, type_id: &str) -> Result<Option<ActivityType>, AppError> {
        Ok(self.activity_types.get(type_id).map(|t| t.clone()))
    }

    async fn list_activity_types(&self) -> Result<Vec<ActivityType>, AppError> {
        let mut types: Vec<ActivityType> =
            self.activity_types.iter().map(|t| t.clone()).collect();
        types.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(types)
    }

    async fn set_activity_type(&self, activity_type: &ActivityType) -> Result<(), AppError> {
        self.activity_types
            .insert(activity_type.id.clone(), activity_type.clone());
        Ok(())
    }

    async fn insert_activity_type(
        &self,
        activity_type: &ActivityType,
    ) -> Result<InsertOutcome, AppError> {
        match self.activity_types.entry(activity_type.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(entry) => {
                entry.insert(activity_type.clone());
                Ok(InsertOutcome::Created)
            }
        }
    }

    async fn activity_type_in_use(&self, type_id: &str) -> Result<bool, AppError> {
        Ok(self.activities.iter().any(|a| a.type_id == type_id))
    }

    async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, AppError> {
        Ok(self.activities.get(activity_id).map(|a| a.clone()))
    }

    async fn create_activity(&self, activity: &Activity) -> Result<(), AppError> {
        match self.activities.entry(activity.id.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!(
                    "Activity {} already exists",
                    activity.id
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(activity.clone());
            }
        }
        self.publish(ChangeEvent::added(activity.id.clone(), activity.clone()));
        Ok(())
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), AppError> {
        self.activities
            .insert(activity.id.clone(), activity.clone());
        self.publish(ChangeEvent::modified(activity.id.clone(), activity.clone()));
        Ok(())
    }

    async fn delete_activity(&self, activity_id: &str) -> Result<(), AppError> {
        if let Some((id, activity)) = self.activities.remove(activity_id) {
            self.publish(ChangeEvent::removed(id, activity));
        }
        Ok(())
    }

    async fn list_activities(&self, user_id: Option<&str>) -> Result<Vec<Activity>, AppError> {
        let mut activities: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| user_id.map_or(true, |uid| a.user_id == uid))
            .map(|a| a.clone())
            .collect();
        activities.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(activities)
    }

    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, AppError> {
        #[cfg(test)]
        {
            if self
                .fail_notification_writes_for
                .contains(&notification.user_id)
            {
                return Err(AppError::Database(format!(
                    "Mock write failure for {}",
                    notification.user_id
                )));
            }
        }

        match self.notifications.entry(notification.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(entry) => {
                entry.insert(notification.clone());
                Ok(InsertOutcome::Created)
            }
        }
    }

    async fn get_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, AppError> {
        Ok(self.notifications.get(notification_id).map(|n| n.clone()))
    }

    async fn list_unread_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<Notification>, AppError> {
        let mut unread: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .map(|n| n.clone())
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(unread)
    }

    async fn list_notifications_for_activity(
        &self,
        activity_id: &str,
    ) -> Result<Vec<Notification>, AppError> {
        let mut rows: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.activity_id == activity_id)
            .map(|n| n.clone())
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), AppError> {
        let mut notification = self.notifications.get_mut(notification_id).ok_or_else(|| {
            AppError::NotFound(format!("Notification {} not found", notification_id))
        })?;
        notification.read = true;
        Ok(())
    }

    fn activity_feed(&self) -> Option<broadcast::Receiver<ChangeEvent<Activity>>> {
        Some(self.activity_feed.subscribe())
    }
}
