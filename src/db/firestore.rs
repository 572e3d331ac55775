// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile and push token)
//! - Activity types (sport categories)
//! - Activities (recorded exercise entries)
//! - Notifications (per-recipient fan-out rows)

use crate::db::{collections, InsertOutcome, NotificationWatch, Store};
use crate::error::AppError;
use crate::models::{Activity, ActivityType, ChangeEvent, Notification, ProfileUpdate, User};
use async_trait::async_trait;
use firestore::errors::FirestoreError;
use firestore::{
    FirestoreListenEvent, FirestoreListenerTarget, FirestoreMemListenStateStorage,
    FirestoreQueryDirection,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Listener target id of the unread-notifications query.
const UNREAD_TARGET_ID: u32 = 1;

/// Partial user document carrying only the push token.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushTokenField {
    push_token: Option<String>,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }
}

/// Turns raw listen responses for one unread query into change events.
///
/// Documents that leave the query may arrive without data, so the last
/// seen version of each unread notification is kept to report `removed`.
#[derive(Default)]
struct UnreadWatch {
    unread: HashMap<String, Notification>,
}

impl UnreadWatch {
    fn apply(&mut self, event: FirestoreListenEvent) -> Option<ChangeEvent<Notification>> {
        match event {
            FirestoreListenEvent::DocumentChange(change) => {
                let doc = change.document?;
                let notification: Notification =
                    match firestore::FirestoreDb::deserialize_doc_to(&doc) {
                        Ok(notification) => notification,
                        Err(e) => {
                            tracing::warn!(
                                doc = %doc.name,
                                error = %e,
                                "Skipping undecodable notification"
                            );
                            return None;
                        }
                    };
                let id = notification.id.clone();
                let target = UNREAD_TARGET_ID as i32;

                if change.target_ids.contains(&target) && !notification.read {
                    let event = if self.unread.contains_key(&id) {
                        ChangeEvent::modified(id.clone(), notification.clone())
                    } else {
                        ChangeEvent::added(id.clone(), notification.clone())
                    };
                    self.unread.insert(id, notification);
                    Some(event)
                } else {
                    self.unread
                        .remove(&id)
                        .map(|_| ChangeEvent::removed(id, notification))
                }
            }
            FirestoreListenEvent::DocumentDelete(delete) => self.forget(&delete.document),
            FirestoreListenEvent::DocumentRemove(remove) => self.forget(&remove.document),
            _ => None,
        }
    }

    fn forget(&mut self, document_path: &str) -> Option<ChangeEvent<Notification>> {
        let id = document_path.rsplit('/').next()?;
        self.unread
            .remove(id)
            .map(|last_seen| ChangeEvent::removed(id, last_seen))
    }
}

/// Map a create-if-absent result to an [`InsertOutcome`].
fn insert_outcome<T>(result: Result<T, FirestoreError>) -> Result<InsertOutcome, AppError> {
    match result {
        Ok(_) => Ok(InsertOutcome::Created),
        Err(FirestoreError::DataConflictError(_)) => Ok(InsertOutcome::AlreadyExists),
        Err(e) => Err(AppError::Database(e.to_string())),
    }
}

#[async_trait]
impl Store for FirestoreDb {
    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: User = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
        let field = PushTokenField {
            push_token: Some(token.to_string()),
        };

        // Field mask keeps concurrent profile edits intact
        let _: PushTokenField = self
            .get_client()?
            .fluent()
            .update()
            .fields(["pushToken"])
            .in_col(collections::USERS)
            .document_id(user_id)
            .object(&field)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<User, AppError> {
        let fields = update.field_paths();
        if !fields.is_empty() {
            // Field mask keeps a concurrently written push token intact
            let _: ProfileUpdate = self
                .get_client()?
                .fluent()
                .update()
                .fields(fields)
                .in_col(collections::USERS)
                .document_id(user_id)
                .object(update)
                .execute()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        self.get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    // ─── Activity Type Operations ────────────────────────────────

    async fn get_activity_type(&self, type_id: &str) -> Result<Option<ActivityType>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITY_TYPES)
            .obj()
            .one(type_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_activity_types(&self) -> Result<Vec<ActivityType>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITY_TYPES)
            .order_by([
                ("createdAt", FirestoreQueryDirection::Ascending),
                ("name", FirestoreQueryDirection::Ascending),
            ])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn set_activity_type(&self, activity_type: &ActivityType) -> Result<(), AppError> {
        let _: ActivityType = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACTIVITY_TYPES)
            .document_id(&activity_type.id)
            .object(activity_type)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn insert_activity_type(
        &self,
        activity_type: &ActivityType,
    ) -> Result<InsertOutcome, AppError> {
        let result = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::ACTIVITY_TYPES)
            .document_id(&activity_type.id)
            .object(activity_type)
            .execute::<ActivityType>()
            .await;
        insert_outcome(result)
    }

    async fn activity_type_in_use(&self, type_id: &str) -> Result<bool, AppError> {
        let found: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| q.for_all([q.field("typeId").eq(type_id)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(!found.is_empty())
    }

    // ─── Activity Operations ─────────────────────────────────────

    async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(activity_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn create_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let _: Activity = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::ACTIVITIES)
            .document_id(&activity.id)
            .object(activity)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let _: Activity = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(&activity.id)
            .object(activity)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_activity(&self, activity_id: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::ACTIVITIES)
            .document_id(activity_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_activities(&self, user_id: Option<&str>) -> Result<Vec<Activity>, AppError> {
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES);

        let query = if let Some(user_id) = user_id {
            let user_id = user_id.to_string();
            query.filter(move |q| q.for_all([q.field("userId").eq(user_id.clone())]))
        } else {
            query
        };

        query
            .order_by([
                ("date", FirestoreQueryDirection::Descending),
                ("createdAt", FirestoreQueryDirection::Descending),
            ])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Notification Operations ─────────────────────────────────

    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, AppError> {
        let result = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::NOTIFICATIONS)
            .document_id(&notification.id)
            .object(notification)
            .execute::<Notification>()
            .await;
        insert_outcome(result)
    }

    async fn get_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::NOTIFICATIONS)
            .obj()
            .one(notification_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_unread_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<Notification>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(|q| {
                q.for_all([
                    q.field("userId").eq(user_id),
                    q.field("read").eq(false),
                ])
            })
            .order_by([("createdAt", FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_notifications_for_activity(
        &self,
        activity_id: &str,
    ) -> Result<Vec<Notification>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(|q| q.for_all([q.field("activityId").eq(activity_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), AppError> {
        let mut notification = self.get_notification(notification_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Notification {} not found", notification_id))
        })?;
        notification.read = true;

        let _: Notification = self
            .get_client()?
            .fluent()
            .update()
            .fields(["read"])
            .in_col(collections::NOTIFICATIONS)
            .document_id(notification_id)
            .object(&notification)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn watch_unread_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationWatch>, AppError> {
        let client = self.get_client()?;
        let db_error = |e: FirestoreError| AppError::Database(e.to_string());

        let mut listener = client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(db_error)?;

        client
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(|q| {
                q.for_all([
                    q.field("userId").eq(user_id),
                    q.field("read").eq(false),
                ])
            })
            .listen()
            .add_target(FirestoreListenerTarget::new(UNREAD_TARGET_ID), &mut listener)
            .map_err(db_error)?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        listener
            .start(move |event| {
                let sent: Result<(), Box<dyn std::error::Error + Send + Sync>> = tx
                    .send(event)
                    .map_err(|_| "notification watch closed".into());
                async move { sent }
            })
            .await
            .map_err(db_error)?;

        tracing::debug!(user_id = %user_id, "Watching unread notifications");

        let mut watch = UnreadWatch::default();
        let changes = UnboundedReceiverStream::new(rx)
            .filter_map(move |event| {
                // The listener stops once the stream holding it is dropped
                let _listener = &listener;
                let change = watch.apply(event);
                async move { change }
            })
            .boxed();

        Ok(Some(changes))
    }
}
