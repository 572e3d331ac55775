// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fan-out worker: one new activity becomes one notification per other user.
//!
//! Handles the core workflow:
//! 1. Resolve creator and activity type (placeholders on failure)
//! 2. Enumerate every other user
//! 3. Create `notifications/{activityId}_{userId}` if absent
//! 4. Send a push to recipients with a token, unless their row already existed
//! 5. Log aggregate failures; never raise
//!
//! The trigger framework owns retries. Redelivery is harmless because the
//! notification id is derived from `(activityId, userId)`, existing rows
//! are never overwritten, and a recipient whose row already existed was
//! pushed by the delivery that created it.

use crate::config::DEFAULT_FANOUT_CONCURRENCY;
use crate::db::{InsertOutcome, Store};
use crate::models::{Activity, ChangeEvent, NotificationTemplate, PushMessage, User};
use crate::services::hub::NotificationHub;
use crate::services::push::{PushError, PushTransport};
use crate::time_utils::now_rfc3339;
use futures_util::{stream, StreamExt};
use std::sync::Arc;

/// Outcome counters of one fan-out invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Users other than the creator.
    pub recipients: u32,
    /// Notification rows written by this invocation.
    pub created: u32,
    /// Rows that already existed (redelivery).
    pub duplicates: u32,
    pub write_failures: u32,
    pub pushes_sent: u32,
    pub push_failures: u32,
    /// Push failures caused by unregistered tokens (subset of `push_failures`).
    pub unregistered_tokens: u32,
}

impl FanOutReport {
    /// Returns true if every write and every push succeeded.
    pub fn is_complete_success(&self) -> bool {
        self.write_failures == 0 && self.push_failures == 0
    }
}

/// Per-recipient result, folded into the report.
struct RecipientOutcome {
    write: WriteResult,
    push: Option<Result<(), PushError>>,
}

enum WriteResult {
    Created,
    Duplicate,
    Failed,
}

/// Fan-out worker.
pub struct FanOutWorker {
    store: Arc<dyn Store>,
    push: Arc<dyn PushTransport>,
    hub: Option<NotificationHub>,
    concurrency: usize,
}

impl FanOutWorker {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushTransport>) -> Self {
        Self {
            store,
            push,
            hub: None,
            concurrency: DEFAULT_FANOUT_CONCURRENCY,
        }
    }

    /// Publish created notifications to live subscribers.
    pub fn with_hub(mut self, hub: NotificationHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Bound on concurrent per-recipient operations.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fan out one newly created activity snapshot.
    pub async fn fan_out(&self, activity: &Activity) -> FanOutReport {
        tracing::info!(
            activity_id = %activity.id,
            user_id = %activity.user_id,
            "Fanning out activity"
        );

        // 1. Resolve creator and type concurrently; absence is tolerated
        let (creator, activity_type) = tokio::join!(
            self.store.get_user(&activity.user_id),
            self.store.get_activity_type(&activity.type_id)
        );
        let creator = creator.unwrap_or_else(|e| {
            tracing::warn!(activity_id = %activity.id, error = %e, "Creator lookup failed");
            None
        });
        let activity_type = activity_type.unwrap_or_else(|e| {
            tracing::warn!(activity_id = %activity.id, error = %e, "Activity type lookup failed");
            None
        });

        // 2. Everyone except the creator
        let recipients: Vec<User> = match self.store.list_users().await {
            Ok(users) => users
                .into_iter()
                .filter(|u| u.id != activity.user_id)
                .collect(),
            Err(e) => {
                tracing::error!(
                    activity_id = %activity.id,
                    error = %e,
                    "Recipient enumeration failed, nothing delivered"
                );
                return FanOutReport::default();
            }
        };

        // 3. One payload for all recipients
        let template = NotificationTemplate::new(
            activity,
            creator.as_ref(),
            activity_type.as_ref(),
            now_rfc3339(),
        );
        let message = template.push_message(chrono::Utc::now().timestamp_millis());

        // 4. Writes and pushes, bounded, unordered
        let deliveries: Vec<_> = recipients
            .iter()
            .map(|recipient| self.deliver(&template, &message, recipient))
            .collect();
        let outcomes: Vec<RecipientOutcome> = stream::iter(deliveries)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // 5. Aggregate and log
        let mut report = FanOutReport {
            recipients: recipients.len() as u32,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.write {
                WriteResult::Created => report.created += 1,
                WriteResult::Duplicate => report.duplicates += 1,
                WriteResult::Failed => report.write_failures += 1,
            }
            match outcome.push {
                Some(Ok(())) => report.pushes_sent += 1,
                Some(Err(PushError::Unregistered)) => {
                    report.push_failures += 1;
                    report.unregistered_tokens += 1;
                }
                Some(Err(PushError::Transport(_))) => report.push_failures += 1,
                None => {}
            }
        }

        if report.is_complete_success() {
            tracing::info!(
                activity_id = %activity.id,
                recipients = report.recipients,
                created = report.created,
                duplicates = report.duplicates,
                pushes_sent = report.pushes_sent,
                "Fan-out complete"
            );
        } else {
            tracing::error!(
                activity_id = %activity.id,
                recipients = report.recipients,
                write_failures = report.write_failures,
                push_failures = report.push_failures,
                unregistered_tokens = report.unregistered_tokens,
                "Fan-out finished with failures"
            );
        }

        report
    }

    /// Write the recipient's row, then push if they have a token.
    ///
    /// A failed write still pushes. An existing row means an earlier
    /// delivery already pushed, so redelivery stays silent.
    async fn deliver(
        &self,
        template: &NotificationTemplate,
        message: &PushMessage,
        recipient: &User,
    ) -> RecipientOutcome {
        let notification = template.for_recipient(&recipient.id);

        let write = match self.store.insert_notification(&notification).await {
            Ok(InsertOutcome::Created) => {
                if let Some(hub) = &self.hub {
                    hub.publish(ChangeEvent::added(
                        notification.id.clone(),
                        notification.clone(),
                    ));
                }
                WriteResult::Created
            }
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::debug!(
                    notification_id = %notification.id,
                    "Notification already exists (redelivery)"
                );
                WriteResult::Duplicate
            }
            Err(e) => {
                tracing::warn!(
                    recipient = %recipient.id,
                    activity_id = %template.activity_id,
                    error = %e,
                    "Notification write failed"
                );
                WriteResult::Failed
            }
        };

        let push = match (&write, recipient.push_token()) {
            (WriteResult::Duplicate, _) | (_, None) => None,
            (_, Some(token)) => {
                let result = self.push.send(token, message).await;
                match &result {
                    Ok(()) => {}
                    Err(PushError::Unregistered) => tracing::warn!(
                        recipient = %recipient.id,
                        "Push token no longer registered"
                    ),
                    Err(e) => tracing::warn!(
                        recipient = %recipient.id,
                        error = %e,
                        "Push send failed"
                    ),
                }
                Some(result)
            }
        };

        RecipientOutcome { write, push }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::{ActivityType, TypeStatus, Unit};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Push transport that records sends and fails for chosen tokens.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, PushMessage)>>,
        unregistered: Vec<String>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
            if self.unregistered.iter().any(|t| t == token) {
                return Err(PushError::Unregistered);
            }
            self.sent
                .lock()
                .unwrap()
                .push((token.to_string(), message.clone()));
            Ok(())
        }
    }

    fn user(id: &str, name: &str, token: Option<&str>) -> User {
        User {
            id: id.to_string(),
            display_name: Some(name.to_string()),
            email: None,
            avatar_url: None,
            push_token: token.map(String::from),
            created_at: String::new(),
        }
    }

    fn running() -> ActivityType {
        ActivityType {
            id: "running".to_string(),
            emoji: "🏃".to_string(),
            name: "Laufen".to_string(),
            unit: Unit::Distance,
            status: TypeStatus::Active,
            created_at: String::new(),
        }
    }

    fn activity(id: &str, user_id: &str) -> Activity {
        Activity {
            id: id.to_string(),
            type_id: "running".to_string(),
            value: 5.0,
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            user_id: user_id.to_string(),
            created_at: "2025-03-14T10:00:00.000Z".to_string(),
        }
    }

    async fn setup(users: &[User]) -> (MemoryDb, Arc<RecordingTransport>) {
        let db = MemoryDb::new();
        for u in users {
            db.upsert_user(u).await.unwrap();
        }
        db.set_activity_type(&running()).await.unwrap();
        (db, Arc::new(RecordingTransport::default()))
    }

    #[tokio::test]
    async fn test_write_failure_does_not_block_other_recipients() {
        let (db, push) = setup(&[
            user("u1", "Anna", None),
            user("u2", "Ben", Some("t2")),
            user("u3", "Cleo", Some("t3")),
        ])
        .await;
        db.fail_notification_writes_for("u2");

        let worker = FanOutWorker::new(Arc::new(db.clone()), push.clone());
        let report = worker.fan_out(&activity("a1", "u1")).await;

        assert_eq!(report.recipients, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.write_failures, 1);
        // Push still goes out for the recipient whose write failed
        assert_eq!(report.pushes_sent, 2);
        assert!(!report.is_complete_success());

        let rows = db.list_notifications_for_activity("a1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u3");
    }

    #[tokio::test]
    async fn test_unregistered_token_keeps_notification_row() {
        let db = MemoryDb::new();
        db.upsert_user(&user("u1", "Anna", None)).await.unwrap();
        db.upsert_user(&user("u2", "Ben", Some("stale"))).await.unwrap();
        let push = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            unregistered: vec!["stale".to_string()],
        });

        let worker = FanOutWorker::new(Arc::new(db.clone()), push);
        let report = worker.fan_out(&activity("a1", "u1")).await;

        assert_eq!(report.created, 1);
        assert_eq!(report.push_failures, 1);
        assert_eq!(report.unregistered_tokens, 1);
        // Token is left in place
        let u2 = db.get_user("u2").await.unwrap().unwrap();
        assert_eq!(u2.push_token.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn test_created_rows_are_published_to_hub() {
        let (db, push) = setup(&[user("u1", "Anna", None), user("u2", "Ben", None)]).await;
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe();

        let worker = FanOutWorker::new(Arc::new(db), push).with_hub(hub);
        worker.fan_out(&activity("a1", "u1")).await;
        // Redelivery publishes nothing new
        worker.fan_out(&activity("a1", "u1")).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.data.user_id, "u2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redelivery_keeps_read_flag() {
        let (db, push) = setup(&[user("u1", "Anna", None), user("u2", "Ben", None)]).await;
        let worker = FanOutWorker::new(Arc::new(db.clone()), push);

        worker.fan_out(&activity("a1", "u1")).await;
        let id = crate::models::notification::notification_id("a1", "u2");
        db.mark_notification_read(&id).await.unwrap();

        let report = worker.fan_out(&activity("a1", "u1")).await;
        assert_eq!(report.duplicates, 1);
        assert!(db.get_notification(&id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_redelivery_does_not_push_again() {
        let (db, push) = setup(&[
            user("u1", "Anna", None),
            user("u2", "Ben", Some("t2")),
            user("u3", "Cleo", Some("t3")),
        ])
        .await;
        let worker = FanOutWorker::new(Arc::new(db.clone()), push.clone());

        let first = worker.fan_out(&activity("a1", "u1")).await;
        assert_eq!(first.pushes_sent, 2);

        // Only the user who joined since the first delivery is pushed
        db.upsert_user(&user("u4", "Dora", Some("t4"))).await.unwrap();
        let second = worker.fan_out(&activity("a1", "u1")).await;

        assert_eq!(second.duplicates, 2);
        assert_eq!(second.created, 1);
        assert_eq!(second.pushes_sent, 1);
        let tokens: Vec<String> = push
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens.iter().filter(|t| *t == "t4").count(), 1);
    }

    #[tokio::test]
    async fn test_single_user_has_no_recipients() {
        let (db, push) = setup(&[user("u1", "Anna", Some("t1"))]).await;
        let worker = FanOutWorker::new(Arc::new(db.clone()), push.clone()).with_concurrency(0);

        let report = worker.fan_out(&activity("a1", "u1")).await;

        assert_eq!(report, FanOutReport::default());
        assert!(push.sent.lock().unwrap().is_empty());
        assert_eq!(db.notification_count(), 0);
    }
}
