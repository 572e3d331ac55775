// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consumer of the store's activity change feed.
//!
//! Used when fan-out is not carried by Cloud Tasks. Only `added` events
//! trigger a fan-out; edits and deletions of activities never notify.

use crate::models::{Activity, ChangeEvent, ChangeKind};
use crate::services::fanout::FanOutWorker;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;

/// Runs one fan-out per created activity until the feed closes.
pub struct ActivityFeedConsumer {
    worker: Arc<FanOutWorker>,
    feed: broadcast::Receiver<ChangeEvent<Activity>>,
}

impl ActivityFeedConsumer {
    pub fn new(worker: Arc<FanOutWorker>, feed: broadcast::Receiver<ChangeEvent<Activity>>) -> Self {
        Self { worker, feed }
    }

    /// Consume the feed. Returns the number of fan-outs run once the
    /// sender side is dropped and every in-flight fan-out has finished.
    pub async fn run(mut self) -> usize {
        let mut in_flight = JoinSet::new();
        let mut dispatched = 0;

        loop {
            match self.feed.recv().await {
                Ok(event) if event.kind == ChangeKind::Added => {
                    let worker = Arc::clone(&self.worker);
                    dispatched += 1;
                    in_flight.spawn(async move {
                        worker.fan_out(&event.data).await;
                    });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Activity feed lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }

            // Reap finished fan-outs so the set stays small
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!(dispatched, "Activity feed closed");
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDb, Store};
    use crate::models::User;
    use crate::services::push::LogOnlyTransport;
    use chrono::NaiveDate;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            display_name: Some(id.to_uppercase()),
            email: None,
            avatar_url: None,
            push_token: None,
            created_at: String::new(),
        }
    }

    fn activity(id: &str) -> Activity {
        Activity {
            id: id.to_string(),
            type_id: "gym".to_string(),
            value: 45.0,
            date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            user_id: "u1".to_string(),
            created_at: "2025-04-01T08:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_only_added_events_fan_out() {
        let db = MemoryDb::new();
        db.upsert_user(&user("u1")).await.unwrap();
        db.upsert_user(&user("u2")).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let worker = Arc::new(FanOutWorker::new(
            Arc::new(db.clone()),
            Arc::new(LogOnlyTransport),
        ));
        let consumer = tokio::spawn(ActivityFeedConsumer::new(worker, rx).run());

        tx.send(ChangeEvent::added("a1", activity("a1"))).unwrap();
        tx.send(ChangeEvent::modified("a1", activity("a1"))).unwrap();
        tx.send(ChangeEvent::removed("a1", activity("a1"))).unwrap();
        tx.send(ChangeEvent::added("a2", activity("a2"))).unwrap();
        drop(tx);

        assert_eq!(consumer.await.unwrap(), 2);
        assert_eq!(db.notification_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_feed_drives_fan_out() {
        let db = MemoryDb::new();
        db.upsert_user(&user("u1")).await.unwrap();
        db.upsert_user(&user("u2")).await.unwrap();
        db.upsert_user(&user("u3")).await.unwrap();

        let feed = db.activity_feed().unwrap();
        let worker = Arc::new(FanOutWorker::new(
            Arc::new(db.clone()),
            Arc::new(LogOnlyTransport),
        ));
        let consumer = tokio::spawn(ActivityFeedConsumer::new(worker, feed).run());

        db.create_activity(&activity("a1")).await.unwrap();

        // The worker keeps the store (and so the feed) alive; poll for rows
        for _ in 0..100 {
            if db.notification_count() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(db.notification_count(), 2);
        consumer.abort();
    }
}
