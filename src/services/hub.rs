// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process broadcast of notification changes.
//!
//! Backs the live unread-notification query served to clients. Events cover
//! the instance that produced them; clients re-subscribing get the full unread
//! set again as `added` events.

use crate::models::{ChangeEvent, Notification};
use tokio::sync::broadcast;

const HUB_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<ChangeEvent<Notification>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publish a change. Dropped silently when nobody listens.
    pub fn publish(&self, event: ChangeEvent<Notification>) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<Notification>> {
        self.tx.subscribe()
    }
}
