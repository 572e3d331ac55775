// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client side of the notification pipeline.
//!
//! - [`ledger`]: durable set of notification ids already surfaced
//! - [`subscriber`]: foreground live view, dedup and push-token registration
//! - [`background`]: push handler that runs without any open page
//!
//! Platform facilities (OS notification surface, window list, push
//! registration) sit behind traits so the pipeline logic is host-agnostic.

pub mod background;
pub mod ledger;
pub mod subscriber;

pub use background::{BackgroundPushHandler, HandlerConfig, PushDecision};
pub use ledger::{DedupLedger, DurableStorage, FileStorage, MemoryStorage};
pub use subscriber::{DeliveryMode, NotificationSubscriber, Presenter, Subscription};

/// Client-side pipeline errors. None of them terminate a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("durable storage error: {0}")]
    Storage(String),

    #[error("invalid ledger contents: {0}")]
    Ledger(#[from] serde_json::Error),

    #[error("notification permission {0}")]
    Permission(String),

    #[error("push registration failed: {0}")]
    Registration(String),

    #[error("push token unavailable: {0}")]
    Token(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
