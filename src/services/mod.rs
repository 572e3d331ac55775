// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod fanout;
pub mod feed;
pub mod google_oidc;
pub mod hub;
pub mod push;
pub mod seed;
pub mod tasks;

pub use fanout::{FanOutReport, FanOutWorker};
pub use feed::ActivityFeedConsumer;
pub use google_oidc::{GoogleOidcVerifier, OidcError, VerifiedTaskPrincipal};
pub use hub::NotificationHub;
pub use push::{FcmTransport, LogOnlyTransport, PushError, PushTransport};
pub use seed::seed_default_activity_types;
pub use tasks::{FanOutPayload, TasksService};
