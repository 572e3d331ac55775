// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod activity;
pub mod activity_type;
pub mod change;
pub mod notification;
pub mod summary;
pub mod user;

pub use activity::Activity;
pub use activity_type::{ActivityType, TypeAction, TypeStatus, Unit};
pub use change::{ChangeEvent, ChangeKind};
pub use notification::{Notification, NotificationTemplate, PushMessage};
pub use summary::MonthlySummary;
pub use user::{ProfileUpdate, User};
