// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-recipient notification records and the push payload derived from them.
//!
//! Actor and type fields are snapshots taken when the notification is
//! created; later edits to the user or type never flow into existing rows.

use crate::models::{Activity, ActivityType, User};
use serde::{Deserialize, Serialize};

/// Type name used when the activity type is missing or purged.
pub const FALLBACK_TYPE_NAME: &str = "Aktivität";
/// Actor name used when the creator cannot be resolved.
pub const FALLBACK_ACTOR_NAME: &str = "Ein Benutzer";
/// Fixed title of every activity push message.
pub const PUSH_TITLE: &str = "Neue Fitness-Aktivität";
/// `data.source` marker for pushes sent by the fan-out worker.
pub const PUSH_SOURCE: &str = "fanout";

/// Notification document (`notifications/{activityId}_{userId}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Deterministic document ID, see [`notification_id`]
    pub id: String,
    /// Recipient
    pub user_id: String,
    pub activity_id: String,
    pub activity_type_name: String,
    pub actor_name: String,
    pub value: f64,
    pub unit_label: String,
    /// Server-assigned creation time (RFC3339)
    pub created_at: String,
    #[serde(default)]
    pub read: bool,
}

/// Document ID for the notification of `activity_id` sent to `user_id`.
///
/// The pair is the idempotency key: redelivered triggers address the same
/// document instead of creating a second one.
pub fn notification_id(activity_id: &str, user_id: &str) -> String {
    format!(
        "{}_{}",
        urlencoding::encode(activity_id),
        urlencoding::encode(user_id)
    )
}

/// Fields shared by every recipient of one activity, computed once per fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTemplate {
    pub activity_id: String,
    pub activity_type_name: String,
    pub actor_name: String,
    pub value: f64,
    pub unit_label: String,
    pub created_at: String,
}

impl NotificationTemplate {
    /// Snapshot the creator and type for `activity`.
    ///
    /// Missing lookups and purged types degrade to placeholder strings.
    pub fn new(
        activity: &Activity,
        creator: Option<&User>,
        activity_type: Option<&ActivityType>,
        created_at: String,
    ) -> Self {
        let visible_type = activity_type.filter(|t| t.is_listed());

        Self {
            activity_id: activity.id.clone(),
            activity_type_name: visible_type
                .map(|t| t.name.clone())
                .unwrap_or_else(|| FALLBACK_TYPE_NAME.to_string()),
            actor_name: creator
                .and_then(User::public_name)
                .unwrap_or(FALLBACK_ACTOR_NAME)
                .to_string(),
            value: activity.value,
            unit_label: visible_type
                .map(|t| t.unit.label().to_string())
                .unwrap_or_default(),
            created_at,
        }
    }

    /// Notification row for one recipient.
    pub fn for_recipient(&self, user_id: &str) -> Notification {
        Notification {
            id: notification_id(&self.activity_id, user_id),
            user_id: user_id.to_string(),
            activity_id: self.activity_id.clone(),
            activity_type_name: self.activity_type_name.clone(),
            actor_name: self.actor_name.clone(),
            value: self.value,
            unit_label: self.unit_label.clone(),
            created_at: self.created_at.clone(),
            read: false,
        }
    }

    /// `"{actor} hat {value} {unit} {type} hinzugefügt"`.
    pub fn body(&self) -> String {
        format_body(
            &self.actor_name,
            self.value,
            &self.unit_label,
            &self.activity_type_name,
        )
    }

    /// Push message for this activity. `ts` is milliseconds since the epoch.
    pub fn push_message(&self, ts: i64) -> PushMessage {
        PushMessage {
            notification: PushNotification {
                title: PUSH_TITLE.to_string(),
                body: self.body(),
            },
            data: PushData {
                source: PUSH_SOURCE.to_string(),
                activity_id: Some(self.activity_id.clone()),
                ts: ts.to_string(),
            },
        }
    }
}

impl Notification {
    /// Text shown on the notification surface.
    pub fn body(&self) -> String {
        format_body(
            &self.actor_name,
            self.value,
            &self.unit_label,
            &self.activity_type_name,
        )
    }
}

fn format_body(actor: &str, value: f64, unit_label: &str, type_name: &str) -> String {
    // An empty unit label must not leave a double space behind
    let amount = if unit_label.is_empty() {
        value.to_string()
    } else {
        format!("{} {}", value, unit_label)
    };
    format!("{} hat {} {} hinzugefügt", actor, amount, type_name)
}

/// Push payload: `{notification: {title, body}, data: {source, activityId, ts}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: PushNotification,
    #[serde(default)]
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// String-valued data block (FCM requires a string map).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub ts: String,
}
