// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Default activity types created on first start.

use crate::db::{InsertOutcome, Store};
use crate::error::AppError;
use crate::models::{ActivityType, TypeStatus, Unit};
use crate::time_utils::now_rfc3339;

/// `(id, emoji, name, unit)` of the built-in types.
pub const DEFAULT_ACTIVITY_TYPES: [(&str, &str, &str, Unit); 3] = [
    ("running", "🏃", "Laufen", Unit::Distance),
    ("walking", "🚶", "Gehen", Unit::Distance),
    ("gym", "💪", "Fitnessstudio", Unit::Duration),
];

/// Create the default types that do not exist yet.
///
/// Existing documents are never touched, so a hidden or purged default
/// stays that way across restarts. Returns the number of types created.
pub async fn seed_default_activity_types(store: &dyn Store) -> Result<usize, AppError> {
    let created_at = now_rfc3339();
    let mut created = 0;

    for (id, emoji, name, unit) in DEFAULT_ACTIVITY_TYPES {
        let activity_type = ActivityType {
            id: id.to_string(),
            emoji: emoji.to_string(),
            name: name.to_string(),
            unit,
            status: TypeStatus::Active,
            created_at: created_at.clone(),
        };

        if store.insert_activity_type(&activity_type).await? == InsertOutcome::Created {
            created += 1;
        }
    }

    if created > 0 {
        tracing::info!(created, "Seeded default activity types");
    }
    Ok(created)
}
