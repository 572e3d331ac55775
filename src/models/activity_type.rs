// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sport categories and their soft-deletion lifecycle.
//!
//! `status` moves `active <-> hidden -> purged`. Purged is terminal: the type
//! disappears from every listing, but activities keep their `typeId`.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Measurement unit of an activity type. Immutable once an activity uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Distance,
    Duration,
}

impl Unit {
    /// Display label used in notifications and summaries.
    pub fn label(self) -> &'static str {
        match self {
            Unit::Distance => "km",
            Unit::Duration => "Min.",
        }
    }
}

/// Visibility status of an activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum TypeStatus {
    Active,
    Hidden,
    Purged,
}

/// A requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAction {
    Hide,
    Restore,
    Purge,
}

impl std::str::FromStr for TypeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hide" => Ok(TypeAction::Hide),
            "restore" => Ok(TypeAction::Restore),
            "purge" => Ok(TypeAction::Purge),
            other => Err(format!("Unknown activity type action: {}", other)),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action:?} an activity type that is {from:?}")]
pub struct TransitionError {
    pub from: TypeStatus,
    pub action: TypeAction,
}

impl TypeStatus {
    /// Apply an action, returning the new status.
    pub fn apply(self, action: TypeAction) -> Result<TypeStatus, TransitionError> {
        match (self, action) {
            (TypeStatus::Active, TypeAction::Hide) => Ok(TypeStatus::Hidden),
            (TypeStatus::Hidden, TypeAction::Restore) => Ok(TypeStatus::Active),
            (TypeStatus::Hidden, TypeAction::Purge) => Ok(TypeStatus::Purged),
            (from, action) => Err(TransitionError { from, action }),
        }
    }
}

/// Activity type document (`activityTypes/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityType {
    pub id: String,
    pub emoji: String,
    pub name: String,
    pub unit: Unit,
    pub status: TypeStatus,
    pub created_at: String,
}

impl ActivityType {
    /// Whether the type appears in any listing.
    pub fn is_listed(&self) -> bool {
        self.status != TypeStatus::Purged
    }

    /// Whether the type may be chosen for an activity.
    ///
    /// New entries accept only active types. When editing, the activity's
    /// current type stays selectable while hidden.
    pub fn is_selectable(&self, current_type_id: Option<&str>) -> bool {
        match self.status {
            TypeStatus::Active => true,
            TypeStatus::Hidden => current_type_id == Some(self.id.as_str()),
            TypeStatus::Purged => false,
        }
    }
}

/// Types offered by the activity picker, in input order.
pub fn picker_types<'a>(
    types: &'a [ActivityType],
    current_type_id: Option<&str>,
) -> Vec<&'a ActivityType> {
    types
        .iter()
        .filter(|t| t.is_selectable(current_type_id))
        .collect()
}
