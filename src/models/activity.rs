// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recorded exercise entries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stored activity record (`activities/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Document ID
    pub id: String,
    /// Referenced activity type (may be hidden or purged later)
    pub type_id: String,
    /// Amount in the type's unit, never negative
    pub value: f64,
    /// Day the exercise happened
    pub date: NaiveDate,
    /// Owner
    pub user_id: String,
    /// When the record was created (RFC3339)
    pub created_at: String,
}

impl Activity {
    /// `"YYYY-MM"` bucket used by monthly summaries.
    pub fn month_key(&self) -> String {
        self.date.format("%Y-%m").to_string()
    }
}

/// Check an activity value: finite and not negative.
pub fn validate_value(value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err("Value must be a finite number".to_string());
    }
    if value < 0.0 {
        return Err("Value must not be negative".to_string());
    }
    Ok(())
}
