// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Monthly aggregates across users.
//!
//! Each month totals distance and duration separately and prices them:
//! 0.15 € per km, 0.15 € per 10 minutes.

use crate::models::{Activity, ActivityType, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const EUR_PER_KM: f64 = 0.15;
const EUR_PER_10_MIN: f64 = 0.15;

/// Cost in EUR of `value` in `unit`.
pub fn cost_eur(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Distance => value * EUR_PER_KM,
        Unit::Duration => value / 10.0 * EUR_PER_10_MIN,
    }
}

/// Aggregate for one calendar month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MonthlySummary {
    /// `"YYYY-MM"`
    pub month: String,
    pub activity_count: u32,
    pub distance_count: u32,
    pub duration_count: u32,
    pub total_km: f64,
    pub total_minutes: f64,
    pub cost_eur: f64,
}

impl MonthlySummary {
    fn add(&mut self, activity: &Activity, unit: Option<Unit>) {
        self.activity_count += 1;
        match unit {
            Some(Unit::Distance) => {
                self.distance_count += 1;
                self.total_km += activity.value;
            }
            Some(Unit::Duration) => {
                self.duration_count += 1;
                self.total_minutes += activity.value;
            }
            None => {}
        }
        if let Some(unit) = unit {
            self.cost_eur += cost_eur(activity.value, unit);
        }
    }

    pub fn avg_km(&self) -> Option<f64> {
        (self.distance_count > 0).then(|| self.total_km / self.distance_count as f64)
    }

    pub fn avg_minutes(&self) -> Option<f64> {
        (self.duration_count > 0).then(|| self.total_minutes / self.duration_count as f64)
    }

    pub fn avg_cost_eur(&self) -> Option<f64> {
        (self.activity_count > 0).then(|| self.cost_eur / self.activity_count as f64)
    }
}

/// Group activities by month, newest month first.
///
/// Types are looked up regardless of status so hidden and purged types still
/// count; activities whose type is gone count with no contribution.
pub fn monthly_summaries(activities: &[Activity], types: &[ActivityType]) -> Vec<MonthlySummary> {
    let units: HashMap<&str, Unit> = types.iter().map(|t| (t.id.as_str(), t.unit)).collect();

    let mut months: BTreeMap<String, MonthlySummary> = BTreeMap::new();
    for activity in activities {
        let key = activity.month_key();
        months
            .entry(key.clone())
            .or_insert_with(|| MonthlySummary {
                month: key,
                ..Default::default()
            })
            .add(activity, units.get(activity.type_id.as_str()).copied());
    }

    months.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TypeStatus;
    use chrono::NaiveDate;

    fn make_type(id: &str, unit: Unit) -> ActivityType {
        ActivityType {
            id: id.to_string(),
            emoji: String::new(),
            name: id.to_string(),
            unit,
            status: TypeStatus::Active,
            created_at: String::new(),
        }
    }

    fn make_activity(id: &str, type_id: &str, value: f64, date: (i32, u32, u32)) -> Activity {
        Activity {
            id: id.to_string(),
            type_id: type_id.to_string(),
            value,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            user_id: "u1".to_string(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_cost() {
        assert!((cost_eur(10.0, Unit::Distance) - 1.5).abs() < 1e-9);
        assert!((cost_eur(60.0, Unit::Duration) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_groups_by_month_newest_first() {
        let types = vec![
            make_type("running", Unit::Distance),
            make_type("gym", Unit::Duration),
        ];
        let activities = vec![
            make_activity("a1", "running", 5.0, (2025, 2, 3)),
            make_activity("a2", "running", 10.0, (2025, 3, 1)),
            make_activity("a3", "gym", 60.0, (2025, 3, 14)),
        ];

        let summaries = monthly_summaries(&activities, &types);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].month, "2025-03");
        assert_eq!(summaries[0].activity_count, 2);
        assert_eq!(summaries[0].total_km, 10.0);
        assert_eq!(summaries[0].total_minutes, 60.0);
        assert!((summaries[0].cost_eur - 2.4).abs() < 1e-9);
        assert_eq!(summaries[0].avg_km(), Some(10.0));
        assert_eq!(summaries[1].month, "2025-02");
        assert_eq!(summaries[1].avg_minutes(), None);
    }

    #[test]
    fn test_unknown_type_counts_without_contribution() {
        let activities = vec![make_activity("a1", "t_old", 7.0, (2025, 1, 9))];
        let summaries = monthly_summaries(&activities, &[]);

        assert_eq!(summaries[0].activity_count, 1);
        assert_eq!(summaries[0].total_km, 0.0);
        assert_eq!(summaries[0].cost_eur, 0.0);
        assert_eq!(summaries[0].avg_cost_eur(), Some(0.0));
    }
}
