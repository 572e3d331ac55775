// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::activity::validate_value;
use crate::models::activity_type::picker_types;
use crate::models::notification::FALLBACK_TYPE_NAME;
use crate::models::{
    Activity, ActivityType, ChangeEvent, MonthlySummary, Notification, ProfileUpdate, TypeAction,
    TypeStatus, Unit, User,
};
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me).patch(update_me))
        .route("/api/me/push-token", put(set_push_token))
        .route("/api/users", get(list_users))
        .route(
            "/api/activity-types",
            get(list_activity_types).post(create_activity_type),
        )
        .route("/api/activity-types/{id}", patch(update_activity_type))
        .route(
            "/api/activity-types/{id}/{action}",
            post(change_activity_type_status),
        )
        .route("/api/activities", get(list_activities).post(create_activity))
        .route(
            "/api/activities/{id}",
            put(update_activity).delete(delete_activity),
        )
        .route("/api/summaries/monthly", get(monthly_summaries))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
}

/// `?user=all|<id>` filter shared by activity listings.
#[derive(Deserialize)]
struct UserFilterQuery {
    user: Option<String>,
}

impl UserFilterQuery {
    fn user_id(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty() && *u != "all")
    }
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub push_enabled: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let push_enabled = user.push_token().is_some();
        Self {
            id: user.id,
            display_name: user.display_name,
            email: user.email,
            avatar_url: user.avatar_url,
            push_enabled,
        }
    }
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = state
        .db
        .get_user(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))?;

    Ok(Json(profile.into()))
}

#[derive(Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 50))]
    pub display_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
}

/// Create or update the current user's profile.
///
/// Only the submitted fields are written, so a push token registered
/// concurrently by another session survives.
async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>> {
    req.validate()?;

    let is_new = state.db.get_user(&user.user_id).await?.is_none();
    let update = ProfileUpdate {
        display_name: req.display_name.map(|name| name.trim().to_string()),
        email: req.email,
        avatar_url: req.avatar_url,
        created_at: is_new.then(now_rfc3339),
    };

    let profile = state.db.update_profile(&user.user_id, &update).await?;
    tracing::info!(user_id = %user.user_id, created = is_new, "Profile updated");

    Ok(Json(profile.into()))
}

#[derive(Deserialize, Validate)]
pub struct PushTokenRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
}

/// Store the push delivery token obtained by the client, replacing any
/// previous one.
async fn set_push_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PushTokenRequest>,
) -> Result<StatusCode> {
    req.validate()?;
    state.db.set_push_token(&user.user_id, &req.token).await?;
    tracing::debug!(user_id = %user.user_id, "Push token registered");
    Ok(StatusCode::NO_CONTENT)
}

/// Directory entry visible to other users.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// List all users (for the per-user filter).
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<UserSummary>>> {
    let users = state.db.list_users().await?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| UserSummary {
                name: u.public_name().unwrap_or(&u.id).to_string(),
                id: u.id,
                avatar_url: u.avatar_url,
            })
            .collect(),
    ))
}

// ─── Activity Types ──────────────────────────────────────────

#[derive(Deserialize)]
struct ActivityTypesQuery {
    /// Only types selectable in the activity picker
    #[serde(default)]
    picker: bool,
    /// Type of the activity being edited (stays selectable while hidden)
    current: Option<String>,
}

/// List activity types. Purged types are never listed.
async fn list_activity_types(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityTypesQuery>,
) -> Result<Json<Vec<ActivityType>>> {
    let types = state.db.list_activity_types().await?;

    let listed: Vec<ActivityType> = if params.picker {
        picker_types(&types, params.current.as_deref())
            .into_iter()
            .cloned()
            .collect()
    } else {
        types.into_iter().filter(ActivityType::is_listed).collect()
    };

    Ok(Json(listed))
}

#[derive(Deserialize, Validate)]
pub struct CreateActivityTypeRequest {
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    #[validate(length(min = 1, max = 16))]
    pub emoji: String,
    pub unit: Unit,
}

async fn create_activity_type(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateActivityTypeRequest>,
) -> Result<(StatusCode, Json<ActivityType>)> {
    req.validate()?;

    let activity_type = ActivityType {
        id: uuid::Uuid::new_v4().to_string(),
        emoji: req.emoji,
        name: req.name.trim().to_string(),
        unit: req.unit,
        status: TypeStatus::Active,
        created_at: now_rfc3339(),
    };
    state.db.set_activity_type(&activity_type).await?;

    tracing::info!(
        user_id = %user.user_id,
        type_id = %activity_type.id,
        name = %activity_type.name,
        "Activity type created"
    );
    Ok((StatusCode::CREATED, Json(activity_type)))
}

#[derive(Deserialize, Validate)]
pub struct UpdateActivityTypeRequest {
    #[validate(length(min = 1, max = 40))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub emoji: Option<String>,
    pub unit: Option<Unit>,
}

/// Fetch a type that is still listed (not purged).
async fn load_listed_type(state: &AppState, type_id: &str) -> Result<ActivityType> {
    state
        .db
        .get_activity_type(type_id)
        .await?
        .filter(ActivityType::is_listed)
        .ok_or_else(|| AppError::NotFound(format!("Activity type {} not found", type_id)))
}

/// Edit name, emoji or unit. The unit is frozen once any activity uses the type.
async fn update_activity_type(
    State(state): State<Arc<AppState>>,
    Path(type_id): Path<String>,
    Json(req): Json<UpdateActivityTypeRequest>,
) -> Result<Json<ActivityType>> {
    req.validate()?;
    let mut activity_type = load_listed_type(&state, &type_id).await?;

    if let Some(unit) = req.unit {
        if unit != activity_type.unit && state.db.activity_type_in_use(&type_id).await? {
            return Err(AppError::Conflict(format!(
                "Unit of activity type {} cannot change while activities use it",
                type_id
            )));
        }
        activity_type.unit = unit;
    }
    if let Some(name) = req.name {
        activity_type.name = name.trim().to_string();
    }
    if let Some(emoji) = req.emoji {
        activity_type.emoji = emoji;
    }

    state.db.set_activity_type(&activity_type).await?;
    Ok(Json(activity_type))
}

/// Hide, restore or purge a type.
async fn change_activity_type_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((type_id, action)): Path<(String, String)>,
) -> Result<Json<ActivityType>> {
    let action: TypeAction = action.parse().map_err(AppError::BadRequest)?;
    let mut activity_type = load_listed_type(&state, &type_id).await?;

    activity_type.status = activity_type
        .status
        .apply(action)
        .map_err(|e| AppError::Conflict(e.to_string()))?;
    state.db.set_activity_type(&activity_type).await?;

    tracing::info!(
        user_id = %user.user_id,
        type_id = %type_id,
        status = ?activity_type.status,
        "Activity type status changed"
    );
    Ok(Json(activity_type))
}

// ─── Activities ──────────────────────────────────────────────

/// Activity with its type resolved for display.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActivityResponse {
    pub id: String,
    pub type_id: String,
    /// Placeholder when the type is purged or missing
    pub type_name: String,
    pub emoji: String,
    pub unit_label: String,
    pub value: f64,
    pub date: String,
    pub user_id: String,
    pub created_at: String,
}

impl ActivityResponse {
    fn new(activity: Activity, types: &HashMap<String, ActivityType>) -> Self {
        let activity_type = types.get(&activity.type_id).filter(|t| t.is_listed());
        Self {
            type_name: activity_type
                .map(|t| t.name.clone())
                .unwrap_or_else(|| FALLBACK_TYPE_NAME.to_string()),
            emoji: activity_type.map(|t| t.emoji.clone()).unwrap_or_default(),
            unit_label: activity_type
                .map(|t| t.unit.label().to_string())
                .unwrap_or_default(),
            date: activity.date.to_string(),
            id: activity.id,
            type_id: activity.type_id,
            value: activity.value,
            user_id: activity.user_id,
            created_at: activity.created_at,
        }
    }
}

async fn types_by_id(state: &AppState) -> Result<HashMap<String, ActivityType>> {
    Ok(state
        .db
        .list_activity_types()
        .await?
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect())
}

/// List activities, newest date first.
async fn list_activities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserFilterQuery>,
) -> Result<Json<Vec<ActivityResponse>>> {
    let (activities, types) = tokio::try_join!(
        state.db.list_activities(params.user_id()),
        types_by_id(&state)
    )?;

    Ok(Json(
        activities
            .into_iter()
            .map(|a| ActivityResponse::new(a, &types))
            .collect(),
    ))
}

#[derive(Deserialize, Validate)]
pub struct ActivityRequest {
    #[validate(length(min = 1))]
    pub type_id: String,
    pub value: f64,
    pub date: NaiveDate,
}

/// Ensure the chosen type may be used. `current` is the activity's
/// existing type when editing.
async fn check_selectable(
    state: &AppState,
    type_id: &str,
    current: Option<&str>,
) -> Result<ActivityType> {
    let activity_type = state
        .db
        .get_activity_type(type_id)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown activity type {}", type_id)))?;

    if !activity_type.is_selectable(current) {
        return Err(AppError::BadRequest(format!(
            "Activity type {} is not available",
            type_id
        )));
    }
    Ok(activity_type)
}

/// Record a new activity and trigger its fan-out.
async fn create_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ActivityRequest>,
) -> Result<(StatusCode, Json<ActivityResponse>)> {
    req.validate()?;
    validate_value(req.value).map_err(AppError::BadRequest)?;
    let activity_type = check_selectable(&state, &req.type_id, None).await?;

    let activity = Activity {
        id: uuid::Uuid::new_v4().to_string(),
        type_id: req.type_id,
        value: req.value,
        date: req.date,
        user_id: user.user_id.clone(),
        created_at: now_rfc3339(),
    };
    state.db.create_activity(&activity).await?;

    tracing::info!(
        user_id = %user.user_id,
        activity_id = %activity.id,
        type_id = %activity.type_id,
        "Activity created"
    );

    state.trigger_fan_out(&activity).await;

    let types = HashMap::from([(activity_type.id.clone(), activity_type)]);
    Ok((StatusCode::CREATED, Json(ActivityResponse::new(activity, &types))))
}

/// Load an activity owned by the caller.
async fn load_own_activity(state: &AppState, user: &AuthUser, activity_id: &str) -> Result<Activity> {
    let activity = state
        .db
        .get_activity(activity_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Activity {} not found", activity_id)))?;

    if activity.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Only the owner may change an activity".to_string(),
        ));
    }
    Ok(activity)
}

/// Edit an own activity. Edits never notify other users.
async fn update_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(activity_id): Path<String>,
    Json(req): Json<ActivityRequest>,
) -> Result<Json<ActivityResponse>> {
    req.validate()?;
    validate_value(req.value).map_err(AppError::BadRequest)?;

    let mut activity = load_own_activity(&state, &user, &activity_id).await?;
    let activity_type = check_selectable(&state, &req.type_id, Some(&activity.type_id)).await?;

    activity.type_id = req.type_id;
    activity.value = req.value;
    activity.date = req.date;
    state.db.update_activity(&activity).await?;

    let types = HashMap::from([(activity_type.id.clone(), activity_type)]);
    Ok(Json(ActivityResponse::new(activity, &types)))
}

async fn delete_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(activity_id): Path<String>,
) -> Result<StatusCode> {
    load_own_activity(&state, &user, &activity_id).await?;
    state.db.delete_activity(&activity_id).await?;

    tracing::info!(user_id = %user.user_id, activity_id = %activity_id, "Activity deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Monthly Summaries ───────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MonthlySummaryResponse {
    #[serde(flatten)]
    pub summary: MonthlySummary,
    pub avg_km: Option<f64>,
    pub avg_minutes: Option<f64>,
    pub avg_cost_eur: Option<f64>,
}

async fn monthly_summaries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserFilterQuery>,
) -> Result<Json<Vec<MonthlySummaryResponse>>> {
    let (activities, types) = tokio::try_join!(
        state.db.list_activities(params.user_id()),
        state.db.list_activity_types()
    )?;

    Ok(Json(
        crate::models::summary::monthly_summaries(&activities, &types)
            .into_iter()
            .map(|summary| MonthlySummaryResponse {
                avg_km: summary.avg_km(),
                avg_minutes: summary.avg_minutes(),
                avg_cost_eur: summary.avg_cost_eur(),
                summary,
            })
            .collect(),
    ))
}

// ─── Notifications ───────────────────────────────────────────

#[derive(Serialize)]
pub struct NotificationResponse {
    #[serde(flatten)]
    pub notification: Notification,
    pub body: String,
}

/// Unread notifications of the caller, newest first.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<NotificationResponse>>> {
    let unread = state.db.list_unread_notifications(&user.user_id).await?;
    Ok(Json(
        unread
            .into_iter()
            .map(|notification| NotificationResponse {
                body: notification.body(),
                notification,
            })
            .collect(),
    ))
}

/// Mark one of the caller's notifications as read.
async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(notification_id): Path<String>,
) -> Result<StatusCode> {
    let mut notification = state
        .db
        .get_notification(&notification_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", notification_id)))?;

    if notification.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Notification belongs to another user".to_string(),
        ));
    }

    if !notification.read {
        state.db.mark_notification_read(&notification_id).await?;
        notification.read = true;
        // Leaves the unread live query
        state
            .hub
            .publish(ChangeEvent::removed(notification_id, notification));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_filter() {
        let all = UserFilterQuery {
            user: Some("all".to_string()),
        };
        let none = UserFilterQuery { user: None };
        let one = UserFilterQuery {
            user: Some("u2".to_string()),
        };
        assert_eq!(all.user_id(), None);
        assert_eq!(none.user_id(), None);
        assert_eq!(one.user_id(), Some("u2"));
    }

    #[test]
    fn test_purged_type_renders_placeholder() {
        let activity = Activity {
            id: "a1".to_string(),
            type_id: "t_old".to_string(),
            value: 3.0,
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            user_id: "u1".to_string(),
            created_at: String::new(),
        };
        let purged = ActivityType {
            id: "t_old".to_string(),
            emoji: "🚣".to_string(),
            name: "Rudern".to_string(),
            unit: Unit::Distance,
            status: TypeStatus::Purged,
            created_at: String::new(),
        };
        let types = HashMap::from([(purged.id.clone(), purged)]);

        let response = ActivityResponse::new(activity, &types);
        assert_eq!(response.type_name, FALLBACK_TYPE_NAME);
        assert_eq!(response.emoji, "");
        assert_eq!(response.date, "2025-03-14");
    }
}
