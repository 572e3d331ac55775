// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and CORS tests.
//!
//! These tests verify that:
//! 1. Protected routes reject requests without valid tokens
//! 2. Protected routes accept a bearer token or the session cookie
//! 3. CORS preflight requests return correct headers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;
use walkrun_tracker::db::Store;

mod common;

#[tokio::test]
async fn test_protected_route_without_token() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/activities")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_route_with_wrong_key() {
    let app = common::create_test_app().await;
    let token = common::create_test_jwt("u1", b"some_other_key_with_enough_bytes");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/activities")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
        iat: usize,
    }

    let app = common::create_test_app().await;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;
    let token = encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: "u1".to_string(),
            exp: now - 3600,
            iat: now - 7200,
        },
        &EncodingKey::from_secret(&app.state.config.jwt_signing_key),
    )
    .unwrap();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/activities")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_route_with_bearer_token() {
    let app = common::create_test_app().await;

    let (status, body) = app.request("GET", "/api/activities", "u1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_protected_route_with_session_cookie() {
    let app = common::create_test_app().await;
    let token = common::create_test_jwt("u1", &app.state.config.jwt_signing_key);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/activity-types")
                .header(header::COOKIE, format!("session={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/activities")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // OPTIONS should return 200 (CORS preflight success)
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

#[tokio::test]
async fn test_public_route_no_auth_required() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Health should be accessible without auth
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_profile_created_on_first_update() {
    let app = common::create_test_app().await;

    let (status, _) = app.request("GET", "/api/me", "u9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .request(
            "PATCH",
            "/api/me",
            "u9",
            Some(serde_json::json!({ "display_name": "Nina" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Nina");
    assert_eq!(body["push_enabled"], false);

    let (status, _) = app
        .request(
            "PATCH",
            "/api/me",
            "u9",
            Some(serde_json::json!({ "avatar_url": "not a url" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_push_token_write_back() {
    let app = common::create_test_app().await;
    common::add_user(&app.db, "u2", "Ben", Some("old")).await;

    let (status, _) = app
        .request(
            "PUT",
            "/api/me/push-token",
            "u2",
            Some(serde_json::json!({ "token": "new" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, me) = app.request("GET", "/api/me", "u2", None).await;
    assert_eq!(me["display_name"], "Ben");
    assert_eq!(me["push_enabled"], true);

    let (status, _) = app
        .request(
            "PUT",
            "/api/me/push-token",
            "u2",
            Some(serde_json::json!({ "token": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_edit_keeps_concurrent_push_token() {
    let app = common::create_test_app().await;
    common::add_user(&app.db, "u2", "Ben", None).await;

    // A profile editor read the user before the token was registered
    let (_, stale) = app.request("GET", "/api/me", "u2", None).await;
    assert_eq!(stale["push_enabled"], false);

    let (status, _) = app
        .request(
            "PUT",
            "/api/me/push-token",
            "u2",
            Some(serde_json::json!({ "token": "fresh" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .request(
            "PATCH",
            "/api/me",
            "u2",
            Some(serde_json::json!({
                "display_name": stale["display_name"],
                "email": "ben@example.com",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["push_enabled"], true);
    assert_eq!(body["email"], "ben@example.com");

    let stored = app.db.get_user("u2").await.unwrap().unwrap();
    assert_eq!(stored.push_token.as_deref(), Some("fresh"));
    assert_eq!(stored.display_name.as_deref(), Some("Ben"));
}
