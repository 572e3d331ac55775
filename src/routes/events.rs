// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live unread-notification query over Server-Sent Events.
//!
//! When the store can watch queries (Firestore), the stream is the store's
//! own listener on the caller's unread notifications, so writes made by any
//! server instance arrive. Otherwise the stream replays the caller's unread
//! set as `added` events, then forwards this process's hub events for the
//! caller. A notification created while the replay is read can arrive
//! twice; the client ledger absorbs that.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{ChangeEvent, Notification};
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Router,
};
use futures_util::{stream, Stream, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/notifications/stream", get(notification_stream))
}

fn to_sse(event: &ChangeEvent<Notification>) -> std::result::Result<Event, axum::Error> {
    Event::default()
        .event(event.kind.as_str())
        .id(event.id.clone())
        .json_data(event)
}

async fn notification_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let changes = match state.db.watch_unread_notifications(&user.user_id).await? {
        Some(watch) => {
            tracing::debug!(
                user_id = %user.user_id,
                "Notification stream opened on store listener"
            );
            watch
        }
        None => hub_changes(&state, user.user_id).await?,
    };

    let events = changes.map(|event| to_sse(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Unread replay followed by this process's hub events for `me`.
async fn hub_changes(
    state: &AppState,
    me: String,
) -> Result<stream::BoxStream<'static, ChangeEvent<Notification>>> {
    // Subscribe before reading so nothing falls between replay and live
    let live = BroadcastStream::new(state.hub.subscribe());
    let unread = state.db.list_unread_notifications(&me).await?;

    tracing::debug!(
        user_id = %me,
        unread = unread.len(),
        "Notification stream opened on hub"
    );

    let replay = stream::iter(
        unread
            .into_iter()
            .map(|n| ChangeEvent::added(n.id.clone(), n)),
    );

    let live = live.filter_map(move |item| {
        let keep = match item {
            Ok(event) if event.data.user_id == me => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = %me, skipped, "Notification stream lagged");
                None
            }
        };
        async move { keep }
    });

    Ok(replay.chain(live).boxed())
}
