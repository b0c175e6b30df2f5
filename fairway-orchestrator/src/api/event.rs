//! Event ingestion API handler
//!
//! Task executors report lifecycle events here. Delivery is at-least-once;
//! duplicates are absorbed by the dispatcher's idempotence rule.

use axum::{Json, extract::State, http::StatusCode};
use fairway_core::domain::event::Event;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /event
/// Ingest one lifecycle event from a task executor
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Ingesting event {} of type {}", event.id, event.event_type);

    state.dispatcher.handle_event(event).await?;
    Ok(StatusCode::ACCEPTED)
}
