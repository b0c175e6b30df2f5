//! Sequence lifecycle API handlers
//!
//! HTTP endpoints for starting sequences and applying operator control
//! commands against running contexts.

use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use fairway_core::dto::sequence::{
    ControlResponse, TriggerSequenceRequest, TriggerSequenceResponse,
};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /sequence/trigger
/// Start a named sequence for a service
pub async fn trigger_sequence(
    State(state): State<AppState>,
    Json(req): Json<TriggerSequenceRequest>,
) -> ApiResult<Json<TriggerSequenceResponse>> {
    tracing::info!(
        "Trigger request: sequence {}.{} for {}/{}",
        req.stage,
        req.sequence,
        req.project,
        req.service
    );

    let context_id = state.dispatcher.trigger_sequence(&req).await?;
    Ok(Json(TriggerSequenceResponse { context_id }))
}

/// POST /sequence/{context_id}/abort
/// Abort every live instance of a context
pub async fn abort_sequence(
    State(state): State<AppState>,
    Path(context_id): Path<Uuid>,
) -> ApiResult<Json<ControlResponse>> {
    tracing::info!("Abort request for context {}", context_id);

    let new_state = state.control.abort(context_id).await?;
    Ok(Json(ControlResponse {
        context_id,
        state: new_state,
    }))
}

/// POST /sequence/{context_id}/pause
/// Pause the context's running instances
pub async fn pause_sequence(
    State(state): State<AppState>,
    Path(context_id): Path<Uuid>,
) -> ApiResult<Json<ControlResponse>> {
    tracing::info!("Pause request for context {}", context_id);

    let new_state = state.control.pause(context_id).await?;
    Ok(Json(ControlResponse {
        context_id,
        state: new_state,
    }))
}

/// POST /sequence/{context_id}/resume
/// Resume the context's paused instances
pub async fn resume_sequence(
    State(state): State<AppState>,
    Path(context_id): Path<Uuid>,
) -> ApiResult<Json<ControlResponse>> {
    tracing::info!("Resume request for context {}", context_id);

    let new_state = state.control.resume(context_id).await?;
    Ok(Json(ControlResponse {
        context_id,
        state: new_state,
    }))
}
