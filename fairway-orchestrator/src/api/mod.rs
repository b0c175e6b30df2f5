//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod definition;
pub mod error;
pub mod event;
pub mod health;
pub mod sequence;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::control::ControlProcessor;
use crate::dispatcher::Dispatcher;
use crate::resolver::InMemoryResourceStore;
use crate::store::StateStore;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub control: Arc<ControlProcessor>,
    pub store: Arc<StateStore>,
    pub resources: Arc<InMemoryResourceStore>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Event ingestion
        .route("/event", post(event::ingest_event))
        // Sequence endpoints
        .route("/sequence/trigger", post(sequence::trigger_sequence))
        .route("/sequence/state", get(state::get_states))
        .route("/sequence/{context_id}/abort", post(sequence::abort_sequence))
        .route("/sequence/{context_id}/pause", post(sequence::pause_sequence))
        .route(
            "/sequence/{context_id}/resume",
            post(sequence::resume_sequence),
        )
        // Pipeline definition endpoints
        .route(
            "/project/{project}/definition",
            post(definition::put_definition),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
