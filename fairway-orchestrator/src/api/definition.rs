//! Pipeline definition API handler
//!
//! Registers a project's pipeline definition with the resource store. The
//! document is parsed and validated up front so authoring mistakes surface
//! here instead of blocking sequence starts later.

use axum::{
    Json,
    extract::{Path, State},
};
use fairway_core::domain::definition::PipelineDefinition;
use fairway_core::dto::sequence::{PutDefinitionRequest, PutDefinitionResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /project/{project}/definition
/// Store or replace a project's pipeline definition
pub async fn put_definition(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<PutDefinitionRequest>,
) -> ApiResult<Json<PutDefinitionResponse>> {
    tracing::info!("Storing pipeline definition for project {}", project);

    let definition: PipelineDefinition = serde_json::from_str(&req.content)
        .map_err(|e| ApiError::BadRequest(format!("pipeline definition unparsable: {}", e)))?;
    definition
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let version = state.resources.put_document(&project, &req.content);
    Ok(Json(PutDefinitionResponse { version }))
}
