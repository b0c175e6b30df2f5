//! Sequence lifecycle DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::sequence::SequenceState;

/// Request to start a named sequence for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSequenceRequest {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub sequence: String,
    /// Optional input payload, merged into every task-triggered event.
    #[serde(default)]
    pub payload: Value,
}

/// Response to a successful sequence start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSequenceResponse {
    /// Causal-context identifier of the new run.
    pub context_id: Uuid,
}

/// Response to a control command (abort, pause, resume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub context_id: Uuid,
    /// State of the affected instances after the command.
    pub state: SequenceState,
}

/// Request to register or replace a project's pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutDefinitionRequest {
    /// JSON pipeline definition document.
    pub content: String,
}

/// Response carrying the stored definition's content version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutDefinitionResponse {
    pub version: String,
}
