//! Sequence state inspection DTOs
//!
//! Response shapes of the paginated `GET /sequence/state` endpoint. One state
//! item summarizes a whole causal context, which may span several stages when
//! triggers fan out across them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::TaskResult;
use crate::domain::sequence::SequenceState;

/// Paginated listing of sequence states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStates {
    pub states: Vec<SequenceStateItem>,
    /// Total number of matching contexts, across all pages.
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    /// Opaque cursor for the next page; omitted on the last page.
    #[serde(rename = "nextPageKey", skip_serializing_if = "Option::is_none")]
    pub next_page_key: Option<String>,
}

/// Summary of one sequence run (one causal context).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStateItem {
    pub project: String,
    pub service: String,
    pub sequence: String,
    pub context_id: Uuid,
    pub state: SequenceState,
    pub stages: Vec<StageStateSummary>,
}

/// Latest observed activity within one stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStateSummary {
    pub name: String,
    #[serde(rename = "latestEvent", skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<LatestEventSummary>,
}

/// Type and result of the most recent event observed in a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestEventSummary {
    #[serde(rename = "type")]
    pub event_type: String,
    pub result: Option<TaskResult>,
}
