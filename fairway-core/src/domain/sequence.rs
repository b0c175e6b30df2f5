//! Sequence instance domain types
//!
//! A sequence instance is one run of a named sequence within a stage,
//! identified by (causal-context identifier, stage, sequence name). Instances
//! are owned by the orchestrator's state store and mutated only through its
//! compare-and-swap transition primitive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::event::TaskResult;

/// Lifecycle state of a sequence instance.
///
/// `Finished`, `Aborted` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceState {
    /// Created; first task not yet dispatched or awaiting a queue slot.
    Triggered,
    /// At least one task dispatched.
    Started,
    /// Operator-paused; next dispatch withheld.
    Paused,
    /// All tasks completed and no further trigger fired.
    Finished,
    /// Operator-terminated.
    Aborted,
    /// No activity within the allowed window.
    TimedOut,
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Finished | SequenceState::Aborted | SequenceState::TimedOut
        )
    }

    /// Whether a state change from `self` to `to` is legal.
    ///
    /// Staying in the same state (record-only updates) is always allowed for
    /// non-terminal states.
    pub fn can_transition_to(&self, to: SequenceState) -> bool {
        if *self == to {
            return !self.is_terminal();
        }
        match self {
            SequenceState::Triggered => matches!(
                to,
                SequenceState::Started | SequenceState::Aborted | SequenceState::TimedOut
            ),
            SequenceState::Started => matches!(
                to,
                SequenceState::Paused
                    | SequenceState::Finished
                    | SequenceState::Aborted
                    | SequenceState::TimedOut
            ),
            SequenceState::Paused => {
                matches!(to, SequenceState::Started | SequenceState::Aborted)
            }
            SequenceState::Finished | SequenceState::Aborted | SequenceState::TimedOut => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceState::Triggered => "triggered",
            SequenceState::Started => "started",
            SequenceState::Paused => "paused",
            SequenceState::Finished => "finished",
            SequenceState::Aborted => "aborted",
            SequenceState::TimedOut => "timedout",
        }
    }
}

impl std::fmt::Display for SequenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (project, stage, service) tuple whose instances are serialized to one
/// active-at-a-time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub project: String,
    pub stage: String,
    pub service: String,
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.stage, self.service)
    }
}

/// Identity of one sequence instance.
///
/// One causal context may span several instances: cross-stage fan-out starts
/// a new instance in the target stage under the same context identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub context_id: Uuid,
    pub stage: String,
    pub sequence: String,
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}.{}", self.context_id, self.stage, self.sequence)
    }
}

/// Outcome of one task within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: String,
    /// Last event type observed for this task.
    pub latest_event_type: String,
    pub result: Option<TaskResult>,
}

/// Record of one task-triggered event the orchestrator emitted.
///
/// `started`/`finished` events must reference one of these via their
/// `triggered_id`; anything else is orphaned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub event_id: Uuid,
    pub task_index: usize,
    pub task: String,
    pub dispatched_at: chrono::DateTime<chrono::Utc>,
    pub started: bool,
    pub finished: bool,
}

/// A dispatch withheld by pause, replayed exactly once on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingDispatch {
    /// Dispatch the task at this index.
    Task(usize),
    /// Evaluate completion (trigger fan-out, then finish).
    Completion,
}

/// Live state of one sequence run within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceInstance {
    pub context_id: Uuid,
    pub project: String,
    pub service: String,
    pub stage: String,
    pub sequence: String,
    pub state: SequenceState,
    /// Index of the most recently dispatched task.
    pub current_task: usize,
    pub outcomes: Vec<TaskOutcome>,
    pub dispatches: Vec<DispatchRecord>,
    /// Identifiers of inbound events already processed, for duplicate
    /// delivery detection.
    pub seen_events: HashSet<Uuid>,
    pub pending: Option<PendingDispatch>,
    /// Payload the run was started with; merged into every triggered event.
    pub input: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last-activity timestamp, the reference point for the inactivity
    /// timeout.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SequenceInstance {
    pub fn new(
        context_id: Uuid,
        project: impl Into<String>,
        stage: impl Into<String>,
        service: impl Into<String>,
        sequence: impl Into<String>,
        input: Value,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            context_id,
            project: project.into(),
            service: service.into(),
            stage: stage.into(),
            sequence: sequence.into(),
            state: SequenceState::Triggered,
            current_task: 0,
            outcomes: Vec::new(),
            dispatches: Vec::new(),
            seen_events: HashSet::new(),
            pending: None,
            input,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            context_id: self.context_id,
            stage: self.stage.clone(),
            sequence: self.sequence.clone(),
        }
    }

    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            project: self.project.clone(),
            stage: self.stage.clone(),
            service: self.service.clone(),
        }
    }

    /// Finds the dispatch record a `started`/`finished` event refers to.
    pub fn dispatch_for(&self, triggered_id: Uuid) -> Option<&DispatchRecord> {
        self.dispatches.iter().find(|d| d.event_id == triggered_id)
    }

    pub fn dispatch_for_mut(&mut self, triggered_id: Uuid) -> Option<&mut DispatchRecord> {
        self.dispatches.iter_mut().find(|d| d.event_id == triggered_id)
    }

    /// Most recent dispatch still waiting for its `started` event, if any.
    pub fn awaiting_start(&self) -> Option<&DispatchRecord> {
        self.dispatches.iter().rev().find(|d| !d.started && !d.finished)
    }

    /// Result of the most recently finished task.
    pub fn latest_result(&self) -> Option<TaskResult> {
        self.outcomes.iter().rev().find_map(|o| o.result)
    }

    /// Aggregate result payload the trigger selectors are evaluated against.
    ///
    /// Shape: `{ "result": <last result>, "<task>": { "result": ... }, ... }`,
    /// so selectors can address both the overall outcome (`result: fail`) and
    /// a specific task (`mytask.result: fail`).
    pub fn result_summary(&self) -> Value {
        let mut summary = serde_json::Map::new();
        if let Some(result) = self.latest_result() {
            summary.insert("result".to_string(), Value::String(result.as_str().into()));
        }
        for outcome in &self.outcomes {
            if let Some(result) = outcome.result {
                summary.insert(
                    outcome.task.clone(),
                    serde_json::json!({ "result": result.as_str() }),
                );
            }
        }
        Value::Object(summary)
    }

    /// Resets the run for loop-back re-entry: fresh task history, same
    /// causal-context identifier.
    pub fn reset_for_reentry(&mut self) {
        self.current_task = 0;
        self.outcomes.clear();
        self.dispatches.clear();
        self.pending = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}
