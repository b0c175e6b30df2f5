//! Event correlation model
//!
//! Events are the only way the orchestrator learns about the outside world.
//! Every event belonging to one sequence run shares a causal-context
//! identifier, and every `started`/`finished` event points back at the
//! `triggered` event that caused it via `triggered_id`.
//!
//! Event types are strings of one of two shapes:
//! - `<stage>.<sequence>.<phase>` (sequence-level)
//! - `<stage>.<sequence>.<task>.<phase>` (task-level)
//!
//! where `<phase>` is `triggered`, `started` or `finished`. Anything else is
//! malformed. Classification happens once, up front, into a closed set of
//! variants; handlers switch over the variant instead of inspecting type
//! strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle phase segment of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Triggered,
    Started,
    Finished,
}

impl EventPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPhase::Triggered => "triggered",
            EventPhase::Started => "started",
            EventPhase::Finished => "finished",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "triggered" => Some(EventPhase::Triggered),
            "started" => Some(EventPhase::Started),
            "finished" => Some(EventPhase::Finished),
            _ => None,
        }
    }
}

/// Result reported by a task executor in a `finished` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Pass,
    Warning,
    Fail,
}

impl TaskResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResult::Pass => "pass",
            TaskResult::Warning => "warning",
            TaskResult::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(TaskResult::Pass),
            "warning" => Some(TaskResult::Warning),
            "fail" => Some(TaskResult::Fail),
            _ => None,
        }
    }
}

/// Event envelope exchanged between the orchestrator and task executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event identifier.
    pub id: Uuid,
    /// Causal-context identifier shared by every event of one sequence run.
    pub context_id: Uuid,
    /// Back-reference to the `triggered` event that caused this one.
    pub triggered_id: Option<Uuid>,
    /// Type string, e.g. `dev.delivery.mytask.finished`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Identifier of the emitting component.
    pub source: String,
    pub time: chrono::DateTime<chrono::Utc>,
    /// Opaque payload; carries a `result` field once finished.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Creates a new event with a fresh identifier and the current time.
    pub fn new(
        event_type: impl Into<String>,
        context_id: Uuid,
        triggered_id: Option<Uuid>,
        source: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_id,
            triggered_id,
            event_type: event_type.into(),
            source: source.into(),
            time: chrono::Utc::now(),
            data,
        }
    }

    /// Extracts the `result` field from the payload, if present and valid.
    pub fn result(&self) -> Option<TaskResult> {
        self.data
            .get("result")
            .and_then(Value::as_str)
            .and_then(TaskResult::parse)
    }
}

/// Classified form of an inbound event type.
///
/// The orchestrator only ever reacts to the first three variants. Well-formed
/// types it does not consume (task-level `triggered` and sequence-level
/// `started`/`finished`, both emitted by the orchestrator itself) classify
/// as `Unrecognized` and are ignored by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    SequenceTriggered {
        stage: String,
        sequence: String,
    },
    TaskStarted {
        stage: String,
        sequence: String,
        task: String,
    },
    TaskFinished {
        stage: String,
        sequence: String,
        task: String,
    },
    Unrecognized,
}

/// Error for type strings matching neither permitted shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEventType(pub String);

impl std::fmt::Display for MalformedEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed event type: {}", self.0)
    }
}

impl std::error::Error for MalformedEventType {}

/// Classifies an event type string.
///
/// Pure function: same input, same verdict, no side effects.
pub fn classify(event_type: &str) -> Result<EventClass, MalformedEventType> {
    let segments: Vec<&str> = event_type.split('.').collect();

    if segments.iter().any(|s| s.is_empty()) {
        return Err(MalformedEventType(event_type.to_string()));
    }

    let phase = segments
        .last()
        .and_then(|s| EventPhase::parse(s))
        .ok_or_else(|| MalformedEventType(event_type.to_string()))?;

    match (segments.len(), phase) {
        (3, EventPhase::Triggered) => Ok(EventClass::SequenceTriggered {
            stage: segments[0].to_string(),
            sequence: segments[1].to_string(),
        }),
        (3, _) => Ok(EventClass::Unrecognized),
        (4, EventPhase::Started) => Ok(EventClass::TaskStarted {
            stage: segments[0].to_string(),
            sequence: segments[1].to_string(),
            task: segments[2].to_string(),
        }),
        (4, EventPhase::Finished) => Ok(EventClass::TaskFinished {
            stage: segments[0].to_string(),
            sequence: segments[1].to_string(),
            task: segments[2].to_string(),
        }),
        (4, EventPhase::Triggered) => Ok(EventClass::Unrecognized),
        _ => Err(MalformedEventType(event_type.to_string())),
    }
}

/// Synthesizes a sequence-level event type, e.g. `dev.delivery.finished`.
pub fn sequence_event_type(stage: &str, sequence: &str, phase: EventPhase) -> String {
    format!("{}.{}.{}", stage, sequence, phase.as_str())
}

/// Synthesizes a task-level event type, e.g. `dev.delivery.mytask.triggered`.
pub fn task_event_type(stage: &str, sequence: &str, task: &str, phase: EventPhase) -> String {
    format!("{}.{}.{}.{}", stage, sequence, task, phase.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sequence_triggered() {
        let class = classify("dev.delivery.triggered").unwrap();
        assert_eq!(
            class,
            EventClass::SequenceTriggered {
                stage: "dev".to_string(),
                sequence: "delivery".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_task_events() {
        let class = classify("dev.delivery.mytask.started").unwrap();
        assert_eq!(
            class,
            EventClass::TaskStarted {
                stage: "dev".to_string(),
                sequence: "delivery".to_string(),
                task: "mytask".to_string(),
            }
        );

        let class = classify("dev.delivery.mytask.finished").unwrap();
        assert_eq!(
            class,
            EventClass::TaskFinished {
                stage: "dev".to_string(),
                sequence: "delivery".to_string(),
                task: "mytask".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_emitted_only_types_as_unrecognized() {
        // The orchestrator emits these but never reacts to them.
        assert_eq!(
            classify("dev.delivery.finished").unwrap(),
            EventClass::Unrecognized
        );
        assert_eq!(
            classify("dev.delivery.started").unwrap(),
            EventClass::Unrecognized
        );
        assert_eq!(
            classify("dev.delivery.mytask.triggered").unwrap(),
            EventClass::Unrecognized
        );
    }

    #[test]
    fn test_classify_malformed() {
        assert!(classify("delivery.finished").is_err());
        assert!(classify("dev.delivery.mytask.extra.finished").is_err());
        assert!(classify("dev.delivery.done").is_err());
        assert!(classify("dev..finished").is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn test_type_synthesis() {
        assert_eq!(
            sequence_event_type("dev", "delivery", EventPhase::Finished),
            "dev.delivery.finished"
        );
        assert_eq!(
            task_event_type("dev", "delivery", "mytask", EventPhase::Triggered),
            "dev.delivery.mytask.triggered"
        );
    }

    #[test]
    fn test_synthesis_round_trips_through_classify() {
        let t = task_event_type("staging", "rollout", "deploy", EventPhase::Finished);
        assert_eq!(
            classify(&t).unwrap(),
            EventClass::TaskFinished {
                stage: "staging".to_string(),
                sequence: "rollout".to_string(),
                task: "deploy".to_string(),
            }
        );
    }

    #[test]
    fn test_event_result_extraction() {
        let event = Event::new(
            "dev.delivery.mytask.finished",
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            "test-executor",
            serde_json::json!({ "result": "fail" }),
        );
        assert_eq!(event.result(), Some(TaskResult::Fail));

        let event = Event::new(
            "dev.delivery.mytask.started",
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            "test-executor",
            serde_json::json!({}),
        );
        assert_eq!(event.result(), None);
    }
}
