//! Pipeline definition domain types
//!
//! A pipeline definition is the declarative description of a project's
//! delivery process: an ordered set of stages, each holding named sequences,
//! each holding an ordered list of tasks. A sequence may additionally declare
//! triggers: rules that start (or re-start) it when a matching sequence-level
//! `finished` event occurs. Trigger graphs may be cyclic; loop-until-pass is
//! a supported delivery pattern, not a defect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::selector::Selector;

/// Pipeline definition for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub stages: Vec<Stage>,
}

/// A stage groups the sequences deployable to one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub sequences: Vec<Sequence>,
}

/// Named, ordered list of tasks plus the triggers that start it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

/// A task is a name plus an opaque property bag.
///
/// Properties are passed through verbatim to the task's `triggered` event;
/// task behavior is entirely up to the external executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub properties: Value,
}

/// Rule that starts the owning sequence when a matching event occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Sequence-level event type this trigger reacts to,
    /// e.g. `dev.delivery.finished`.
    pub event: String,
    /// Optional result selector; an absent selector always matches.
    #[serde(default)]
    pub selector: Option<Selector>,
}

/// Structural validation failure of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    DuplicateStage(String),
    DuplicateSequence { stage: String, sequence: String },
    DuplicateTask { stage: String, sequence: String, task: String },
    EmptySequence { stage: String, sequence: String },
}

impl std::fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionError::DuplicateStage(stage) => {
                write!(f, "duplicate stage name: {}", stage)
            }
            DefinitionError::DuplicateSequence { stage, sequence } => {
                write!(f, "duplicate sequence name {} in stage {}", sequence, stage)
            }
            DefinitionError::DuplicateTask { stage, sequence, task } => {
                write!(
                    f,
                    "duplicate task name {} in sequence {}.{}",
                    task, stage, sequence
                )
            }
            DefinitionError::EmptySequence { stage, sequence } => {
                write!(f, "sequence {}.{} has no tasks", stage, sequence)
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

impl PipelineDefinition {
    /// Checks the structural invariants: stage names unique, sequence names
    /// unique within a stage, task names unique within a sequence, and every
    /// sequence has at least one task.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut stage_names = std::collections::HashSet::new();
        for stage in &self.stages {
            if !stage_names.insert(stage.name.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }

            let mut sequence_names = std::collections::HashSet::new();
            for sequence in &stage.sequences {
                if !sequence_names.insert(sequence.name.as_str()) {
                    return Err(DefinitionError::DuplicateSequence {
                        stage: stage.name.clone(),
                        sequence: sequence.name.clone(),
                    });
                }

                if sequence.tasks.is_empty() {
                    return Err(DefinitionError::EmptySequence {
                        stage: stage.name.clone(),
                        sequence: sequence.name.clone(),
                    });
                }

                let mut task_names = std::collections::HashSet::new();
                for task in &sequence.tasks {
                    if !task_names.insert(task.name.as_str()) {
                        return Err(DefinitionError::DuplicateTask {
                            stage: stage.name.clone(),
                            sequence: sequence.name.clone(),
                            task: task.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Looks up a sequence within a stage.
    pub fn sequence(&self, stage: &str, sequence: &str) -> Option<&Sequence> {
        self.stage(stage)?.sequences.iter().find(|s| s.name == sequence)
    }

    /// Iterates over every (stage, sequence, trigger) whose event pattern
    /// equals the given sequence-level event type.
    ///
    /// Definition order; the caller decides what matching means beyond the
    /// event pattern (selectors are evaluated against the result payload).
    pub fn triggers_for<'a>(
        &'a self,
        event_type: &'a str,
    ) -> impl Iterator<Item = (&'a Stage, &'a Sequence, &'a Trigger)> {
        self.stages.iter().flat_map(move |stage| {
            stage.sequences.iter().flat_map(move |sequence| {
                sequence
                    .triggers
                    .iter()
                    .filter(move |t| t.event == event_type)
                    .map(move |t| (stage, sequence, t))
            })
        })
    }
}

impl Sequence {
    /// Looks up a task by name together with its position.
    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(json: serde_json::Value) -> PipelineDefinition {
        serde_json::from_value(json).unwrap()
    }

    fn two_stage_definition() -> PipelineDefinition {
        definition(serde_json::json!({
            "stages": [
                {
                    "name": "dev",
                    "sequences": [
                        {
                            "name": "delivery",
                            "tasks": [{ "name": "deploy" }, { "name": "test" }]
                        }
                    ]
                },
                {
                    "name": "staging",
                    "sequences": [
                        {
                            "name": "delivery",
                            "tasks": [{ "name": "deploy" }],
                            "triggers": [
                                { "event": "dev.delivery.finished" }
                            ]
                        }
                    ]
                }
            ]
        }))
    }

    #[test]
    fn test_validate_accepts_well_formed_definition() {
        assert!(two_stage_definition().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_task() {
        let def = definition(serde_json::json!({
            "stages": [{
                "name": "dev",
                "sequences": [{
                    "name": "delivery",
                    "tasks": [{ "name": "deploy" }, { "name": "deploy" }]
                }]
            }]
        }));
        assert_eq!(
            def.validate(),
            Err(DefinitionError::DuplicateTask {
                stage: "dev".to_string(),
                sequence: "delivery".to_string(),
                task: "deploy".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_sequence() {
        let def = definition(serde_json::json!({
            "stages": [{
                "name": "dev",
                "sequences": [
                    { "name": "delivery", "tasks": [{ "name": "a" }] },
                    { "name": "delivery", "tasks": [{ "name": "b" }] }
                ]
            }]
        }));
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::DuplicateSequence { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_sequence() {
        let def = definition(serde_json::json!({
            "stages": [{
                "name": "dev",
                "sequences": [{ "name": "delivery", "tasks": [] }]
            }]
        }));
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::EmptySequence { .. })
        ));
    }

    #[test]
    fn test_lookup_and_triggers() {
        let def = two_stage_definition();
        assert!(def.sequence("dev", "delivery").is_some());
        assert!(def.sequence("dev", "rollback").is_none());
        assert!(def.sequence("prod", "delivery").is_none());

        let matches: Vec<_> = def.triggers_for("dev.delivery.finished").collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0.name, "staging");
        assert_eq!(matches[0].1.name, "delivery");

        assert_eq!(def.triggers_for("prod.delivery.finished").count(), 0);
    }

    #[test]
    fn test_task_properties_preserved() {
        let def = definition(serde_json::json!({
            "stages": [{
                "name": "dev",
                "sequences": [{
                    "name": "delivery",
                    "tasks": [{
                        "name": "deploy",
                        "properties": { "strategy": "blue_green", "replicas": 3 }
                    }]
                }]
            }]
        }));
        let task = &def.sequence("dev", "delivery").unwrap().tasks[0];
        assert_eq!(task.properties["strategy"], "blue_green");
        assert_eq!(task.properties["replicas"], 3);
    }
}
