//! Sequence dispatcher
//!
//! The state machine driver: consumes inbound lifecycle events, advances or
//! loops sequences, emits the next task's `triggered` event, evaluates
//! trigger fan-out, and releases execution-context slots on terminal
//! transitions.
//!
//! Every state change is one compare-and-swap against the state store.
//! Concurrent deliveries for the same instance race safely: the loser of a
//! CAS re-reads and re-evaluates. Nothing in the event-consumption path may
//! terminate the process; malformed and orphaned events are logged and
//! dropped.

use std::sync::Arc;
use uuid::Uuid;

use fairway_core::domain::event::{
    self, Event, EventClass, EventPhase, MalformedEventType, TaskResult,
};
use fairway_core::domain::sequence::{
    DispatchRecord, InstanceKey, PendingDispatch, SequenceInstance, SequenceState, TaskOutcome,
};
use fairway_core::dto::sequence::TriggerSequenceRequest;
use serde_json::Value;

use crate::bus::{EventSender, PublishError};
use crate::queue::{Admission, SequenceQueue};
use crate::resolver::{DefinitionResolver, ResolveError};
use crate::store::{StateStore, StoreError};

/// Source identifier stamped on every event the orchestrator emits.
const EVENT_SOURCE: &str = "fairway-orchestrator";

/// Upper bound on CAS re-read/re-evaluate attempts per event.
const CAS_RETRIES: usize = 8;

/// Errors from dispatcher operations.
///
/// Orphaned, duplicated and unrecognized events are not errors; they are
/// dropped with a log record and the operation reports success.
#[derive(Debug)]
pub enum DispatchError {
    Malformed(MalformedEventType),
    SequenceNotFound {
        project: String,
        stage: String,
        sequence: String,
    },
    Definition(ResolveError),
    Store(StoreError),
    Transport(PublishError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Malformed(e) => e.fmt(f),
            DispatchError::SequenceNotFound { project, stage, sequence } => {
                write!(f, "sequence {}.{} not found in project {}", stage, sequence, project)
            }
            DispatchError::Definition(e) => e.fmt(f),
            DispatchError::Store(e) => e.fmt(f),
            DispatchError::Transport(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ResolveError> for DispatchError {
    fn from(err: ResolveError) -> Self {
        DispatchError::Definition(err)
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::Store(err)
    }
}

impl From<PublishError> for DispatchError {
    fn from(err: PublishError) -> Self {
        DispatchError::Transport(err)
    }
}

/// The sequence execution engine.
///
/// Constructed once at startup with its collaborators injected by handle.
pub struct Dispatcher {
    store: Arc<StateStore>,
    queue: Arc<SequenceQueue>,
    resolver: Arc<DefinitionResolver>,
    sender: Arc<dyn EventSender>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<SequenceQueue>,
        resolver: Arc<DefinitionResolver>,
        sender: Arc<dyn EventSender>,
    ) -> Self {
        Self {
            store,
            queue,
            resolver,
            sender,
        }
    }

    // =========================================================================
    // Start-sequence path
    // =========================================================================

    /// Starts a new run of a named sequence, returning its causal-context
    /// identifier.
    pub async fn trigger_sequence(
        &self,
        req: &TriggerSequenceRequest,
    ) -> Result<Uuid, DispatchError> {
        let context_id = Uuid::new_v4();
        self.start_sequence(
            context_id,
            &req.project,
            &req.stage,
            &req.service,
            &req.sequence,
            req.payload.clone(),
        )
        .await?;
        Ok(context_id)
    }

    /// Creates a sequence instance and dispatches its first task, or enqueues
    /// it when the execution context is busy.
    async fn start_sequence(
        &self,
        context_id: Uuid,
        project: &str,
        stage: &str,
        service: &str,
        sequence: &str,
        payload: Value,
    ) -> Result<(), DispatchError> {
        // A sequence must never start against a definition that failed to
        // parse; resolution errors propagate to the requester.
        let definition = self.resolver.resolve(project, None).await?;
        if definition.sequence(stage, sequence).is_none() {
            return Err(DispatchError::SequenceNotFound {
                project: project.to_string(),
                stage: stage.to_string(),
                sequence: sequence.to_string(),
            });
        }

        let instance = SequenceInstance::new(context_id, project, stage, service, sequence, payload);
        let key = instance.key();
        let context = instance.execution_context();
        match self.store.create(instance) {
            Ok(()) => {}
            // At-least-once transport: a re-delivered triggered event finds
            // its instance already live and is absorbed, not reported.
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(
                    "Sequence {} already live for context {}; duplicate trigger ignored",
                    key,
                    context_id
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            "Sequence {}.{} triggered for {} (context {})",
            stage,
            sequence,
            context,
            context_id
        );

        match self.queue.try_acquire(&context, &key) {
            Admission::Acquired => self.dispatch_task(&key, 0).await,
            Admission::Enqueued { position } => {
                tracing::info!(
                    "Execution context {} busy; sequence {} queued at position {}",
                    context,
                    key,
                    position
                );
                Ok(())
            }
        }
    }

    // =========================================================================
    // Event-consumption path
    // =========================================================================

    /// Consumes one inbound event.
    ///
    /// Orphaned, duplicated and unrecognized events are dropped with a log
    /// record and report success; only malformed types, definition failures
    /// and transport failures surface as errors.
    pub async fn handle_event(&self, event: Event) -> Result<(), DispatchError> {
        let class = event::classify(&event.event_type).map_err(DispatchError::Malformed)?;

        match class {
            EventClass::SequenceTriggered { stage, sequence } => {
                self.handle_sequence_triggered(event, &stage, &sequence).await
            }
            EventClass::TaskStarted { task, .. } => {
                self.handle_task_started(event, &task).await
            }
            EventClass::TaskFinished { task, .. } => {
                self.handle_task_finished(event, &task).await
            }
            EventClass::Unrecognized => {
                tracing::debug!(
                    "Ignoring event {} of type {} (not consumed by the engine)",
                    event.id,
                    event.event_type
                );
                Ok(())
            }
        }
    }

    /// An external `<stage>.<sequence>.triggered` event starts a run under
    /// the event's causal context. Project and service are carried in the
    /// payload.
    async fn handle_sequence_triggered(
        &self,
        event: Event,
        stage: &str,
        sequence: &str,
    ) -> Result<(), DispatchError> {
        let Some(project) = event.data.get("project").and_then(Value::as_str) else {
            tracing::warn!(
                "Discarding sequence-triggered event {} without a project field",
                event.id
            );
            return Ok(());
        };
        let Some(service) = event.data.get("service").and_then(Value::as_str) else {
            tracing::warn!(
                "Discarding sequence-triggered event {} without a service field",
                event.id
            );
            return Ok(());
        };

        self.start_sequence(
            event.context_id,
            project,
            stage,
            service,
            sequence,
            event.data.clone(),
        )
        .await
    }

    async fn handle_task_started(&self, event: Event, task: &str) -> Result<(), DispatchError> {
        let Some(triggered_id) = event.triggered_id else {
            tracing::warn!("Discarding orphaned started event {} (no triggered_id)", event.id);
            return Ok(());
        };

        let Some(key) = self.locate_instance(event.context_id, triggered_id) else {
            tracing::warn!(
                "Discarding orphaned started event {} (triggered_id {} unknown)",
                event.id,
                triggered_id
            );
            return Ok(());
        };

        for _ in 0..CAS_RETRIES {
            let Some(instance) = self.store.get(&key) else {
                return Ok(());
            };

            if instance.state.is_terminal() {
                // The run ended; the engine stops reacting to its executors.
                tracing::debug!(
                    "Ignoring started event {} for terminal instance {}",
                    event.id,
                    key
                );
                return Ok(());
            }

            if instance.seen_events.contains(&event.id) {
                tracing::debug!("Duplicate started event {} ignored", event.id);
                return Ok(());
            }
            match instance.dispatch_for(triggered_id) {
                Some(record) if record.started => {
                    tracing::debug!("Task {} already started; event {} ignored", task, event.id);
                    return Ok(());
                }
                Some(_) => {}
                None => return Ok(()),
            }

            // A started event confirms the run is underway; `Triggered` is
            // promoted, `Started`/`Paused` stay as they are.
            let expected = instance.state;
            let new = match expected {
                SequenceState::Triggered => SequenceState::Started,
                other => other,
            };

            let event_id = event.id;
            let event_type = event.event_type.clone();
            let result = self.store.transition(&key, expected, new, |i| {
                i.seen_events.insert(event_id);
                if let Some(record) = i.dispatch_for_mut(triggered_id) {
                    record.started = true;
                }
                if let Some(outcome) = i.outcomes.iter_mut().rev().find(|o| o.task == task) {
                    outcome.latest_event_type = event_type;
                }
            });

            match result {
                Ok(_) => {
                    tracing::debug!("Task {} started (context {})", task, event.context_id);
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            "Gave up recording started event {} after {} CAS attempts",
            event.id,
            CAS_RETRIES
        );
        Ok(())
    }

    /// The decision point: record the outcome, then advance, loop, fan out or
    /// finish.
    async fn handle_task_finished(&self, event: Event, task: &str) -> Result<(), DispatchError> {
        let Some(triggered_id) = event.triggered_id else {
            tracing::warn!("Discarding orphaned finished event {} (no triggered_id)", event.id);
            return Ok(());
        };

        let Some(key) = self.locate_instance(event.context_id, triggered_id) else {
            tracing::warn!(
                "Discarding orphaned finished event {} (triggered_id {} unknown)",
                event.id,
                triggered_id
            );
            return Ok(());
        };

        for _ in 0..CAS_RETRIES {
            let Some(instance) = self.store.get(&key) else {
                return Ok(());
            };

            if instance.state.is_terminal() {
                tracing::debug!(
                    "Ignoring finished event {} for terminal instance {}",
                    event.id,
                    key
                );
                return Ok(());
            }

            // Idempotence: a re-delivered finished event must not cause a
            // second dispatch.
            if instance.seen_events.contains(&event.id) {
                tracing::debug!("Duplicate finished event {} ignored", event.id);
                return Ok(());
            }
            let record = match instance.dispatch_for(triggered_id) {
                Some(record) if record.finished => {
                    tracing::debug!("Task {} already finished; event {} ignored", task, event.id);
                    return Ok(());
                }
                Some(record) => record.clone(),
                None => return Ok(()),
            };
            if record.task_index < instance.current_task {
                tracing::debug!(
                    "Stale finished event {} for task index {} ignored (current index {})",
                    event.id,
                    record.task_index,
                    instance.current_task
                );
                return Ok(());
            }

            let definition = self.resolver.resolve(&instance.project, None).await?;
            let Some(sequence) = definition.sequence(&instance.stage, &instance.sequence) else {
                tracing::warn!(
                    "Definition for {} no longer contains {}.{}; dropping event {}",
                    instance.project,
                    instance.stage,
                    instance.sequence,
                    event.id
                );
                return Ok(());
            };

            // A failed task stops the run: remaining tasks are skipped and
            // the sequence completes immediately, where a loop-back trigger
            // may re-enter it. Pass and warning advance to the next task.
            let next_index = record.task_index + 1;
            let task_result = event.result();
            let next_step = if task_result == Some(TaskResult::Fail) {
                PendingDispatch::Completion
            } else if next_index < sequence.tasks.len() {
                PendingDispatch::Task(next_index)
            } else {
                PendingDispatch::Completion
            };

            let expected = instance.state;
            let new = match expected {
                SequenceState::Triggered => SequenceState::Started,
                other => other,
            };
            let paused = expected == SequenceState::Paused;

            let event_id = event.id;
            let event_type = event.event_type.clone();
            let result = self.store.transition(&key, expected, new, |i| {
                i.seen_events.insert(event_id);
                if let Some(record) = i.dispatch_for_mut(triggered_id) {
                    record.started = true;
                    record.finished = true;
                }
                if let Some(outcome) = i.outcomes.iter_mut().rev().find(|o| o.task == task) {
                    outcome.latest_event_type = event_type;
                    outcome.result = task_result;
                }
                // Pause withholds the next dispatch; the finished event
                // itself is still recorded.
                if paused {
                    i.pending = Some(next_step);
                }
            });

            match result {
                Ok(_) => {
                    tracing::info!(
                        "Task {} finished with result {:?} (context {})",
                        task,
                        task_result,
                        event.context_id
                    );
                    if paused {
                        tracing::info!(
                            "Instance {} is paused; withholding next dispatch",
                            key
                        );
                        return Ok(());
                    }
                    return match next_step {
                        PendingDispatch::Task(index) => self.dispatch_task(&key, index).await,
                        PendingDispatch::Completion => self.complete_sequence(&key).await,
                    };
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            "Gave up processing finished event {} after {} CAS attempts",
            event.id,
            CAS_RETRIES
        );
        Ok(())
    }

    // =========================================================================
    // Dispatch and completion
    // =========================================================================

    /// Emits the `triggered` event for the task at `index`, recording the
    /// dispatch first so a prompt `started` reply finds its record.
    pub(crate) async fn dispatch_task(
        &self,
        key: &InstanceKey,
        index: usize,
    ) -> Result<(), DispatchError> {
        for _ in 0..CAS_RETRIES {
            let Some(instance) = self.store.get(key) else {
                return Ok(());
            };

            match instance.state {
                SequenceState::Triggered | SequenceState::Started => {}
                SequenceState::Paused => {
                    // Withhold; resume replays exactly this dispatch.
                    match self.store.transition(
                        key,
                        SequenceState::Paused,
                        SequenceState::Paused,
                        |i| i.pending = Some(PendingDispatch::Task(index)),
                    ) {
                        Err(StoreError::Conflict { .. }) => continue,
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }

            let definition = self.resolver.resolve(&instance.project, None).await?;
            let Some(sequence) = definition.sequence(&instance.stage, &instance.sequence) else {
                return Ok(());
            };
            let Some(task) = sequence.tasks.get(index) else {
                tracing::warn!("No task at index {} in sequence {}; nothing to dispatch", index, key);
                return Ok(());
            };

            let event = Event::new(
                event::task_event_type(
                    &instance.stage,
                    &instance.sequence,
                    &task.name,
                    EventPhase::Triggered,
                ),
                instance.context_id,
                None,
                EVENT_SOURCE,
                build_task_event_data(&instance, &task.name, &task.properties),
            );

            let record = DispatchRecord {
                event_id: event.id,
                task_index: index,
                task: task.name.clone(),
                dispatched_at: chrono::Utc::now(),
                started: false,
                finished: false,
            };
            let task_name = task.name.clone();
            let event_type = event.event_type.clone();

            let result = self.store.transition(
                key,
                instance.state,
                SequenceState::Started,
                |i| {
                    i.current_task = index;
                    i.dispatches.push(record);
                    i.outcomes.push(TaskOutcome {
                        task: task_name,
                        latest_event_type: event_type,
                        result: None,
                    });
                },
            );

            match result {
                Ok(_) => {
                    tracing::info!(
                        "Dispatching task {} of sequence {} (context {})",
                        task.name,
                        key,
                        instance.context_id
                    );
                    self.sender.send(event).await?;
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            "Gave up dispatching task index {} for {} after {} CAS attempts",
            index,
            key,
            CAS_RETRIES
        );
        Ok(())
    }

    /// Evaluates trigger fan-out for a sequence whose last task finished,
    /// then marks it finished (or loops it back into itself).
    ///
    /// Triggers are evaluated and their starts dispatched before the terminal
    /// transition so a concurrent timeout or abort cannot lose the fan-out.
    ///
    /// Losing the final CAS re-reads and re-evaluates: a pause that lands
    /// mid-completion withholds `Completion` for resume to replay instead of
    /// losing the finish. The replay may re-emit the sequence-finished event;
    /// transport is at-least-once throughout.
    pub(crate) async fn complete_sequence(&self, key: &InstanceKey) -> Result<(), DispatchError> {
        for _ in 0..CAS_RETRIES {
            let Some(instance) = self.store.get(key) else {
                return Ok(());
            };
            match instance.state {
                SequenceState::Started => {}
                SequenceState::Paused => {
                    match self.store.transition(
                        key,
                        SequenceState::Paused,
                        SequenceState::Paused,
                        |i| i.pending = Some(PendingDispatch::Completion),
                    ) {
                        Err(StoreError::Conflict { .. }) => continue,
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }

            let definition = self.resolver.resolve(&instance.project, None).await?;
            let finished_type = event::sequence_event_type(
                &instance.stage,
                &instance.sequence,
                EventPhase::Finished,
            );
            let summary = instance.result_summary();

            // Collect matching triggers first; dispatch decides between
            // loop-back (same stage and sequence) and fan-out.
            let mut loop_back = false;
            let mut fan_out: Vec<(String, String)> = Vec::new();
            for (stage, sequence, trigger) in definition.triggers_for(&finished_type) {
                let matches = trigger
                    .selector
                    .as_ref()
                    .map(|s| s.matches(&summary))
                    .unwrap_or(true);
                if !matches {
                    continue;
                }
                if stage.name == instance.stage && sequence.name == instance.sequence {
                    loop_back = true;
                } else {
                    fan_out.push((stage.name.clone(), sequence.name.clone()));
                }
            }

            let finished_event = Event::new(
                finished_type,
                instance.context_id,
                None,
                EVENT_SOURCE,
                build_sequence_event_data(&instance, &summary),
            );
            self.sender.send(finished_event).await?;

            let fan_out_payload = merge_payloads(&instance.input, &summary);
            for (stage, sequence) in fan_out {
                tracing::info!(
                    "Trigger fan-out: {}.{} starts for context {}",
                    stage,
                    sequence,
                    instance.context_id
                );
                let started = self
                    .start_sequence(
                        instance.context_id,
                        &instance.project,
                        &stage,
                        &instance.service,
                        &sequence,
                        fan_out_payload.clone(),
                    )
                    .await;
                if let Err(err) = started {
                    // A broken trigger target must not take down the source
                    // run or the remaining fan-out.
                    tracing::warn!(
                        "Failed to start triggered sequence {}.{} for context {}: {}",
                        stage,
                        sequence,
                        instance.context_id,
                        err
                    );
                }
            }

            if loop_back {
                tracing::info!(
                    "Trigger loop-back: sequence {} re-enters with context {}",
                    key,
                    instance.context_id
                );
                let reset = self.store.transition(
                    key,
                    SequenceState::Started,
                    SequenceState::Started,
                    |i| i.reset_for_reentry(),
                );
                match reset {
                    // The instance still holds its context slot; go again.
                    Ok(_) => return self.dispatch_task(key, 0).await,
                    Err(StoreError::Conflict { actual, .. }) => {
                        tracing::debug!(
                            "Loop-back for {} lost a race (state now {}); re-evaluating",
                            key,
                            actual
                        );
                        continue;
                    }
                    Err(StoreError::NotFound(_)) => return Ok(()),
                    Err(err) => return Err(err.into()),
                }
            }

            let finished = self.store.transition(
                key,
                SequenceState::Started,
                SequenceState::Finished,
                |_| {},
            );
            match finished {
                Ok(_) => {
                    tracing::info!("Sequence {} finished (context {})", key, instance.context_id);
                    return self.release_context(&instance).await;
                }
                Err(StoreError::Conflict { actual, .. }) => {
                    tracing::debug!(
                        "Completion of {} lost a race (state now {}); re-evaluating",
                        key,
                        actual
                    );
                    continue;
                }
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            "Gave up completing sequence {} after {} CAS attempts",
            key,
            CAS_RETRIES
        );
        Ok(())
    }

    /// Releases the instance's execution-context slot and dispatches the
    /// first task of the next queued instance, if any.
    pub(crate) async fn release_context(
        &self,
        instance: &SequenceInstance,
    ) -> Result<(), DispatchError> {
        let context = instance.execution_context();
        if let Some(promoted) = self.queue.release(&context, &instance.key()) {
            tracing::info!(
                "Execution context {} freed; dispatching queued sequence {}",
                context,
                promoted
            );
            self.dispatch_task(&promoted, 0).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    /// Forces an inactive instance to `timedout` and frees its slot.
    ///
    /// Used by the timeout sweeper; goes through the same CAS primitive as
    /// every other transition, so a racing finish or abort simply wins.
    pub(crate) async fn timeout_instance(
        &self,
        key: &InstanceKey,
        reason: &str,
    ) -> Result<(), DispatchError> {
        let Some(instance) = self.store.get(key) else {
            return Ok(());
        };

        let expected = match instance.state {
            SequenceState::Triggered | SequenceState::Started => instance.state,
            _ => return Ok(()),
        };

        match self
            .store
            .transition(key, expected, SequenceState::TimedOut, |_| {})
        {
            Ok(_) => {
                tracing::warn!("Sequence {} timed out: {}", key, reason);
                let context = instance.execution_context();
                // A queued instance never held the slot; drop it from the
                // wait list instead.
                if !self.queue.remove(&context, key) {
                    self.release_context(&instance).await?;
                }
                Ok(())
            }
            Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Finds the instance a started/finished event belongs to: same causal
    /// context, and its dispatch history contains the referenced triggered
    /// event.
    fn locate_instance(&self, context_id: Uuid, triggered_id: Uuid) -> Option<InstanceKey> {
        self.store
            .get_by_context(context_id)
            .into_iter()
            .find(|i| i.dispatch_for(triggered_id).is_some())
            .map(|i| i.key())
    }
}

/// Payload of a task `triggered` event: execution-context fields, the run's
/// input, and the task's property bag keyed by task name.
fn build_task_event_data(instance: &SequenceInstance, task: &str, properties: &Value) -> Value {
    let mut data = serde_json::Map::new();
    if let Value::Object(input) = &instance.input {
        for (k, v) in input {
            data.insert(k.clone(), v.clone());
        }
    }
    data.insert("project".to_string(), Value::String(instance.project.clone()));
    data.insert("stage".to_string(), Value::String(instance.stage.clone()));
    data.insert("service".to_string(), Value::String(instance.service.clone()));
    if !properties.is_null() {
        data.insert(task.to_string(), properties.clone());
    }
    Value::Object(data)
}

/// Payload of a sequence-level `finished` event: context fields plus the
/// aggregate result summary.
fn build_sequence_event_data(instance: &SequenceInstance, summary: &Value) -> Value {
    let mut data = serde_json::Map::new();
    if let Value::Object(summary) = summary {
        for (k, v) in summary {
            data.insert(k.clone(), v.clone());
        }
    }
    data.insert("project".to_string(), Value::String(instance.project.clone()));
    data.insert("stage".to_string(), Value::String(instance.stage.clone()));
    data.insert("service".to_string(), Value::String(instance.service.clone()));
    Value::Object(data)
}

/// Merges the run's input with its result summary; summary entries win.
fn merge_payloads(input: &Value, summary: &Value) -> Value {
    let mut data = serde_json::Map::new();
    if let Value::Object(input) = input {
        for (k, v) in input {
            data.insert(k.clone(), v.clone());
        }
    }
    if let Value::Object(summary) = summary {
        for (k, v) in summary {
            data.insert(k.clone(), v.clone());
        }
    }
    Value::Object(data)
}
