//! Control command processor
//!
//! Applies operator-issued abort, pause and resume commands against queued or
//! running sequence instances. Commands address a causal context and affect
//! every live instance under it (a context may span stages after fan-out).
//!
//! Commands go through the state store's CAS primitive, so they race safely
//! against the dispatcher: whoever loses re-reads and re-evaluates.

use std::sync::Arc;
use uuid::Uuid;

use fairway_core::domain::sequence::{PendingDispatch, SequenceState};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::queue::SequenceQueue;
use crate::store::{StateStore, StoreError};

const CAS_RETRIES: usize = 8;

/// Errors from control commands.
#[derive(Debug)]
pub enum ControlError {
    /// No instance exists for the context.
    NotFound(Uuid),
    /// The command is not valid for the instances' current state; applying a
    /// command to a terminal instance is reported, not silently ignored.
    InvalidStateTransition {
        context_id: Uuid,
        state: SequenceState,
        command: &'static str,
    },
    Dispatch(DispatchError),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::NotFound(context_id) => {
                write!(f, "no sequence instance for context {}", context_id)
            }
            ControlError::InvalidStateTransition { context_id, state, command } => {
                write!(
                    f,
                    "cannot {} context {} in state {}",
                    command, context_id, state
                )
            }
            ControlError::Dispatch(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<DispatchError> for ControlError {
    fn from(err: DispatchError) -> Self {
        ControlError::Dispatch(err)
    }
}

/// Applies abort/pause/resume against the state store and sequence queue.
pub struct ControlProcessor {
    store: Arc<StateStore>,
    queue: Arc<SequenceQueue>,
    dispatcher: Arc<Dispatcher>,
}

impl ControlProcessor {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<SequenceQueue>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            queue,
            dispatcher,
        }
    }

    /// Aborts every live instance of a context.
    ///
    /// Queued instances are removed from the sequence queue without ever
    /// dispatching; running instances transition to `aborted` and free their
    /// execution-context slot. In-flight external task work is not cancelled;
    /// the engine simply stops reacting to its future events.
    pub async fn abort(&self, context_id: Uuid) -> Result<SequenceState, ControlError> {
        let instances = self.store.get_by_context(context_id);
        if instances.is_empty() {
            return Err(ControlError::NotFound(context_id));
        }

        let live: Vec<_> = instances
            .iter()
            .filter(|i| !i.state.is_terminal())
            .collect();
        if live.is_empty() {
            return Err(ControlError::InvalidStateTransition {
                context_id,
                state: instances[instances.len() - 1].state,
                command: "abort",
            });
        }

        for instance in live {
            let key = instance.key();
            let context = instance.execution_context();

            for _ in 0..CAS_RETRIES {
                let Some(current) = self.store.get(&key) else {
                    break;
                };
                if current.state.is_terminal() {
                    break;
                }

                match self
                    .store
                    .transition(&key, current.state, SequenceState::Aborted, |i| {
                        i.pending = None;
                    }) {
                    Ok(_) => {
                        tracing::info!("Sequence {} aborted", key);
                        // A queued instance never held the slot; otherwise
                        // free it and let the next queued instance proceed.
                        if !self.queue.remove(&context, &key) {
                            self.dispatcher.release_context(&current).await?;
                        }
                        break;
                    }
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(_) => break,
                }
            }
        }

        Ok(SequenceState::Aborted)
    }

    /// Pauses the context's running instances.
    ///
    /// Valid only from `started`; the next task dispatch is withheld even
    /// after its predecessor's `finished` event arrives.
    pub async fn pause(&self, context_id: Uuid) -> Result<SequenceState, ControlError> {
        let instances = self.store.get_by_context(context_id);
        if instances.is_empty() {
            return Err(ControlError::NotFound(context_id));
        }

        let mut paused = 0;
        let mut last_state = instances[instances.len() - 1].state;

        for instance in &instances {
            let key = instance.key();
            for _ in 0..CAS_RETRIES {
                let Some(current) = self.store.get(&key) else {
                    break;
                };
                last_state = current.state;
                if current.state != SequenceState::Started {
                    break;
                }

                match self.store.transition(
                    &key,
                    SequenceState::Started,
                    SequenceState::Paused,
                    |_| {},
                ) {
                    Ok(_) => {
                        tracing::info!("Sequence {} paused", key);
                        paused += 1;
                        break;
                    }
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(_) => break,
                }
            }
        }

        if paused == 0 {
            return Err(ControlError::InvalidStateTransition {
                context_id,
                state: last_state,
                command: "pause",
            });
        }
        Ok(SequenceState::Paused)
    }

    /// Resumes the context's paused instances and immediately performs the
    /// withheld dispatch, if one was pending, exactly once.
    pub async fn resume(&self, context_id: Uuid) -> Result<SequenceState, ControlError> {
        let instances = self.store.get_by_context(context_id);
        if instances.is_empty() {
            return Err(ControlError::NotFound(context_id));
        }

        let mut resumed = 0;
        let mut last_state = instances[instances.len() - 1].state;

        for instance in &instances {
            let key = instance.key();
            for _ in 0..CAS_RETRIES {
                let Some(current) = self.store.get(&key) else {
                    break;
                };
                last_state = current.state;
                if current.state != SequenceState::Paused {
                    break;
                }

                // Take the withheld dispatch atomically with the transition
                // so it is replayed once, not duplicated.
                let mut pending = None;
                match self.store.transition(
                    &key,
                    SequenceState::Paused,
                    SequenceState::Started,
                    |i| pending = i.pending.take(),
                ) {
                    Ok(_) => {
                        tracing::info!("Sequence {} resumed", key);
                        resumed += 1;
                        match pending {
                            Some(PendingDispatch::Task(index)) => {
                                self.dispatcher.dispatch_task(&key, index).await?;
                            }
                            Some(PendingDispatch::Completion) => {
                                self.dispatcher.complete_sequence(&key).await?;
                            }
                            None => {}
                        }
                        break;
                    }
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(_) => break,
                }
            }
        }

        if resumed == 0 {
            return Err(ControlError::InvalidStateTransition {
                context_id,
                state: last_state,
                command: "resume",
            });
        }
        Ok(SequenceState::Started)
    }
}
