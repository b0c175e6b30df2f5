//! Sequence state store
//!
//! Holds the live state of every sequence instance and exposes an atomic
//! compare-and-swap transition per instance. The store is constructed once at
//! startup and passed by handle to the dispatcher and control processor;
//! nothing accesses it through ambient globals.
//!
//! `Conflict` means the instance changed underneath the caller (e.g. a
//! concurrent control command aborted it). Callers must re-read and
//! re-evaluate, never blindly overwrite.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use fairway_core::domain::sequence::{
    ExecutionContext, InstanceKey, SequenceInstance, SequenceState,
};

/// Errors from state store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(InstanceKey),
    /// The instance's state did not match the expected state.
    Conflict {
        key: InstanceKey,
        expected: SequenceState,
        actual: SequenceState,
    },
    /// The requested state change violates the lifecycle.
    IllegalTransition {
        key: InstanceKey,
        from: SequenceState,
        to: SequenceState,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "instance {} not found", key),
            StoreError::Conflict { key, expected, actual } => write!(
                f,
                "instance {} expected in state {} but was {}",
                key, expected, actual
            ),
            StoreError::IllegalTransition { key, from, to } => {
                write!(f, "instance {}: illegal transition {} -> {}", key, from, to)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// In-memory sequence instance store with per-instance CAS updates.
pub struct StateStore {
    inner: Mutex<HashMap<InstanceKey, SequenceInstance>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a freshly triggered instance.
    ///
    /// Replacing a terminal instance under the same key is allowed (a new
    /// trigger may re-address a completed run); replacing a live one is a
    /// conflict.
    pub fn create(&self, instance: SequenceInstance) -> Result<(), StoreError> {
        let key = instance.key();
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.get(&key) {
            if !existing.state.is_terminal() {
                return Err(StoreError::Conflict {
                    key,
                    expected: SequenceState::Triggered,
                    actual: existing.state,
                });
            }
        }
        inner.insert(key, instance);
        Ok(())
    }

    pub fn get(&self, key: &InstanceKey) -> Option<SequenceInstance> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// All instances belonging to one causal context, across stages.
    pub fn get_by_context(&self, context_id: Uuid) -> Vec<SequenceInstance> {
        let mut instances: Vec<SequenceInstance> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.context_id == context_id)
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        instances
    }

    pub fn list_by_execution_context(&self, context: &ExecutionContext) -> Vec<SequenceInstance> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| &i.execution_context() == context)
            .cloned()
            .collect()
    }

    /// Non-terminal instances, for the timeout sweep.
    pub fn list_active(&self) -> Vec<SequenceInstance> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| !i.state.is_terminal())
            .cloned()
            .collect()
    }

    pub fn list_by_project(&self, project: &str) -> Vec<SequenceInstance> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.project == project)
            .cloned()
            .collect()
    }

    /// Atomic compare-and-swap update of one instance.
    ///
    /// The mutation runs under the store lock only if the instance's current
    /// state equals `expected`; the state then becomes `new` and the updated
    /// instance is returned. `expected == new` expresses a record-only update
    /// without a lifecycle change.
    pub fn transition<F>(
        &self,
        key: &InstanceKey,
        expected: SequenceState,
        new: SequenceState,
        mutate: F,
    ) -> Result<SequenceInstance, StoreError>
    where
        F: FnOnce(&mut SequenceInstance),
    {
        let mut inner = self.inner.lock().unwrap();
        let instance = inner
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if instance.state != expected {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected,
                actual: instance.state,
            });
        }

        if !expected.can_transition_to(new) {
            return Err(StoreError::IllegalTransition {
                key: key.clone(),
                from: expected,
                to: new,
            });
        }

        mutate(instance);
        instance.state = new;
        instance.touch();
        Ok(instance.clone())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn instance(context_id: Uuid) -> SequenceInstance {
        SequenceInstance::new(context_id, "sockshop", "dev", "carts", "delivery", Value::Null)
    }

    #[test]
    fn test_create_and_get() {
        let store = StateStore::new();
        let inst = instance(Uuid::new_v4());
        let key = inst.key();

        store.create(inst).unwrap();
        let read = store.get(&key).unwrap();
        assert_eq!(read.state, SequenceState::Triggered);
        assert_eq!(read.project, "sockshop");
    }

    #[test]
    fn test_create_conflicts_with_live_instance() {
        let store = StateStore::new();
        let context_id = Uuid::new_v4();
        store.create(instance(context_id)).unwrap();

        let err = store.create(instance(context_id)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_transition_cas() {
        let store = StateStore::new();
        let inst = instance(Uuid::new_v4());
        let key = inst.key();
        store.create(inst).unwrap();

        let updated = store
            .transition(&key, SequenceState::Triggered, SequenceState::Started, |i| {
                i.current_task = 0;
            })
            .unwrap();
        assert_eq!(updated.state, SequenceState::Started);

        // Stale expectation loses the race.
        let err = store
            .transition(&key, SequenceState::Triggered, SequenceState::Started, |_| {})
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                key: key.clone(),
                expected: SequenceState::Triggered,
                actual: SequenceState::Started,
            }
        );
    }

    #[test]
    fn test_transition_rejects_illegal_lifecycle_change() {
        let store = StateStore::new();
        let inst = instance(Uuid::new_v4());
        let key = inst.key();
        store.create(inst).unwrap();

        let err = store
            .transition(&key, SequenceState::Triggered, SequenceState::Paused, |_| {})
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn test_list_active_excludes_terminal() {
        let store = StateStore::new();
        let a = instance(Uuid::new_v4());
        let b = instance(Uuid::new_v4());
        let key_b = b.key();
        store.create(a).unwrap();
        store.create(b).unwrap();

        store
            .transition(&key_b, SequenceState::Triggered, SequenceState::Aborted, |_| {})
            .unwrap();

        let active = store.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].state, SequenceState::Triggered);
    }

    #[test]
    fn test_record_only_update_keeps_state() {
        let store = StateStore::new();
        let inst = instance(Uuid::new_v4());
        let key = inst.key();
        store.create(inst).unwrap();

        let updated = store
            .transition(
                &key,
                SequenceState::Triggered,
                SequenceState::Triggered,
                |i| {
                    i.seen_events.insert(Uuid::new_v4());
                },
            )
            .unwrap();
        assert_eq!(updated.state, SequenceState::Triggered);
        assert_eq!(updated.seen_events.len(), 1);
    }
}
