//! Sequence queue
//!
//! Serializes sequence execution per (project, stage, service) execution
//! context: at most one instance holds a context's slot at a time, all others
//! wait in FIFO order. Slot accounting and queueing live behind one lock, so
//! two instances can never both be admitted for the same context.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use fairway_core::domain::sequence::{ExecutionContext, InstanceKey};

/// Outcome of asking for a context's execution slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The slot was free (or already held by this instance); dispatch now.
    Acquired,
    /// The context is busy; the instance was appended to the wait queue.
    Enqueued { position: usize },
}

#[derive(Debug, Default)]
struct ContextSlot {
    active: Option<InstanceKey>,
    waiting: VecDeque<InstanceKey>,
}

/// FIFO queue with an atomically coupled busy/free slot per execution
/// context.
pub struct SequenceQueue {
    inner: Mutex<HashMap<ExecutionContext, ContextSlot>>,
}

impl SequenceQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the context's slot for `key`, or enqueues it.
    ///
    /// Re-acquiring a slot the instance already holds succeeds, which is what
    /// a loop-back re-entry does.
    pub fn try_acquire(&self, context: &ExecutionContext, key: &InstanceKey) -> Admission {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.entry(context.clone()).or_default();

        match &slot.active {
            None => {
                slot.active = Some(key.clone());
                Admission::Acquired
            }
            Some(active) if active == key => Admission::Acquired,
            Some(_) => {
                if let Some(position) = slot.waiting.iter().position(|k| k == key) {
                    return Admission::Enqueued { position };
                }
                slot.waiting.push_back(key.clone());
                Admission::Enqueued {
                    position: slot.waiting.len() - 1,
                }
            }
        }
    }

    /// Releases the slot held by `key` and promotes the next queued instance.
    ///
    /// Returns the promoted instance, which now holds the slot and must be
    /// dispatched by the caller. Releasing a slot the instance does not hold
    /// is a no-op.
    pub fn release(&self, context: &ExecutionContext, key: &InstanceKey) -> Option<InstanceKey> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.get_mut(context)?;

        if slot.active.as_ref() != Some(key) {
            return None;
        }

        slot.active = slot.waiting.pop_front();
        let promoted = slot.active.clone();
        if slot.active.is_none() {
            inner.remove(context);
        }
        promoted
    }

    /// Removes a waiting instance before it ever starts (used by abort).
    ///
    /// Returns false when the instance was not queued (it may already hold
    /// the slot, or never entered the queue).
    pub fn remove(&self, context: &ExecutionContext, key: &InstanceKey) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.get_mut(context) else {
            return false;
        };
        let before = slot.waiting.len();
        slot.waiting.retain(|k| k != key);
        let removed = slot.waiting.len() < before;
        if slot.active.is_none() && slot.waiting.is_empty() {
            inner.remove(context);
        }
        removed
    }

    /// Current slot holder for a context, if any.
    pub fn active(&self, context: &ExecutionContext) -> Option<InstanceKey> {
        self.inner
            .lock()
            .unwrap()
            .get(context)
            .and_then(|slot| slot.active.clone())
    }

    /// Number of instances waiting for a context.
    pub fn waiting(&self, context: &ExecutionContext) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(context)
            .map(|slot| slot.waiting.len())
            .unwrap_or(0)
    }
}

impl Default for SequenceQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        ExecutionContext {
            project: "sockshop".to_string(),
            stage: "dev".to_string(),
            service: "carts".to_string(),
        }
    }

    fn key() -> InstanceKey {
        InstanceKey {
            context_id: Uuid::new_v4(),
            stage: "dev".to_string(),
            sequence: "delivery".to_string(),
        }
    }

    #[test]
    fn test_first_acquire_wins_second_waits() {
        let queue = SequenceQueue::new();
        let ctx = context();
        let first = key();
        let second = key();

        assert_eq!(queue.try_acquire(&ctx, &first), Admission::Acquired);
        assert_eq!(
            queue.try_acquire(&ctx, &second),
            Admission::Enqueued { position: 0 }
        );
        assert_eq!(queue.active(&ctx), Some(first));
        assert_eq!(queue.waiting(&ctx), 1);
    }

    #[test]
    fn test_release_promotes_fifo() {
        let queue = SequenceQueue::new();
        let ctx = context();
        let first = key();
        let second = key();
        let third = key();

        queue.try_acquire(&ctx, &first);
        queue.try_acquire(&ctx, &second);
        queue.try_acquire(&ctx, &third);

        assert_eq!(queue.release(&ctx, &first), Some(second.clone()));
        assert_eq!(queue.active(&ctx), Some(second.clone()));
        assert_eq!(queue.release(&ctx, &second), Some(third.clone()));
        assert_eq!(queue.release(&ctx, &third), None);
        assert_eq!(queue.active(&ctx), None);
    }

    #[test]
    fn test_release_by_non_holder_is_noop() {
        let queue = SequenceQueue::new();
        let ctx = context();
        let holder = key();
        let other = key();

        queue.try_acquire(&ctx, &holder);
        queue.try_acquire(&ctx, &other);

        assert_eq!(queue.release(&ctx, &other), None);
        assert_eq!(queue.active(&ctx), Some(holder));
        assert_eq!(queue.waiting(&ctx), 1);
    }

    #[test]
    fn test_reacquire_by_holder_is_idempotent() {
        let queue = SequenceQueue::new();
        let ctx = context();
        let holder = key();

        assert_eq!(queue.try_acquire(&ctx, &holder), Admission::Acquired);
        assert_eq!(queue.try_acquire(&ctx, &holder), Admission::Acquired);
        assert_eq!(queue.waiting(&ctx), 0);
    }

    #[test]
    fn test_remove_waiting_instance() {
        let queue = SequenceQueue::new();
        let ctx = context();
        let holder = key();
        let queued = key();

        queue.try_acquire(&ctx, &holder);
        queue.try_acquire(&ctx, &queued);

        assert!(queue.remove(&ctx, &queued));
        assert!(!queue.remove(&ctx, &queued));
        assert_eq!(queue.release(&ctx, &holder), None);
    }

    #[test]
    fn test_independent_contexts_do_not_serialize() {
        let queue = SequenceQueue::new();
        let dev = context();
        let staging = ExecutionContext {
            stage: "staging".to_string(),
            ..context()
        };

        assert_eq!(queue.try_acquire(&dev, &key()), Admission::Acquired);
        assert_eq!(queue.try_acquire(&staging, &key()), Admission::Acquired);
    }
}
