//! Timeout sweeper
//!
//! Background loop that periodically scans active instances and forces the
//! inactive ones to `timedout` through the dispatcher's CAS transition. Two
//! windows apply: the sequence-level inactivity window, and a shorter window
//! for a dispatched task that never produced a `started` event.
//!
//! Timeouts are "at least after", not "exactly at": the sweep interval bounds
//! the worst-case overrun.

use std::sync::Arc;
use tokio::time;

use fairway_core::domain::sequence::SequenceState;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::store::StateStore;

/// Periodic scanner enforcing the timeout windows.
pub struct TimeoutSweeper {
    store: Arc<StateStore>,
    dispatcher: Arc<Dispatcher>,
    config: Config,
}

impl TimeoutSweeper {
    pub fn new(store: Arc<StateStore>, dispatcher: Arc<Dispatcher>, config: Config) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Starts the sweep loop on its own task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "Starting timeout sweeper (interval: {:?}, sequence window: {:?}, task-start window: {:?})",
                self.config.sweep_interval,
                self.config.sequence_timeout,
                self.config.task_start_timeout
            );

            let mut interval = time::interval(self.config.sweep_interval);
            loop {
                interval.tick().await;
                self.sweep_once(chrono::Utc::now()).await;
            }
        })
    }

    /// Performs a single sweep over all active instances.
    ///
    /// Errors on individual instances are logged and do not stop the sweep.
    pub async fn sweep_once(&self, now: chrono::DateTime<chrono::Utc>) {
        let sequence_window = chrono::Duration::from_std(self.config.sequence_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let task_start_window = chrono::Duration::from_std(self.config.task_start_timeout)
            .unwrap_or(chrono::Duration::MAX);

        for stale in self.store.list_active() {
            // Re-read: an earlier timeout in this sweep may have promoted a
            // queued instance and refreshed its activity timestamp.
            let Some(instance) = self.store.get(&stale.key()) else {
                continue;
            };

            // Paused instances wait on the operator, not on executors.
            let eligible = matches!(
                instance.state,
                SequenceState::Triggered | SequenceState::Started
            );
            if !eligible {
                continue;
            }

            let key = instance.key();

            let timed_out = if now - instance.updated_at > sequence_window {
                Some("no activity within the sequence timeout window")
            } else if instance
                .awaiting_start()
                .map(|d| now - d.dispatched_at > task_start_window)
                .unwrap_or(false)
            {
                Some("dispatched task produced no started event in time")
            } else {
                None
            };

            if let Some(reason) = timed_out {
                if let Err(err) = self.dispatcher.timeout_instance(&key, reason).await {
                    tracing::error!("Error timing out sequence {}: {}", key, err);
                }
            }
        }
    }
}
