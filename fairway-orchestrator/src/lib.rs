//! Fairway Orchestrator
//!
//! The sequence execution engine of the Fairway delivery control plane: a
//! distributed state machine that drives named delivery sequences through
//! their tasks, reacting to lifecycle events reported by external task
//! executors, with pause/resume/abort, timeouts, looping-on-failure and
//! fan-out triggering of downstream sequences.

pub mod api;
pub mod bus;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod sweeper;
