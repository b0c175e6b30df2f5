//! Core domain types
//!
//! This module contains the core domain structures used across Fairway
//! services. These types represent the fundamental business entities and are
//! shared between the orchestrator (which drives sequences) and external
//! clients (which observe and control them).

pub mod definition;
pub mod event;
pub mod selector;
pub mod sequence;
