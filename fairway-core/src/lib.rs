//! Fairway Core
//!
//! Core types and abstractions for the Fairway delivery control plane.
//!
//! This crate contains:
//! - Domain types: Core business entities (events, pipeline definitions,
//!   sequence instances)
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
