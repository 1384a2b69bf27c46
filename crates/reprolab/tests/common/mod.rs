//! Shared test utilities for reprolab integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an in-memory database, store and pipelines
//! - Scripted doubles for the model provider and the sandbox backend

pub mod doubles;
pub mod harness;

pub use harness::TestHarness;
