//! Deterministic, pure logic shared by the controller and the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod command;
pub mod history;
pub mod registry;
pub mod types;
