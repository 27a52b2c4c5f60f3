//! Saheeli: run LLM agent tasks inside isolated Servo containers.
//!
//! The host side queues prompts and drives one container per task; the unit
//! side runs an agent loop against the task workspace. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (task registry, classification,
//!   command validation, history bounds). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, child processes,
//!   `docker`, LLM transport). Behind traits where tests substitute doubles.
//!
//! Orchestration modules ([`controller`], [`orchestrator`], [`agent`]) compose
//! the two into the CLI commands.

pub mod agent;
pub mod capabilities;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod healthcheck;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
