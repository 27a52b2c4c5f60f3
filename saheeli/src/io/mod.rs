//! Side-effecting adapters: filesystem, child processes, container engine,
//! and LLM transport.

pub mod audit;
pub mod config;
pub mod docker;
pub mod llm;
pub mod process;
pub mod scratchpad;
pub mod workspace;
