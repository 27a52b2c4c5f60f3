//! Scratchpad storage (`scratchpad.json`): the only agent state that must
//! survive a restart.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::types::Message;
use crate::io::workspace::write_atomic;

/// Keys owned by the agent loop; capabilities may not overwrite them.
pub const RESERVED_KEYS: [&str; 2] = ["history", "conversation"];

/// Persisted agent state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scratchpad {
    /// Messages pruned out of the live conversation, oldest first.
    #[serde(default)]
    pub history: Vec<Message>,
    /// Mirror of the live conversation, restored on resume.
    #[serde(default)]
    pub conversation: Vec<Message>,
    /// Free-form notes written by capabilities.
    #[serde(flatten)]
    pub notes: Map<String, Value>,
}

impl Scratchpad {
    /// Store a free-form note. Returns `false` for reserved keys.
    pub fn set_note(&mut self, key: &str, value: Value) -> bool {
        if RESERVED_KEYS.contains(&key) {
            return false;
        }
        self.notes.insert(key.to_string(), value);
        true
    }
}

pub fn load_scratchpad(path: &Path) -> Result<Scratchpad> {
    debug!(path = %path.display(), "loading scratchpad");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read scratchpad {}", path.display()))?;
    let scratchpad: Scratchpad = serde_json::from_str(&contents)
        .with_context(|| format!("parse scratchpad {}", path.display()))?;
    debug!(
        history = scratchpad.history.len(),
        conversation = scratchpad.conversation.len(),
        "scratchpad loaded"
    );
    Ok(scratchpad)
}

/// Load the scratchpad if a previous run left one behind.
pub fn load_scratchpad_if_present(path: &Path) -> Result<Option<Scratchpad>> {
    if !path.exists() {
        return Ok(None);
    }
    load_scratchpad(path).map(Some)
}

/// Atomically write the scratchpad to disk.
pub fn write_scratchpad(path: &Path, scratchpad: &Scratchpad) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(scratchpad).context("serialize scratchpad")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
