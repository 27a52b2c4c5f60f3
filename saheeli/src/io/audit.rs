//! Audit log (`servo-<id>-audit.log`) and session transcript helpers.
//!
//! The audit log is newline-delimited JSON, opened in append mode for every
//! record and never truncated. Records are immutable once written.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::Message;
use crate::io::workspace::write_json;

/// One event of an agent turn.
#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum AuditEvent<'a> {
    /// Initial prompt of a fresh run.
    User { content: &'a str },
    /// Raw model response.
    Assistant { content: &'a Value },
    /// Validation failure fed back to the model.
    Error { content: &'a str },
    /// Stringified capability result (success or failure).
    Tool {
        capability: &'a str,
        content: &'a str,
    },
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped record and flush it to disk.
    pub fn append(&self, event: &AuditEvent<'_>) -> Result<()> {
        let mut record = serde_json::to_value(event).context("serialize audit event")?;
        if let Value::Object(map) = &mut record {
            map.insert(
                "ts".to_string(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        let mut line = serde_json::to_string(&record).context("serialize audit record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append audit log {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("flush audit log {}", self.path.display()))
    }
}

/// Overwrite the session transcript with the final message array.
pub fn write_session(path: &Path, messages: &[Message]) -> Result<()> {
    write_json(path, messages)
}
