//! Validation of untrusted model output into a [`ToolCommand`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Capability name. Older models emit this as `tool`.
    #[serde(alias = "tool")]
    pub capability: String,
    pub args: Map<String, Value>,
}

/// Model output that does not have the `{capability, args}` shape.
///
/// Recovered locally: the message is fed back to the model as a system
/// message so it can correct itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tool command: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ToolCommand {
    /// Decode and validate a raw model response.
    pub fn from_response(response: &Value) -> Result<Self, ValidationError> {
        let command: ToolCommand =
            serde_json::from_value(response.clone()).map_err(|err| ValidationError {
                message: err.to_string(),
            })?;
        if command.capability.trim().is_empty() {
            return Err(ValidationError {
                message: "capability must be a non-empty string".to_string(),
            });
        }
        Ok(command)
    }
}
