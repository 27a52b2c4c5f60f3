//! Named capabilities the agent may invoke.
//!
//! Capabilities are held in an explicit [`CapabilityRegistry`] mapping names
//! to typed handlers. The registry is validated before the agent loop starts,
//! so an unknown name is a deterministic contract violation rather than a
//! runtime lookup accident.
//!
//! The built-in set covers the workspace contract only: completion marker,
//! child-task requests, and scratchpad notes. General-purpose capabilities
//! (shell, files, network) are registered by the embedding program.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;

use crate::io::scratchpad::Scratchpad;
use crate::io::workspace::{WorkspacePaths, write_json};

/// Reserved capability that ends the agent loop.
pub const COMPLETION_CAPABILITY: &str = "task_complete";

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability '{0}' is registered twice")]
    Duplicate(String),
    #[error("completion capability 'task_complete' is not registered")]
    MissingCompletion,
    #[error("{capability}: missing required argument '{arg}'")]
    MissingArgument { capability: String, arg: String },
    #[error("{capability}: argument '{arg}' must be {expected}")]
    InvalidArgument {
        capability: String,
        arg: String,
        expected: &'static str,
    },
    #[error("{capability}: scratchpad key '{key}' is reserved")]
    ReservedKey { capability: String, key: String },
}

/// State a capability may touch while it runs.
pub struct CapabilityContext<'a> {
    pub workspace: &'a WorkspacePaths,
    pub scratchpad: &'a mut Scratchpad,
}

/// A named operation taking keyword arguments and returning a serializable result.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, ctx: &mut CapabilityContext<'_>, args: &Map<String, Value>) -> Result<Value>;
}

#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: BTreeMap<String, Box<dyn Capability>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in workspace capabilities.
    pub fn with_builtins() -> Self {
        let handlers = builtins()
            .into_iter()
            .map(|capability| (capability.name().to_string(), capability))
            .collect();
        Self { handlers }
    }

    pub fn register(&mut self, capability: Box<dyn Capability>) -> Result<(), CapabilityError> {
        let name = capability.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(CapabilityError::Duplicate(name));
        }
        self.handlers.insert(name, capability);
        Ok(())
    }

    /// Startup check: the loop cannot terminate without the completion capability.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        if !self.handlers.contains_key(COMPLETION_CAPABILITY) {
            return Err(CapabilityError::MissingCompletion);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Capability> {
        self.handlers.get(name).map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

fn builtins() -> Vec<Box<dyn Capability>> {
    vec![
        Box::new(TaskComplete),
        Box::new(SpawnChildServo),
        Box::new(AddToScratchpad),
    ]
}

/// Writes the completion marker with the agent's summary.
pub struct TaskComplete;

impl Capability for TaskComplete {
    fn name(&self) -> &str {
        COMPLETION_CAPABILITY
    }

    fn invoke(&self, ctx: &mut CapabilityContext<'_>, args: &Map<String, Value>) -> Result<Value> {
        let summary = required_str(self.name(), args, "summary")?;
        write_json(&ctx.workspace.complete_marker, &json!({ "summary": summary }))?;
        info!(summary, "task declared complete");
        Ok(json!({"status": "ok", "complete": true}))
    }
}

/// Asks the orchestrator to spawn a child unit for another prompt.
pub struct SpawnChildServo;

impl Capability for SpawnChildServo {
    fn name(&self) -> &str {
        "spawn_child_servo"
    }

    fn invoke(&self, ctx: &mut CapabilityContext<'_>, args: &Map<String, Value>) -> Result<Value> {
        let prompt = required_str(self.name(), args, "prompt_file_path")?;
        let request = &ctx.workspace.spawn_child;
        write_json(request, &json!({ "prompt": prompt }))?;
        Ok(json!({"status": "ok", "request": request.display().to_string()}))
    }
}

/// Stores a free-form note in the scratchpad.
pub struct AddToScratchpad;

impl Capability for AddToScratchpad {
    fn name(&self) -> &str {
        "add_to_scratchpad"
    }

    fn invoke(&self, ctx: &mut CapabilityContext<'_>, args: &Map<String, Value>) -> Result<Value> {
        let key = required_str(self.name(), args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| CapabilityError::MissingArgument {
                capability: self.name().to_string(),
                arg: "value".to_string(),
            })?;
        if !ctx.scratchpad.set_note(key, value) {
            return Err(CapabilityError::ReservedKey {
                capability: self.name().to_string(),
                key: key.to_string(),
            }
            .into());
        }
        Ok(json!({"status": "ok"}))
    }
}

fn required_str<'a>(
    capability: &str,
    args: &'a Map<String, Value>,
    arg: &str,
) -> Result<&'a str, CapabilityError> {
    match args.get(arg) {
        None => Err(CapabilityError::MissingArgument {
            capability: capability.to_string(),
            arg: arg.to_string(),
        }),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(CapabilityError::InvalidArgument {
            capability: capability.to_string(),
            arg: arg.to_string(),
            expected: "a string",
        }),
    }
}
