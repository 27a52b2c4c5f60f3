//! Test doubles shared by unit and integration tests.
//!
//! [`ScriptedRuntime`] stands in for the container engine: every call is
//! recorded in order, and each started unit follows a [`UnitScript`] that
//! decides its exit and whether it leaves a completion marker behind.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::io::config::SaheeliConfig;
use crate::io::docker::{ContainerError, ContainerHandle, ContainerRuntime, UnitSpec};
use crate::io::workspace::{COMPLETE_MARKER_FILE, PROMPT_FILE, UNIT_WORKSPACE};

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Build { context: PathBuf, tag: String },
    Run(UnitSpec),
    Wait { id: String },
    Export { id: String, path: String },
    Remove { id: String },
}

impl RuntimeCall {
    /// Short name used for ordering assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Build { .. } => "build",
            Self::Run(_) => "run",
            Self::Wait { .. } => "wait",
            Self::Export { .. } => "export",
            Self::Remove { .. } => "remove",
        }
    }
}

/// How a scripted unit's wait resolves.
#[derive(Debug, Clone)]
pub enum ScriptedExit {
    Code(i64),
    Timeout,
    Error(String),
}

/// Behavior of one scripted unit.
#[derive(Debug, Clone)]
pub struct UnitScript {
    /// Fail `run_detached` with this message instead of starting.
    pub start_error: Option<String>,
    pub exit: ScriptedExit,
    /// Write the completion marker into the workspace when the unit starts.
    pub write_marker: bool,
    /// Write the completion marker during export, after the unit has exited.
    pub marker_on_export: bool,
}

impl UnitScript {
    pub fn exit(code: i64) -> Self {
        Self {
            start_error: None,
            exit: ScriptedExit::Code(code),
            write_marker: false,
            marker_on_export: false,
        }
    }

    /// Exit `code` after writing the completion marker.
    pub fn marked(code: i64) -> Self {
        Self {
            write_marker: true,
            ..Self::exit(code)
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit: ScriptedExit::Timeout,
            ..Self::exit(0)
        }
    }

    pub fn wait_error(message: &str) -> Self {
        Self {
            exit: ScriptedExit::Error(message.to_string()),
            ..Self::exit(0)
        }
    }

    pub fn start_error(message: &str) -> Self {
        Self {
            start_error: Some(message.to_string()),
            ..Self::exit(0)
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    scripts: VecDeque<UnitScript>,
    calls: Vec<RuntimeCall>,
    units: Vec<(String, PathBuf, UnitScript)>,
    removed: HashSet<String>,
    removal_error: Option<String>,
    export_error: Option<String>,
}

/// Container runtime that follows scripts instead of talking to a daemon.
///
/// Units without a script exit 0 without writing a marker.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    state: Mutex<RuntimeState>,
}

impl ScriptedRuntime {
    pub fn new(scripts: Vec<UnitScript>) -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                scripts: scripts.into(),
                ..RuntimeState::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn call_kinds(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(RuntimeCall::kind).collect()
    }

    /// Make every later removal fail with a runtime error.
    pub fn fail_removals(&self, message: &str) {
        self.lock().removal_error = Some(message.to_string());
    }

    /// Make every later export fail with a runtime error.
    pub fn fail_exports(&self, message: &str) {
        self.lock().export_error = Some(message.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unit(&self, id: &str) -> Option<(PathBuf, UnitScript)> {
        self.lock()
            .units
            .iter()
            .find(|(unit_id, _, _)| unit_id == id)
            .map(|(_, workspace, script)| (workspace.clone(), script.clone()))
    }
}

impl ContainerRuntime for ScriptedRuntime {
    fn build_image(&self, context: &Path, tag: &str) -> Result<()> {
        self.lock().calls.push(RuntimeCall::Build {
            context: context.to_path_buf(),
            tag: tag.to_string(),
        });
        Ok(())
    }

    fn run_detached(&self, spec: &UnitSpec) -> Result<ContainerHandle> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Run(spec.clone()));
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| UnitScript::exit(0));
        if let Some(message) = &script.start_error {
            return Err(ContainerError::Start(message.clone()).into());
        }
        let workspace = spec
            .binds
            .iter()
            .find(|bind| bind.target == UNIT_WORKSPACE)
            .map(|bind| bind.source.clone())
            .ok_or_else(|| anyhow!("unit spec has no workspace bind"))?;
        if script.write_marker {
            fs::write(workspace.join(COMPLETE_MARKER_FILE), "{\"summary\": \"scripted\"}\n")?;
        }
        let id = format!("unit-{}", state.units.len() + 1);
        state.units.push((id.clone(), workspace, script));
        Ok(ContainerHandle { id })
    }

    fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64> {
        self.lock().calls.push(RuntimeCall::Wait {
            id: handle.id.clone(),
        });
        let (_, script) = self
            .unit(&handle.id)
            .ok_or_else(|| ContainerError::NotFound(handle.id.clone()))?;
        match script.exit {
            ScriptedExit::Code(code) => Ok(code),
            ScriptedExit::Timeout => Err(ContainerError::Timeout(timeout).into()),
            ScriptedExit::Error(message) => Err(ContainerError::Runtime(message).into()),
        }
    }

    fn export_path(&self, handle: &ContainerHandle, path: &str, dest: &Path) -> Result<()> {
        {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Export {
                id: handle.id.clone(),
                path: path.to_string(),
            });
            if let Some(message) = &state.export_error {
                return Err(ContainerError::Runtime(message.clone()).into());
            }
        }
        if let Some((workspace, script)) = self.unit(&handle.id) {
            if script.marker_on_export {
                fs::write(workspace.join(COMPLETE_MARKER_FILE), "{\"summary\": \"late\"}\n")?;
            }
        }
        fs::write(dest, b"scripted archive")?;
        Ok(())
    }

    fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Remove {
            id: handle.id.clone(),
        });
        if let Some(message) = &state.removal_error {
            return Err(ContainerError::Runtime(message.clone()).into());
        }
        if !state.removed.insert(handle.id.clone()) {
            return Err(ContainerError::NotFound(handle.id.clone()).into());
        }
        Ok(())
    }
}

/// Write a prompt file under `dir` and return its path.
pub fn write_prompt(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

/// Parse every record of a newline-delimited JSON audit log.
pub fn read_audit(path: &Path) -> Result<Vec<Value>> {
    let contents = fs::read_to_string(path)?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Count audit records with the given `role`.
pub fn count_role(records: &[Value], role: &str) -> usize {
    records
        .iter()
        .filter(|record| record["role"] == role)
        .count()
}

/// Temporary host layout: a prompts directory and a results directory.
pub struct TestHost {
    temp: tempfile::TempDir,
}

impl TestHost {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root().join("results")
    }

    /// Defaults pointed at this host, with an API key variable nobody sets.
    pub fn config(&self) -> SaheeliConfig {
        SaheeliConfig {
            results_dir: self.results_dir(),
            api_key_env_var: "SAHEELI_TEST_UNSET_KEY".to_string(),
            ..SaheeliConfig::default()
        }
    }

    pub fn prompt(&self, name: &str, contents: &str) -> Result<PathBuf> {
        write_prompt(&self.root().join("prompts"), name, contents)
    }

    /// Fresh unit workspace holding `prompt.md`.
    pub fn workspace(&self, name: &str, prompt: &str) -> Result<PathBuf> {
        let workspace = self.root().join(name);
        write_prompt(&workspace, PROMPT_FILE, prompt)?;
        Ok(workspace)
    }
}
