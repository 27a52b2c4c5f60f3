//! Host-side task lifecycle.
//!
//! [`OrchestrationController`] owns the task registry and drives one task at
//! a time through `Pending → Running → {Complete, Incomplete}`. Every host
//! failure (start, wait, copy, removal) converges on a terminal status; none
//! escapes `launch_next`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::classifier::classify_outcome;
use crate::core::registry::TaskRegistry;
use crate::core::types::{Task, TaskStatus};
use crate::io::config::SaheeliConfig;
use crate::io::docker::{ContainerError, ContainerRuntime};
use crate::orchestrator::ContainerOrchestrator;

/// Exit code recorded when a unit overruns its wall-clock budget.
pub const TIMEOUT_EXIT_CODE: i64 = 124;
/// Exit code recorded when waiting on a unit fails for any other reason.
pub const WAIT_FAILED_EXIT_CODE: i64 = 1;

/// How one launched task was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub task_id: String,
    /// `None` when the unit never started.
    pub exit_code: Option<i64>,
    pub marker_present: bool,
    pub status: TaskStatus,
}

pub struct OrchestrationController<R> {
    orchestrator: ContainerOrchestrator<R>,
    registry: Mutex<TaskRegistry>,
    launch: Mutex<()>,
    results_dir: PathBuf,
    timeout: Duration,
}

impl<R: ContainerRuntime> OrchestrationController<R> {
    pub fn new(runtime: R, config: SaheeliConfig) -> Self {
        let results_dir = config.results_dir.clone();
        let timeout = config.timeout();
        Self {
            orchestrator: ContainerOrchestrator::new(runtime, config),
            registry: Mutex::new(TaskRegistry::new()),
            launch: Mutex::new(()),
            results_dir,
            timeout,
        }
    }

    pub fn orchestrator(&self) -> &ContainerOrchestrator<R> {
        &self.orchestrator
    }

    fn registry(&self) -> MutexGuard<'_, TaskRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a prompt; returns the new task id.
    pub fn submit(&self, prompt: impl Into<PathBuf>) -> String {
        let prompt = prompt.into();
        let id = self.registry().add_task(prompt.clone());
        info!(task_id = %id, prompt = %prompt.display(), "task submitted");
        id
    }

    /// Snapshot of every task in submission order.
    pub fn status(&self) -> Vec<Task> {
        self.registry().list_tasks()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.registry().get(id)
    }

    pub fn build_servo_image(&self) -> Result<()> {
        self.orchestrator.build_image()
    }

    /// Host directory holding the workspace of `task_id`.
    pub fn workspace_dir(&self, task_id: &str) -> PathBuf {
        self.results_dir.join(task_id)
    }

    /// Run the earliest pending task to a terminal status.
    ///
    /// Returns `None` when nothing is pending. The completion marker is read
    /// before the workspace is archived, and the unit is removed after the
    /// archive whatever the outcome.
    pub fn launch_next(&self) -> Option<LaunchOutcome> {
        let _launch = self.launch.lock().unwrap_or_else(PoisonError::into_inner);
        let task = {
            let mut registry = self.registry();
            let task = registry.next_task()?;
            self.set_status(&mut registry, &task.id, TaskStatus::Running);
            task
        };
        let outcome = self.execute(&task);
        self.set_status(&mut self.registry(), &task.id, outcome.status);
        Some(outcome)
    }

    /// Launch until no task is pending; outcomes in launch order.
    pub fn drain(&self) -> Vec<LaunchOutcome> {
        std::iter::from_fn(|| self.launch_next()).collect()
    }

    fn set_status(&self, registry: &mut TaskRegistry, id: &str, status: TaskStatus) {
        if !registry.update_status(id, status) {
            warn!(task_id = %id, %status, "status update ignored");
        }
    }

    #[instrument(skip_all, fields(task_id = %task.id))]
    fn execute(&self, task: &Task) -> LaunchOutcome {
        let workspace = self.workspace_dir(&task.id);
        let incomplete = |exit_code| LaunchOutcome {
            task_id: task.id.clone(),
            exit_code,
            marker_present: false,
            status: TaskStatus::Incomplete,
        };

        if let Err(err) = ensure_dir(&workspace) {
            error!(err = ?err, "workspace setup failed");
            return incomplete(None);
        }

        let handle = match self
            .orchestrator
            .run_unit(&task.id, &task.prompt, &workspace)
        {
            Ok(handle) => handle,
            Err(err) => {
                error!(err = ?err, "unit failed to start");
                return incomplete(None);
            }
        };

        let exit_code = match self.orchestrator.wait_for_exit(&handle, self.timeout) {
            Ok(code) => code,
            Err(err) => {
                let forced = match err.downcast_ref::<ContainerError>() {
                    Some(ContainerError::Timeout(_)) => TIMEOUT_EXIT_CODE,
                    _ => WAIT_FAILED_EXIT_CODE,
                };
                error!(err = ?err, exit_code = forced, "wait failed");
                forced
            }
        };

        let marker_present = self.orchestrator.check_complete(&workspace);

        if let Err(err) = self.orchestrator.copy_workspace(&handle, &workspace) {
            warn!(err = ?err, "workspace copy failed");
        }
        if let Err(err) = self.orchestrator.remove_unit(&handle) {
            warn!(err = ?err, "unit removal failed");
        }

        let status = classify_outcome(exit_code, marker_present);
        info!(exit_code, marker_present, %status, "task finished");
        LaunchOutcome {
            task_id: task.id.clone(),
            exit_code: Some(exit_code),
            marker_present,
            status,
        }
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create {}", path.display()))
}
