//! Container lifecycle primitives for Servo units.
//!
//! [`ContainerOrchestrator`] translates task-level requests (start a unit for
//! this prompt and workspace, collect its workspace, remove it) into calls on
//! a [`ContainerRuntime`]. It holds no task state; sequencing belongs to the
//! controller.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::config::SaheeliConfig;
use crate::io::docker::{BindMount, ContainerError, ContainerHandle, ContainerRuntime, UnitSpec};
use crate::io::workspace::{ARCHIVE_FILE, UNIT_PROMPT, UNIT_WORKSPACE, has_completion_marker};

/// Fixed CFS period; the quota is derived from `cpu_limit`.
pub const CPU_PERIOD_US: u64 = 100_000;
/// Smallest quota the kernel accepts.
const MIN_CPU_QUOTA_US: u64 = 1_000;

pub const TASK_ID_ENV: &str = "TASK_ID";
const UNIT_NAME_PREFIX: &str = "servo-";

pub struct ContainerOrchestrator<R> {
    runtime: R,
    config: SaheeliConfig,
}

impl<R: ContainerRuntime> ContainerOrchestrator<R> {
    pub fn new(runtime: R, config: SaheeliConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &SaheeliConfig {
        &self.config
    }

    /// Build the unit image. Failures are fatal and not retried.
    #[instrument(skip_all, fields(image = %self.config.servo_image))]
    pub fn build_image(&self) -> Result<()> {
        self.runtime
            .build_image(&self.config.build_context, &self.config.servo_image)
            .with_context(|| format!("build image {}", self.config.servo_image))
    }

    /// Describe the unit for one task. Bind sources are made absolute and the
    /// secret is read from the host environment now, not at image build time.
    pub fn unit_spec(&self, task_id: &str, prompt: &Path, workspace: &Path) -> Result<UnitSpec> {
        let prompt = canonical(prompt)?;
        let workspace = canonical(workspace)?;
        let api_key = self.config.api_key();
        if api_key.is_empty() {
            warn!(
                env_var = %self.config.api_key_env_var,
                "API key not set; unit will run offline"
            );
        }
        Ok(UnitSpec {
            name: format!("{UNIT_NAME_PREFIX}{task_id}"),
            image: self.config.servo_image.clone(),
            binds: vec![
                BindMount {
                    source: workspace,
                    target: UNIT_WORKSPACE.to_string(),
                    read_only: false,
                },
                BindMount {
                    source: prompt,
                    target: UNIT_PROMPT.to_string(),
                    read_only: true,
                },
            ],
            env: vec![
                (self.config.api_key_env_var.clone(), api_key),
                (TASK_ID_ENV.to_string(), task_id.to_string()),
            ],
            cpu_period: CPU_PERIOD_US,
            cpu_quota: cpu_quota(self.config.cpu_limit),
            memory: self.config.memory_limit.clone(),
        })
    }

    /// Start a detached unit. Returns as soon as the runtime reports an id.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub fn run_unit(
        &self,
        task_id: &str,
        prompt: &Path,
        workspace: &Path,
    ) -> Result<ContainerHandle> {
        let spec = self.unit_spec(task_id, prompt, workspace)?;
        let handle = self.runtime.run_detached(&spec)?;
        info!(container_id = %handle.id, "unit started");
        Ok(handle)
    }

    /// Block until the unit exits; [`ContainerError::Timeout`] past `timeout`.
    pub fn wait_for_exit(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64> {
        self.runtime.wait(handle, timeout)
    }

    pub fn check_complete(&self, workspace: &Path) -> bool {
        has_completion_marker(workspace)
    }

    /// Archive the unit's `/workspace` into `dest/workspace.tar` (not unpacked).
    #[instrument(skip_all, fields(container_id = %handle.id, dest = %dest.display()))]
    pub fn copy_workspace(&self, handle: &ContainerHandle, dest: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
        let archive = dest.join(ARCHIVE_FILE);
        self.runtime
            .export_path(handle, UNIT_WORKSPACE, &archive)
            .with_context(|| format!("copy workspace to {}", archive.display()))?;
        Ok(archive)
    }

    /// Force-remove the unit. A unit that is already gone counts as removed.
    #[instrument(skip_all, fields(container_id = %handle.id))]
    pub fn remove_unit(&self, handle: &ContainerHandle) -> Result<()> {
        let Err(err) = self.runtime.remove(handle) else {
            return Ok(());
        };
        if let Some(ContainerError::NotFound(_)) = err.downcast_ref::<ContainerError>() {
            info!("unit already removed");
            return Ok(());
        }
        Err(err)
    }
}

pub fn cpu_quota(cpu_limit: f64) -> u64 {
    let quota = (cpu_limit * CPU_PERIOD_US as f64).round();
    if quota.is_finite() && quota > MIN_CPU_QUOTA_US as f64 {
        quota as u64
    } else {
        MIN_CPU_QUOTA_US
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolve {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RuntimeCall, ScriptedRuntime};

    fn config() -> SaheeliConfig {
        SaheeliConfig {
            api_key_env_var: "SAHEELI_TEST_UNSET_KEY".to_string(),
            cpu_limit: 0.5,
            memory_limit: "512m".to_string(),
            ..SaheeliConfig::default()
        }
    }

    #[test]
    fn cpu_quota_scales_with_limit() {
        assert_eq!(cpu_quota(1.0), 100_000);
        assert_eq!(cpu_quota(0.5), 50_000);
        assert_eq!(cpu_quota(2.25), 225_000);
        assert_eq!(cpu_quota(0.001), MIN_CPU_QUOTA_US);
    }

    #[test]
    fn unit_spec_binds_prompt_read_only_and_workspace_read_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prompt = temp.path().join("prompt.md");
        fs::write(&prompt, "p").expect("write prompt");
        let workspace = temp.path().join("results").join("t1");
        fs::create_dir_all(&workspace).expect("mkdir");

        let orchestrator = ContainerOrchestrator::new(ScriptedRuntime::default(), config());
        let spec = orchestrator
            .unit_spec("t1", &prompt, &workspace)
            .expect("spec");

        let prompt_bind = spec
            .binds
            .iter()
            .find(|b| b.target == "/workspace/prompt.md")
            .expect("prompt bind");
        assert!(prompt_bind.read_only);
        assert!(prompt_bind.source.is_absolute());

        let workspace_bind = spec
            .binds
            .iter()
            .find(|b| b.target == "/workspace")
            .expect("workspace bind");
        assert!(!workspace_bind.read_only);
        assert_eq!(
            workspace_bind.source,
            fs::canonicalize(&workspace).expect("canonical")
        );

        assert_eq!(spec.name, "servo-t1");
        assert_eq!(spec.cpu_period, 100_000);
        assert_eq!(spec.cpu_quota, 50_000);
        assert_eq!(spec.memory, "512m");
        assert!(spec.env.contains(&("TASK_ID".to_string(), "t1".to_string())));
        assert!(spec.env.iter().any(|(name, _)| name == "SAHEELI_TEST_UNSET_KEY"));
    }

    #[test]
    fn unit_spec_requires_existing_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = ContainerOrchestrator::new(ScriptedRuntime::default(), config());
        let err = orchestrator
            .unit_spec("t1", &temp.path().join("missing.md"), temp.path())
            .unwrap_err();
        assert!(format!("{err:#}").contains("missing.md"));
    }

    #[test]
    fn copy_workspace_creates_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = ScriptedRuntime::default();
        let orchestrator = ContainerOrchestrator::new(runtime, config());
        let handle = ContainerHandle {
            id: "c1".to_string(),
        };

        let dest = temp.path().join("new").join("t1");
        let archive = orchestrator.copy_workspace(&handle, &dest).expect("copy");
        assert_eq!(archive, dest.join("workspace.tar"));
        assert!(archive.exists());
        assert_eq!(
            orchestrator.runtime().calls(),
            vec![RuntimeCall::Export {
                id: "c1".to_string(),
                path: "/workspace".to_string(),
            }]
        );
    }

    #[test]
    fn removing_twice_is_not_an_error() {
        let orchestrator = ContainerOrchestrator::new(ScriptedRuntime::default(), config());
        let handle = ContainerHandle {
            id: "c1".to_string(),
        };
        orchestrator.remove_unit(&handle).expect("first remove");
        orchestrator.remove_unit(&handle).expect("second remove");
        assert_eq!(orchestrator.runtime().calls().len(), 2);
    }

    #[test]
    fn runtime_errors_other_than_not_found_propagate() {
        let runtime = ScriptedRuntime::default();
        runtime.fail_removals("daemon unavailable");
        let orchestrator = ContainerOrchestrator::new(runtime, config());
        let handle = ContainerHandle {
            id: "c1".to_string(),
        };
        let err = orchestrator.remove_unit(&handle).unwrap_err();
        assert!(err.to_string().contains("daemon unavailable"));
    }
}
