//! Container runtime contract and its `docker` CLI adapter.
//!
//! The [`ContainerRuntime`] trait decouples the orchestrator from the actual
//! container engine. Production code shells out to `docker`; tests use a
//! scripted runtime that records every call without touching a daemon.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_to_file, run_command_with_timeout};

/// Failures at the container boundary that callers branch on.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("image build failed: {0}")]
    Build(String),
    #[error("container start failed: {0}")]
    Start(String),
    #[error("timed out after {}s waiting for container exit", .0.as_secs())]
    Timeout(Duration),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Opaque reference to one running unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to start one detached unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Container name, so a unit can be removed before its id is known.
    pub name: String,
    pub image: String,
    pub binds: Vec<BindMount>,
    /// Environment for the unit. Values never appear on a command line.
    pub env: Vec<(String, String)>,
    pub cpu_period: u64,
    pub cpu_quota: u64,
    /// Memory ceiling in docker size notation (e.g. `2g`).
    pub memory: String,
}

/// Abstraction over container engines.
pub trait ContainerRuntime {
    /// Build `tag` from the build context at `context`.
    fn build_image(&self, context: &Path, tag: &str) -> Result<()>;
    /// Start a detached unit and return immediately.
    fn run_detached(&self, spec: &UnitSpec) -> Result<ContainerHandle>;
    /// Block until the unit exits or `timeout` elapses ([`ContainerError::Timeout`]).
    fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64>;
    /// Write a raw tar archive of `path` inside the unit to `dest`.
    fn export_path(&self, handle: &ContainerHandle, path: &str, dest: &Path) -> Result<()>;
    /// Force-remove the unit ([`ContainerError::NotFound`] if already gone).
    fn remove(&self, handle: &ContainerHandle) -> Result<()>;
}

const BUILD_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Runtime that drives the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Budget for every call except `build` and `wait`.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        run_command_with_timeout(self.command(args), timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("{} {}", self.program, args.join(" ")))
    }
}

impl ContainerRuntime for DockerCli {
    #[instrument(skip_all, fields(tag = %tag, context = %context.display()))]
    fn build_image(&self, context: &Path, tag: &str) -> Result<()> {
        info!("building image");
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context.display().to_string(),
        ];
        let output = self.run(&args, BUILD_TIMEOUT)?;
        if output.timed_out {
            return Err(ContainerError::Build(format!(
                "timed out after {}s",
                BUILD_TIMEOUT.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            return Err(ContainerError::Build(output.stderr_lossy()).into());
        }
        info!("image built");
        Ok(())
    }

    #[instrument(skip_all, fields(name = %spec.name, image = %spec.image))]
    fn run_detached(&self, spec: &UnitSpec) -> Result<ContainerHandle> {
        let mut cmd = self.command(&run_args(spec));
        for (name, value) in &spec.env {
            cmd.env(name, value);
        }
        let output = run_command_with_timeout(cmd, self.command_timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("{} run", self.program))?;
        if output.timed_out {
            // The daemon may have created the container before the client gave up.
            warn!("docker run timed out; removing unit by name");
            let handle = ContainerHandle {
                id: spec.name.clone(),
            };
            if let Err(err) = self.remove(&handle) {
                warn!(err = ?err, "cleanup after start timeout failed");
            }
            return Err(ContainerError::Start(format!(
                "timed out after {}s",
                self.command_timeout.as_secs()
            ))
            .into());
        }
        if !output.success() {
            return Err(ContainerError::Start(output.stderr_lossy()).into());
        }
        let id = output.stdout_lossy().trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::Start("runtime returned no container id".into()).into());
        }
        debug!(container_id = %id, "container started");
        Ok(ContainerHandle { id })
    }

    #[instrument(skip_all, fields(container_id = %handle.id, timeout_secs = timeout.as_secs()))]
    fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64> {
        let output = self.run(&["wait".to_string(), handle.id.clone()], timeout)?;
        if output.timed_out {
            warn!("container did not exit in time");
            return Err(ContainerError::Timeout(timeout).into());
        }
        if !output.status.success() {
            return Err(classify_failure(&handle.id, &output.stderr_lossy()).into());
        }
        parse_exit_code(&output.stdout_lossy())
    }

    #[instrument(skip_all, fields(container_id = %handle.id, path = %path, dest = %dest.display()))]
    fn export_path(&self, handle: &ContainerHandle, path: &str, dest: &Path) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            format!("{}:{}", handle.id, path),
            "-".to_string(),
        ];
        let output = run_command_to_file(
            self.command(&args),
            dest,
            self.command_timeout,
            OUTPUT_LIMIT_BYTES,
        )
            .with_context(|| format!("{} cp", self.program))?;
        if output.timed_out {
            return Err(ContainerError::Runtime(format!(
                "copy timed out after {}s",
                self.command_timeout.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            return Err(classify_failure(&handle.id, &output.stderr_lossy()).into());
        }
        Ok(())
    }

    #[instrument(skip_all, fields(container_id = %handle.id))]
    fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), handle.id.clone()];
        let output = self.run(&args, self.command_timeout)?;
        if !output.success() {
            return Err(classify_failure(&handle.id, &output.stderr_lossy()).into());
        }
        Ok(())
    }
}

/// Arguments for `docker run`. Environment is passed by name only; the values
/// are inherited from the spawning process.
pub fn run_args(spec: &UnitSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for bind in &spec.binds {
        let mode = if bind.read_only { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!("{}:{}:{}", bind.source.display(), bind.target, mode));
    }
    for (name, _) in &spec.env {
        args.push("-e".to_string());
        args.push(name.clone());
    }
    args.push("--cpu-period".to_string());
    args.push(spec.cpu_period.to_string());
    args.push("--cpu-quota".to_string());
    args.push(spec.cpu_quota.to_string());
    args.push("--memory".to_string());
    args.push(spec.memory.clone());
    args.push(spec.image.clone());
    args
}

fn classify_failure(id: &str, stderr: &str) -> ContainerError {
    if is_missing_container(stderr) {
        ContainerError::NotFound(id.to_string())
    } else {
        ContainerError::Runtime(stderr.to_string())
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("no such container")
}

fn parse_exit_code(stdout: &str) -> Result<i64> {
    let trimmed = stdout.trim();
    trimmed
        .lines()
        .last()
        .unwrap_or_default()
        .trim()
        .parse::<i64>()
        .map_err(|_| ContainerError::Runtime(format!("unexpected wait output '{trimmed}'")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> UnitSpec {
        UnitSpec {
            name: "servo-t1".to_string(),
            image: "servo:test".to_string(),
            binds: vec![
                BindMount {
                    source: PathBuf::from("/host/prompt.md"),
                    target: "/workspace/prompt.md".to_string(),
                    read_only: true,
                },
                BindMount {
                    source: PathBuf::from("/host/results/t1"),
                    target: "/workspace".to_string(),
                    read_only: false,
                },
            ],
            env: vec![
                ("API_KEY".to_string(), "secret-value".to_string()),
                ("TASK_ID".to_string(), "t1".to_string()),
            ],
            cpu_period: 100_000,
            cpu_quota: 50_000,
            memory: "512m".to_string(),
        }
    }

    #[test]
    fn run_args_bind_mounts_and_limits() {
        let args = run_args(&spec());
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name servo-t1 "));
        assert!(joined.contains("-v /host/prompt.md:/workspace/prompt.md:ro"));
        assert!(joined.contains("-v /host/results/t1:/workspace:rw"));
        assert!(joined.contains("--cpu-period 100000 --cpu-quota 50000"));
        assert!(joined.contains("--memory 512m"));
        assert_eq!(args.last().map(String::as_str), Some("servo:test"));
    }

    #[test]
    fn run_args_never_contain_env_values() {
        let args = run_args(&spec());
        assert!(args.iter().any(|a| a == "API_KEY"));
        assert!(args.iter().any(|a| a == "TASK_ID"));
        assert!(!args.iter().any(|a| a.contains("secret-value")));
    }

    #[test]
    fn missing_container_maps_to_not_found() {
        let err = classify_failure("abc", "Error response from daemon: No such container: abc");
        assert!(matches!(err, ContainerError::NotFound(id) if id == "abc"));

        let err = classify_failure("abc", "permission denied");
        assert!(matches!(err, ContainerError::Runtime(_)));
    }

    #[cfg(unix)]
    #[test]
    fn start_timeout_removes_unit_by_name() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("calls.log");
        let program = temp.path().join("fake-docker");
        fs::write(
            &program,
            format!(
                "#!/bin/sh\necho \"$@\" >> {}\nif [ \"$1\" = run ]; then exec sleep 5; fi\n",
                log.display()
            ),
        )
        .expect("write program");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).expect("chmod");

        let docker = DockerCli::new(program.display().to_string())
            .with_command_timeout(Duration::from_millis(200));
        let err = docker.run_detached(&spec()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::Start(_))
        ));

        let calls = fs::read_to_string(&log).expect("read log");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("run -d --name servo-t1 "));
        assert_eq!(lines[1], "rm -f servo-t1");
    }

    #[test]
    fn parses_wait_output() {
        assert_eq!(parse_exit_code("0\n").expect("parse"), 0);
        assert_eq!(parse_exit_code("137").expect("parse"), 137);
        assert!(parse_exit_code("").is_err());
    }
}
