//! Host configuration stored in `saheeli.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::workspace::write_atomic;

pub const DEFAULT_CONFIG_PATH: &str = "saheeli.toml";

/// Saheeli configuration (TOML).
///
/// Edited by humans and baked into the Servo image. Missing fields default to
/// sensible values. Secrets never live here: only the *name* of the
/// environment variable holding the API key does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaheeliConfig {
    /// Model identifier sent with every chat request.
    pub model_name: String,

    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Environment variable that holds the API key.
    pub api_key_env_var: String,

    /// Image tag for Servo units.
    pub servo_image: String,

    /// Build context for `build-servo`.
    pub build_context: PathBuf,

    /// Fractional CPU limit per unit (1.0 = one core).
    pub cpu_limit: f64,

    /// Memory ceiling per unit in docker notation (e.g. `2g`).
    pub memory_limit: String,

    /// Wall-clock budget for one unit, in seconds.
    pub timeout_secs: u64,

    /// Host directory holding one workspace per task.
    pub results_dir: PathBuf,

    /// Live conversation bound inside the unit.
    pub max_messages: usize,

    /// Per-request timeout for the LLM transport, in seconds.
    pub llm_timeout_secs: u64,
}

impl Default for SaheeliConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env_var: "OPENAI_API_KEY".to_string(),
            servo_image: "saheeli-servo:latest".to_string(),
            build_context: PathBuf::from("."),
            cpu_limit: 1.0,
            memory_limit: "2g".to_string(),
            timeout_secs: 30 * 60,
            results_dir: PathBuf::from("results"),
            max_messages: 50,
            llm_timeout_secs: 5 * 60,
        }
    }
}

impl SaheeliConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cpu_limit.is_finite() && self.cpu_limit > 0.0) {
            return Err(anyhow!("cpu_limit must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.llm_timeout_secs == 0 {
            return Err(anyhow!("llm_timeout_secs must be > 0"));
        }
        if self.max_messages == 0 {
            return Err(anyhow!("max_messages must be > 0"));
        }
        for (name, value) in [
            ("model_name", &self.model_name),
            ("api_base", &self.api_base),
            ("api_key_env_var", &self.api_key_env_var),
            ("servo_image", &self.servo_image),
            ("memory_limit", &self.memory_limit),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// API key from the configured environment variable (empty if unset).
    pub fn api_key(&self) -> String {
        env::var(&self.api_key_env_var).unwrap_or_default()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SaheeliConfig::default()`.
pub fn load_config(path: &Path) -> Result<SaheeliConfig> {
    if !path.exists() {
        let cfg = SaheeliConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SaheeliConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SaheeliConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write the default config to `path` unless a file exists there.
///
/// Returns whether a file was written; `force` overwrites.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_config(path, &SaheeliConfig::default())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SaheeliConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("saheeli.toml");
        let cfg = SaheeliConfig {
            cpu_limit: 0.5,
            memory_limit: "512m".to_string(),
            ..SaheeliConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn init_writes_defaults_once_unless_forced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conf").join("saheeli.toml");

        assert!(init_config(&path, false).expect("init"));
        assert_eq!(load_config(&path).expect("load"), SaheeliConfig::default());

        fs::write(&path, "timeout_secs = 10\n").expect("edit");
        assert!(!init_config(&path, false).expect("second init"));
        assert_eq!(load_config(&path).expect("load").timeout_secs, 10);

        assert!(init_config(&path, true).expect("forced init"));
        assert_eq!(load_config(&path).expect("load"), SaheeliConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("saheeli.toml");
        fs::write(&path, "servo_image = \"custom:1\"\ntimeout_secs = 10\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.servo_image, "custom:1");
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_messages, 50);
    }

    #[test]
    fn rejects_invalid_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("saheeli.toml");

        fs::write(&path, "cpu_limit = 0.0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("cpu_limit"));

        fs::write(&path, "servo_image = \"\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("servo_image"));
    }
}
