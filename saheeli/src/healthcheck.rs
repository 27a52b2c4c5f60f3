//! Liveness probes for the host and unit images.

use std::path::Path;

use anyhow::{Result, bail};

use crate::io::config::load_config;

/// Host probe: the configuration loads and validates.
pub fn check_config(path: &Path) -> Result<()> {
    load_config(path)?;
    Ok(())
}

/// Unit probe: the workspace bind is mounted.
pub fn check_workspace(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("workspace missing: {}", path.display());
    }
    Ok(())
}
