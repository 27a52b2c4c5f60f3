//! Per-task workspace layout shared by the host and the Servo unit.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Workspace root inside the unit.
pub const UNIT_WORKSPACE: &str = "/workspace";
/// Prompt bind target inside the unit (read-only).
pub const UNIT_PROMPT: &str = "/workspace/prompt.md";

pub const PROMPT_FILE: &str = "prompt.md";
pub const SCRATCHPAD_FILE: &str = "scratchpad.json";
pub const COMPLETE_MARKER_FILE: &str = "complete.json";
pub const SPAWN_CHILD_FILE: &str = "spawn_child.json";
/// Host-side name of the archived unit workspace.
pub const ARCHIVE_FILE: &str = "workspace.tar";

/// Paths of every file the agent reads or writes in one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub prompt: PathBuf,
    pub scratchpad: PathBuf,
    pub audit_log: PathBuf,
    pub session: PathBuf,
    pub complete_marker: PathBuf,
    pub spawn_child: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: &Path, task_id: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            prompt: root.join(PROMPT_FILE),
            scratchpad: root.join(SCRATCHPAD_FILE),
            audit_log: root.join(format!("servo-{task_id}-audit.log")),
            session: root.join(format!("servo-{task_id}-session.json")),
            complete_marker: root.join(COMPLETE_MARKER_FILE),
            spawn_child: root.join(SPAWN_CHILD_FILE),
        }
    }
}

/// True if the agent declared completion in `workspace`.
pub fn has_completion_marker(workspace: &Path) -> bool {
    workspace.join(COMPLETE_MARKER_FILE).exists()
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))
}

/// Write via temp file + rename so readers never observe a partial file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_paths_are_stable() {
        let paths = WorkspacePaths::new(Path::new("/workspace"), "abc");
        assert_eq!(paths.prompt, Path::new("/workspace/prompt.md"));
        assert_eq!(paths.scratchpad, Path::new("/workspace/scratchpad.json"));
        assert_eq!(paths.audit_log, Path::new("/workspace/servo-abc-audit.log"));
        assert_eq!(paths.session, Path::new("/workspace/servo-abc-session.json"));
        assert_eq!(paths.complete_marker, Path::new("/workspace/complete.json"));
        assert_eq!(paths.spawn_child, Path::new("/workspace/spawn_child.json"));
        assert_eq!(UNIT_PROMPT, format!("{UNIT_WORKSPACE}/{PROMPT_FILE}"));
    }

    #[test]
    fn marker_presence_is_an_existence_check() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!has_completion_marker(temp.path()));
        fs::write(temp.path().join(COMPLETE_MARKER_FILE), "").expect("write");
        assert!(has_completion_marker(temp.path()));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");
        write_atomic(&path, "one").expect("first write");
        write_atomic(&path, "two").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        assert!(!temp.path().join("nested").join("state.json.tmp").exists());
    }
}
