// CLASSIFICATION: COMMUNITY
// Filename: storage.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Memory-backed working storage.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};

const STEP: &str = "storage";

/// `size=` value accepted by tmpfs: digits with an optional k/m/g or % suffix.
fn is_tmpfs_size(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M', 'g', 'G', '%']);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && value.len() - digits.len() <= 1
}

/// Mounts the working root and scratch tmpfs filesystems.
pub struct WorkingStorage {
    runner: Arc<dyn CommandRunner>,
    working_root: PathBuf,
    tmp_root: PathBuf,
    working_size: String,
    tmp_size: String,
    skip_tmpfs: bool,
    timeout: Duration,
    diag: Diagnostics,
}

impl WorkingStorage {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            working_root: config.paths.working_root.clone(),
            tmp_root: config.paths.tmp_root.clone(),
            working_size: config.boot.working_size.clone(),
            tmp_size: config.boot.tmp_size.clone(),
            skip_tmpfs: config.boot.skip_tmpfs,
            timeout: config.boot.command_timeout(),
            diag,
        }
    }

    fn mount_tmpfs(&self, target: &Path, options: String) -> Result<(), NodeError> {
        let inv = Invocation::new("mount", self.timeout)
            .args(["-t", "tmpfs", "-o"])
            .arg(options)
            .arg("tmpfs")
            .arg(target.to_string_lossy());
        run_checked(self.runner.as_ref(), &inv).map_err(|e| NodeError::Mount {
            target: target.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    /// Create the working root and mount tmpfs on it and on the scratch root.
    pub fn prepare(&self) -> Result<(), NodeError> {
        for size in [&self.working_size, &self.tmp_size] {
            if !is_tmpfs_size(size) {
                return Err(NodeError::invalid("tmpfs size", size.as_str()));
            }
        }
        fs::create_dir_all(&self.working_root)
            .map_err(|e| NodeError::io_at("creating", &self.working_root, e))?;
        if self.skip_tmpfs {
            self.diag.info(
                STEP,
                format!("using existing storage at {}", self.working_root.display()),
            );
            return Ok(());
        }

        self.mount_tmpfs(
            &self.working_root,
            format!("size={},mode=0777", self.working_size),
        )?;
        self.mount_tmpfs(&self.tmp_root, format!("size={}", self.tmp_size))?;
        self.diag.info(
            STEP,
            format!(
                "working storage mounted at {} (size={})",
                self.working_root.display(),
                self.working_size
            ),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use crate::process::CommandOutput;
    use tempfile::TempDir;

    fn storage(dir: &TempDir, runner: Arc<RecordingRunner>, skip: bool) -> WorkingStorage {
        let mut config = NodeConfig::default();
        config.paths.working_root = dir.path().join("ramdisk");
        config.paths.tmp_root = dir.path().join("tmp");
        config.boot.skip_tmpfs = skip;
        WorkingStorage::new(&config, runner, Diagnostics::transcript(false).0)
    }

    #[test]
    fn size_syntax() {
        assert!(is_tmpfs_size("75%"));
        assert!(is_tmpfs_size("512M"));
        assert!(is_tmpfs_size("4096"));
        assert!(!is_tmpfs_size("512MM"));
        assert!(!is_tmpfs_size("1G,exec"));
        assert!(!is_tmpfs_size(""));
    }

    #[test]
    fn mounts_working_root_then_scratch() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        storage(&dir, runner.clone(), false).prepare().unwrap();
        assert!(dir.path().join("ramdisk").is_dir());
        let root = dir.path().join("ramdisk");
        let tmp = dir.path().join("tmp");
        assert_eq!(
            runner.lines(),
            vec![
                format!("mount -t tmpfs -o size=75%,mode=0777 tmpfs {}", root.display()),
                format!("mount -t tmpfs -o size=512M tmpfs {}", tmp.display()),
            ]
        );
    }

    #[test]
    fn skip_tmpfs_only_creates_directory() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        storage(&dir, runner.clone(), true).prepare().unwrap();
        assert!(dir.path().join("ramdisk").is_dir());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn mount_failure_is_mount_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("mount", CommandOutput::failed(32, "permission denied"));
        let err = storage(&dir, runner, false).prepare().unwrap_err();
        assert_eq!(err.kind(), "mount");
    }
}
