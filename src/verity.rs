// CLASSIFICATION: COMMUNITY
// Filename: verity.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! dm-verity backed model pack mounting.
//!
//! A model pack identifier has the form `<roothash>_<offset>_<uuid>`. The
//! identifier comes from the measured config but is still treated as
//! untrusted text: every field is format-checked before it reaches a device
//! path or a subprocess argument.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{NodeConfig, PathsConfig};
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{CommandRunner, Invocation};
use crate::trusted::TrustedConfig;
use crate::validate;

const STEP: &str = "models";

/// Parsed model pack identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPackId {
    root_hash: String,
    hash_offset: u64,
    uuid: String,
}

impl ModelPackId {
    /// Split and validate `<roothash>_<offset>_<uuid>`.
    pub fn parse(identifier: &str) -> Result<Self, NodeError> {
        let parts: Vec<&str> = identifier.split('_').collect();
        let [root_hash, offset, uuid] = parts.as_slice() else {
            return Err(NodeError::invalid("model pack identifier", identifier));
        };
        if !validate::is_hex_digest(root_hash) {
            return Err(NodeError::invalid("model pack root hash", *root_hash));
        }
        if !validate::is_offset(offset) {
            return Err(NodeError::invalid("model pack hash offset", *offset));
        }
        if !validate::is_uuid(uuid) {
            return Err(NodeError::invalid("model pack uuid", *uuid));
        }
        let hash_offset = offset
            .parse::<u64>()
            .map_err(|_| NodeError::invalid("model pack hash offset", *offset))?;
        Ok(Self {
            root_hash: (*root_hash).to_owned(),
            hash_offset,
            uuid: (*uuid).to_owned(),
        })
    }

    #[must_use]
    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    #[must_use]
    pub fn hash_offset(&self) -> u64 {
        self.hash_offset
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Device-mapper name, `mpk-<roothash>`.
    #[must_use]
    pub fn device_name(&self) -> String {
        format!("mpk-{}", self.root_hash)
    }
}

impl fmt::Display for ModelPackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.root_hash, self.hash_offset, self.uuid)
    }
}

/// A verified, read-only mounted pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedPack {
    pub id: ModelPackId,
    pub mapper_device: PathBuf,
    pub mount_point: PathBuf,
}

/// Opens verity mappings and mounts them read-only.
pub struct IntegrityMounter {
    runner: Arc<dyn CommandRunner>,
    paths: PathsConfig,
    timeout: Duration,
    diag: Diagnostics,
}

impl IntegrityMounter {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            paths: config.paths.clone(),
            timeout: config.boot.command_timeout(),
            diag,
        }
    }

    /// Validate `identifier`, open its verity mapping and mount it.
    pub fn mount(&self, identifier: &str) -> Result<MountedPack, NodeError> {
        let id = ModelPackId::parse(identifier).map_err(|e| {
            self.diag.error(STEP, format!("rejected {identifier:?}: {e}"));
            e
        })?;

        let name = id.device_name();
        let block = self.paths.disk_by_uuid.join(id.uuid());
        let block = block.to_string_lossy();
        let mapper_device = self.paths.mapper_dir.join(&name);
        let mount_point = self.paths.model_root().join(&name);

        self.diag
            .info(STEP, format!("opening verity device {name} (uuid={})", id.uuid()));
        let open = Invocation::new("veritysetup", self.timeout).args([
            "open".to_owned(),
            block.to_string(),
            name.clone(),
            block.to_string(),
            id.root_hash().to_owned(),
            format!("--hash-offset={}", id.hash_offset()),
        ]);
        self.step(&open, &name)?;

        fs::create_dir_all(&mount_point).map_err(|e| NodeError::Mount {
            target: mount_point.display().to_string(),
            detail: format!("creating mount point: {e}"),
        })?;

        let mount = Invocation::new("mount", self.timeout).args([
            "-o".to_owned(),
            "ro".to_owned(),
            mapper_device.to_string_lossy().into_owned(),
            mount_point.to_string_lossy().into_owned(),
        ]);
        self.step(&mount, &mount_point.display().to_string())?;

        self.diag.info(
            STEP,
            format!("mounted model pack {name} at {}", mount_point.display()),
        );
        Ok(MountedPack {
            id,
            mapper_device,
            mount_point,
        })
    }

    /// Mount every pack in order, stopping at the first failure.
    pub fn mount_all(&self, config: &TrustedConfig) -> Result<Vec<MountedPack>, NodeError> {
        if config.models().is_empty() {
            self.diag.info(STEP, "no models to mount");
            return Ok(Vec::new());
        }
        self.diag
            .info(STEP, format!("mounting {} model packs", config.models().len()));
        config
            .models()
            .iter()
            .map(|m| self.mount(&m.mpk))
            .collect()
    }

    fn step(&self, invocation: &Invocation, target: &str) -> Result<(), NodeError> {
        let mount_err = |detail: String| NodeError::Mount {
            target: target.to_owned(),
            detail,
        };
        let out = self
            .runner
            .run(invocation)
            .map_err(|e| mount_err(format!("{}: {e}", invocation.program)))?;
        if out.success {
            Ok(())
        } else {
            Err(mount_err(format!(
                "{} exited with {:?}: {}",
                invocation.program,
                out.code,
                out.stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Invocation>>,
        fail: Option<&'static str>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput, NodeError> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.fail == Some(invocation.program.as_str()) {
                Ok(CommandOutput::failed(1, "device busy"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }
    }

    const UUID: &str = "0f5e5f3c-1b2a-4c3d-8e9f-001122334455";

    fn mounter(dir: &TempDir, runner: Arc<Recorder>) -> IntegrityMounter {
        let mut config = NodeConfig::default();
        config.paths.working_root = dir.path().to_path_buf();
        IntegrityMounter::new(&config, runner, Diagnostics::transcript(false).0)
    }

    #[test]
    fn parse_requires_three_fields() {
        let h = "a".repeat(64);
        assert!(ModelPackId::parse(&format!("{h}_0_{UUID}")).is_ok());
        assert!(ModelPackId::parse(&format!("{h}_0")).is_err());
        assert!(ModelPackId::parse(&format!("{h}_0_{UUID}_x")).is_err());
        assert!(ModelPackId::parse(&format!("{h}_-1_{UUID}")).is_err());
        assert!(ModelPackId::parse(&format!("{}_0_{UUID}", "A".repeat(64))).is_err());
    }

    #[test]
    fn mount_runs_veritysetup_then_mount() {
        let dir = TempDir::new().unwrap();
        let rec = Arc::new(Recorder::default());
        let h = "b".repeat(64);
        let pack = mounter(&dir, rec.clone())
            .mount(&format!("{h}_4096_{UUID}"))
            .unwrap();

        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "veritysetup");
        assert_eq!(
            calls[0].args,
            vec![
                "open".to_owned(),
                format!("/dev/disk/by-uuid/{UUID}"),
                format!("mpk-{h}"),
                format!("/dev/disk/by-uuid/{UUID}"),
                h.clone(),
                "--hash-offset=4096".to_owned(),
            ]
        );
        assert_eq!(calls[1].program, "mount");
        assert_eq!(
            &calls[1].args[..3],
            &["-o".to_owned(), "ro".to_owned(), format!("/dev/mapper/mpk-{h}")]
        );
        assert!(pack.mount_point.is_dir());
        assert_eq!(pack.mount_point, dir.path().join("mpk").join(format!("mpk-{h}")));
    }

    #[test]
    fn veritysetup_failure_is_mount_error_without_mount_call() {
        let dir = TempDir::new().unwrap();
        let rec = Arc::new(Recorder {
            fail: Some("veritysetup"),
            ..Recorder::default()
        });
        let err = mounter(&dir, rec.clone())
            .mount(&format!("{}_0_{UUID}", "c".repeat(64)))
            .unwrap_err();
        assert_eq!(err.kind(), "mount");
        assert_eq!(rec.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_identifier_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let rec = Arc::new(Recorder::default());
        let err = mounter(&dir, rec.clone()).mount("abc_0_uuid").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(rec.calls.lock().unwrap().is_empty());
    }
}
