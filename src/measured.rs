// CLASSIFICATION: COMMUNITY
// Filename: measured.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Measured configuration loading.
//!
//! The config disk is attacker-controlled; its content is only trusted once
//! its digest equals the value the boot loader placed on the kernel command
//! line. Nothing is written to working storage before that check passes.

use std::fs;
use std::io;
use std::path::Path;

use crate::cmdline::read_cmdline;
use crate::config::{NodeConfig, PathsConfig};
use crate::diag::Diagnostics;
use crate::error::{missing, NodeError};
use crate::hash::{digest, verify_bytes};
use crate::trusted::{ExternalSecrets, TrustedConfig};
use crate::validate;

const STEP: &str = "config";

/// Strip the trailing NUL padding left by fixed-size block devices.
#[must_use]
pub fn strip_padding(mut data: Vec<u8>) -> Vec<u8> {
    let len = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    data.truncate(len);
    data
}

fn read_device(what: &str, path: &Path) -> Result<Vec<u8>, NodeError> {
    if !path.exists() {
        return Err(missing(what, path));
    }
    let raw = fs::read(path).map_err(|e| NodeError::io_at("reading", path, e))?;
    Ok(strip_padding(raw))
}

/// Loads the boot specification from the config device.
#[derive(Debug, Clone)]
pub struct MeasuredConfigLoader {
    paths: PathsConfig,
    hash_param: String,
    diag: Diagnostics,
}

impl MeasuredConfigLoader {
    pub fn new(config: &NodeConfig, diag: Diagnostics) -> Self {
        Self {
            paths: config.paths.clone(),
            hash_param: config.boot.config_hash_param.clone(),
            diag,
        }
    }

    /// Reference digest embedded in the kernel command line.
    pub fn reference_digest(&self) -> Result<String, NodeError> {
        let args = read_cmdline(&self.paths.cmdline)?;
        let value = args
            .get(&self.hash_param)
            .ok_or_else(|| NodeError::invalid("config hash boot parameter", "<missing>"))?;
        validate::hex_digest("config hash boot parameter", value)?;
        Ok(value.to_owned())
    }

    /// Read, verify, stage and parse the config disk.
    pub fn load_verified(&self) -> Result<TrustedConfig, NodeError> {
        let data = read_device("config disk", &self.paths.config_device)?;
        let expected = self.reference_digest()?;

        let verified = verify_bytes("config", &expected, data).map_err(|e| {
            self.diag.error(STEP, &e);
            e
        })?;
        self.diag
            .info(STEP, format!("config hash verified: {}", verified.digest()));

        let staged = self.paths.staged_config();
        self.write_staged(&staged, verified.as_bytes())?;
        let trusted = TrustedConfig::from_verified(&verified)?;

        if let Err(e) = self.stage_external() {
            self.diag.warn(STEP, format!("external config not loaded: {e}"));
        }
        Ok(trusted)
    }

    /// Re-read the staged copy and verify it against the command line again.
    pub fn load_staged(&self) -> Result<TrustedConfig, NodeError> {
        let staged = self.paths.staged_config();
        let data = fs::read(&staged).map_err(|e| NodeError::io_at("reading", &staged, e))?;
        let expected = self.reference_digest()?;
        let verified = verify_bytes("staged config", &expected, data)?;
        TrustedConfig::from_verified(&verified)
    }

    /// Copy the external secrets device into working storage.
    pub fn stage_external(&self) -> Result<(), NodeError> {
        let data = read_device("external config disk", &self.paths.secrets_device)?;
        let staged = self.paths.staged_secrets();
        self.write_staged(&staged, &data)?;
        self.diag.info(
            STEP,
            format!("external config staged ({} bytes, {})", data.len(), digest(&data)),
        );
        Ok(())
    }

    /// Parse the staged external secrets; an absent file means no secrets.
    pub fn load_external(&self) -> Result<ExternalSecrets, NodeError> {
        let staged = self.paths.staged_secrets();
        match fs::read(&staged) {
            Ok(bytes) => ExternalSecrets::parse(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.diag.debug(STEP, "no external config staged");
                Ok(ExternalSecrets::default())
            }
            Err(e) => Err(NodeError::io_at("reading", &staged, e)),
        }
    }

    fn write_staged(&self, path: &Path, data: &[u8]) -> Result<(), NodeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| NodeError::io_at("creating", parent, e))?;
        }
        fs::write(path, data).map_err(|e| NodeError::io_at("writing", path, e))
    }
}
