// CLASSIFICATION: COMMUNITY
// Filename: kmod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Kernel module unloading in dependency order.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};

/// Names of loaded modules, first column of `/proc/modules`.
pub fn loaded_modules(path: &Path) -> Result<BTreeSet<String>, NodeError> {
    let text = fs::read_to_string(path).map_err(|e| NodeError::io_at("reading", path, e))?;
    Ok(text
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_owned)
        .collect())
}

/// Per-module result of an unload pass.
#[derive(Debug, Default)]
pub struct UnloadOutcome {
    pub unloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, NodeError)>,
}

/// Runs bounded `rmmod` calls.
pub struct ModuleUnloader {
    runner: Arc<dyn CommandRunner>,
    proc_modules: PathBuf,
    timeout: Duration,
    diag: Diagnostics,
}

impl ModuleUnloader {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            proc_modules: config.paths.proc_modules.clone(),
            timeout: config.shutdown.module_unload_timeout(),
            diag,
        }
    }

    /// Unload `order` front to back. Modules not loaded are skipped; a
    /// failure is recorded and the next module is still attempted.
    pub fn unload(&self, order: &[String]) -> Result<UnloadOutcome, NodeError> {
        let loaded = loaded_modules(&self.proc_modules)?;
        let mut outcome = UnloadOutcome::default();
        for module in order {
            if !loaded.contains(module) {
                self.diag
                    .info("modules", format!("module {module} not loaded, skipping"));
                outcome.skipped.push(module.clone());
                continue;
            }
            self.diag.info("modules", format!("unloading {module}"));
            let inv = Invocation::new("rmmod", self.timeout).arg(module.clone());
            match run_checked(self.runner.as_ref(), &inv) {
                Ok(_) => outcome.unloaded.push(module.clone()),
                Err(e) => {
                    self.diag
                        .warn("modules", format!("failed to unload {module}: {e}"));
                    outcome.failed.push((module.clone(), e));
                }
            }
        }
        Ok(outcome)
    }
}
