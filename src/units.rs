// CLASSIFICATION: COMMUNITY
// Filename: units.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Service manager collaborator.

use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};

/// Start and stop init-system units.
pub trait ServiceManager: Send + Sync {
    /// Start `unit` and wait for the job to finish.
    fn start(&self, unit: &str) -> Result<(), NodeError>;
    /// Stop `unit` and wait for the job to finish.
    fn stop(&self, unit: &str) -> Result<(), NodeError>;
}

/// `systemctl` backed service manager.
pub struct Systemctl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    timeout: Duration,
    diag: Diagnostics,
}

impl Systemctl {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            binary: config.units.systemctl.clone(),
            timeout: config.units.timeout(),
            diag,
        }
    }

    fn job(&self, verb: &str, unit: &str) -> Result<(), NodeError> {
        if unit.is_empty() || unit.starts_with('-') {
            return Err(NodeError::invalid("unit name", unit));
        }
        let inv = Invocation::new(self.binary.clone(), self.timeout).args([verb, unit]);
        run_checked(self.runner.as_ref(), &inv)?;
        self.diag.info("units", format!("{verb} {unit}: done"));
        Ok(())
    }
}

impl ServiceManager for Systemctl {
    fn start(&self, unit: &str) -> Result<(), NodeError> {
        self.job("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<(), NodeError> {
        self.job("stop", unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use crate::process::CommandOutput;

    #[test]
    fn start_and_stop_call_systemctl() {
        let runner = Arc::new(RecordingRunner::new());
        let diag = Diagnostics::transcript(false).0;
        let units = Systemctl::new(&NodeConfig::default(), runner.clone(), diag);
        units.start("tfshim.service").unwrap();
        units.stop("nvidia-persistenced.service").unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].display(), "systemctl start tfshim.service");
        assert_eq!(calls[1].display(), "systemctl stop nvidia-persistenced.service");
        assert_eq!(calls[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn failed_job_is_command_error() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("systemctl", CommandOutput::failed(5, "Unit not found."));
        let units =
            Systemctl::new(&NodeConfig::default(), runner, Diagnostics::transcript(false).0);
        assert_eq!(units.start("missing.service").unwrap_err().kind(), "command");
    }

    #[test]
    fn flag_like_unit_is_rejected() {
        let runner = Arc::new(RecordingRunner::new());
        let diag = Diagnostics::transcript(false).0;
        let units = Systemctl::new(&NodeConfig::default(), runner.clone(), diag);
        assert!(units.stop("--all").is_err());
        assert!(runner.calls().is_empty());
    }
}
