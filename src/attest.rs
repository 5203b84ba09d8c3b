// CLASSIFICATION: COMMUNITY
// Filename: attest.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Accelerator attestation through external verifier commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};
use crate::topology::GpuTopology;

/// Verifies accelerator evidence for a probed topology.
pub trait Attestor: Send + Sync {
    fn attest(&self, topology: &GpuTopology) -> Result<(), NodeError>;
}

/// Runs the configured single-GPU or fabric verifier as a subprocess.
pub struct CommandAttestor {
    runner: Arc<dyn CommandRunner>,
    single_gpu: Vec<String>,
    fabric: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    diag: Diagnostics,
}

impl CommandAttestor {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            single_gpu: config.attestation.single_gpu_command.clone(),
            fabric: config.attestation.fabric_command.clone(),
            workdir: config.paths.working_root.clone(),
            timeout: config.attestation.timeout(),
            diag,
        }
    }
}

impl Attestor for CommandAttestor {
    fn attest(&self, topology: &GpuTopology) -> Result<(), NodeError> {
        let (mode, argv) = if topology.is_multi_gpu_fabric {
            ("fabric", &self.fabric)
        } else {
            ("single-gpu", &self.single_gpu)
        };
        let Some((program, args)) = argv.split_first() else {
            return Err(NodeError::invalid("attestation command", mode));
        };
        self.diag
            .info("attest", format!("running {mode} attestation verification"));
        let inv = Invocation::new(program.clone(), self.timeout)
            .args(args.iter().cloned())
            .cwd(self.workdir.clone());
        run_checked(self.runner.as_ref(), &inv)?;
        self.diag.info("attest", "GPU attestation verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use crate::process::CommandOutput;

    fn attestor(runner: Arc<RecordingRunner>) -> CommandAttestor {
        CommandAttestor::new(&NodeConfig::default(), runner, Diagnostics::transcript(false).0)
    }

    #[test]
    fn fabric_topology_selects_fabric_verifier() {
        let runner = Arc::new(RecordingRunner::new());
        attestor(runner.clone())
            .attest(&GpuTopology::classify(12, 12))
            .unwrap();
        let call = &runner.calls()[0];
        assert_eq!(call.program, "/bin/bash");
        assert!(call.args[1].contains("ppcie.verifier.verification"));
        assert_eq!(call.cwd, Some(PathBuf::from("/mnt/ramdisk")));
        assert_eq!(call.timeout, Duration::from_secs(600));
    }

    #[test]
    fn single_gpu_selects_cc_admin() {
        let runner = Arc::new(RecordingRunner::new());
        attestor(runner.clone())
            .attest(&GpuTopology::classify(1, 12))
            .unwrap();
        assert!(runner.calls()[0].args[1].contains("verifier.cc_admin"));
    }

    #[test]
    fn verifier_failure_is_propagated() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("/bin/bash", CommandOutput::failed(1, "attestation failed"));
        let err = attestor(runner).attest(&GpuTopology::classify(1, 12)).unwrap_err();
        assert_eq!(err.kind(), "command");
    }
}
