// CLASSIFICATION: COMMUNITY
// Filename: boot.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Ordered boot pipeline.
//!
//! Storage, topology, attestation, measured config, registry credentials,
//! model packs, workloads, shim. Every step except registry credentials is
//! fatal; the first fatal failure stops the pipeline.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::attest::{Attestor, CommandAttestor};
use crate::config::NodeConfig;
use crate::credentials::CredentialWriter;
use crate::diag::Diagnostics;
use crate::measured::MeasuredConfigLoader;
use crate::process::{CommandRunner, SystemRunner};
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::shim::{Fetcher, ShimInstaller, UreqFetcher};
use crate::storage::WorkingStorage;
use crate::topology::{GpuTopology, TopologyProbe};
use crate::trusted::{ExternalSecrets, TrustedConfig};
use crate::units::{ServiceManager, Systemctl};
use crate::verity::{IntegrityMounter, MountedPack};
use crate::workload::launch_workloads;

/// How a boot step failure affects the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSeverity {
    /// Boot stops and the process exits non-zero.
    Fatal,
    /// Logged; boot continues.
    Warning,
}

impl fmt::Display for BootSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fatal => "fatal",
            Self::Warning => "warning",
        })
    }
}

/// A failed boot step.
#[derive(Debug, Error)]
#[error("boot step {step} failed ({severity}): {source}")]
pub struct BootFailure {
    pub step: &'static str,
    pub severity: BootSeverity,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl BootFailure {
    fn fatal(step: &'static str, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            step,
            severity: BootSeverity::Fatal,
            source: source.into(),
        }
    }

    fn warning(step: &'static str, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            step,
            severity: BootSeverity::Warning,
            source: source.into(),
        }
    }
}

/// External collaborators used by the boot path.
#[derive(Clone)]
pub struct BootDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub services: Arc<dyn ServiceManager>,
    pub attestor: Arc<dyn Attestor>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl BootDeps {
    /// Production collaborators: subprocesses, `docker`, `systemctl`, HTTPS.
    pub fn system(config: &NodeConfig, diag: &Diagnostics) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(diag.clone()));
        Self {
            runtime: Arc::new(DockerCli::new(config, runner.clone(), diag.clone())),
            services: Arc::new(Systemctl::new(config, runner.clone(), diag.clone())),
            attestor: Arc::new(CommandAttestor::new(config, runner.clone(), diag.clone())),
            fetcher: Arc::new(UreqFetcher::new(config.shim.download_timeout())),
            runner,
        }
    }
}

/// What a completed boot produced.
#[derive(Debug, Default)]
pub struct BootReport {
    pub topology: GpuTopology,
    pub config_digest: String,
    pub registries: Vec<String>,
    pub packs: Vec<MountedPack>,
    pub containers: Vec<String>,
    pub shim: Option<PathBuf>,
    /// Non-fatal step failures.
    pub warnings: Vec<BootFailure>,
}

/// Runs the boot pipeline.
pub struct BootSequencer {
    storage: WorkingStorage,
    probe: TopologyProbe,
    attestor: Arc<dyn Attestor>,
    loader: MeasuredConfigLoader,
    credentials: CredentialWriter,
    mounter: IntegrityMounter,
    runtime: Arc<dyn ContainerRuntime>,
    shim: ShimInstaller,
    diag: Diagnostics,
}

impl BootSequencer {
    pub fn new(config: &NodeConfig, deps: BootDeps, diag: Diagnostics) -> Self {
        Self {
            storage: WorkingStorage::new(config, deps.runner.clone(), diag.clone()),
            probe: TopologyProbe::new(config, diag.clone()),
            attestor: deps.attestor,
            loader: MeasuredConfigLoader::new(config, diag.clone()),
            credentials: CredentialWriter::new(config, deps.runner.clone(), diag.clone()),
            mounter: IntegrityMounter::new(config, deps.runner, diag.clone()),
            runtime: deps.runtime,
            shim: ShimInstaller::new(config, deps.fetcher, deps.services, diag.clone()),
            diag,
        }
    }

    fn fail(&self, failure: BootFailure) -> BootFailure {
        self.diag.error(failure.step, &failure);
        failure
    }

    /// Run every step in order.
    pub fn run(&self) -> Result<BootReport, BootFailure> {
        let mut report = BootReport::default();
        self.diag.info("boot", "starting boot sequence");

        self.storage
            .prepare()
            .map_err(|e| self.fail(BootFailure::fatal("storage", e)))?;

        report.topology = self
            .probe
            .probe()
            .map_err(|e| self.fail(BootFailure::fatal("probe", e)))?;

        if report.topology.has_accelerator {
            self.attestor
                .attest(&report.topology)
                .map_err(|e| self.fail(BootFailure::fatal("attest", e)))?;
        } else {
            self.diag.info("attest", "no accelerator present, skipping");
        }

        let config = self
            .loader
            .load_verified()
            .map_err(|e| self.fail(BootFailure::fatal("config", e)))?;
        report.config_digest = config.digest().to_owned();

        match self.registry_auth() {
            Ok(hosts) => report.registries = hosts,
            Err(w) => {
                self.diag.warn(w.step, &w);
                report.warnings.push(w);
            }
        }

        report.packs = self.models(&config)?;
        report.containers = self.containers(&config)?;
        report.shim = Some(self.shim(&config)?);

        self.diag.info("boot", "boot complete");
        Ok(report)
    }

    fn registry_auth(&self) -> Result<Vec<String>, BootFailure> {
        let external = self
            .loader
            .load_external()
            .map_err(|e| BootFailure::warning("registry-auth", e))?;
        self.credentials
            .apply(&external)
            .map_err(|e| BootFailure::warning("registry-auth", e))
    }

    fn models(&self, config: &TrustedConfig) -> Result<Vec<MountedPack>, BootFailure> {
        self.mounter
            .mount_all(config)
            .map_err(|e| self.fail(BootFailure::fatal("models", e)))
    }

    fn containers(&self, config: &TrustedConfig) -> Result<Vec<String>, BootFailure> {
        let external = self.loader.load_external().unwrap_or_else(|e| {
            self.diag
                .warn("containers", format!("external config unreadable: {e}"));
            ExternalSecrets::default()
        });
        launch_workloads(self.runtime.as_ref(), config, &external, &self.diag)
            .map_err(|e| self.fail(BootFailure::fatal("containers", e)))
    }

    fn shim(&self, config: &TrustedConfig) -> Result<PathBuf, BootFailure> {
        self.shim
            .install(config)
            .map_err(|e| self.fail(BootFailure::fatal("shim", e)))
    }

    fn staged(&self) -> Result<TrustedConfig, BootFailure> {
        self.loader
            .load_staged()
            .map_err(|e| self.fail(BootFailure::fatal("config", e)))
    }

    /// Mount model packs from the staged config.
    pub fn run_models(&self) -> Result<Vec<MountedPack>, BootFailure> {
        let config = self.staged()?;
        self.models(&config)
    }

    /// Configure registry credentials and launch workloads from the staged config.
    pub fn run_containers(&self) -> Result<Vec<String>, BootFailure> {
        let config = self.staged()?;
        if let Err(w) = self.registry_auth() {
            self.diag.warn(w.step, &w);
        }
        self.containers(&config)
    }

    /// Install the shim named by the staged config.
    pub fn run_shim(&self) -> Result<PathBuf, BootFailure> {
        let config = self.staged()?;
        self.shim(&config)
    }
}
