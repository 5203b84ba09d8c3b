// CLASSIFICATION: COMMUNITY
// Filename: shutdown.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Shutdown sequencing.
//!
//! Workloads are stopped first, then the peer-link drain runs (fabric nodes
//! only, on its own thread, against a deadline), then the optional GPU stack
//! teardown, then the wait for per-device secret cleanup, then `sync`.
//! Nothing here aborts: every failure becomes a warning note and the next
//! stage still runs.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::cuda::{DrainEngine, DrainReport, InterconnectDrain, LibCudaLoader};
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::kmod::ModuleUnloader;
use crate::logscan::{CleanupOutcome, CleanupWatcher, Dmesg, LogSource};
use crate::process::{run_checked, CommandRunner, Invocation, SystemRunner};
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::topology::{GpuTopology, TopologyProbe};
use crate::units::{ServiceManager, Systemctl};

const KILL_SIGNAL: &str = "KILL";

/// Severity of a shutdown note. Shutdown failures never abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSeverity {
    Warning,
}

/// One problem met during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownNote {
    pub stage: &'static str,
    pub severity: ShutdownSeverity,
    pub message: String,
}

impl fmt::Display for ShutdownNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Everything a shutdown did.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub topology: GpuTopology,
    pub stopped: usize,
    pub killed: usize,
    pub drain: Option<DrainReport>,
    pub cleanup: Option<CleanupOutcome>,
    pub notes: Vec<ShutdownNote>,
}

impl ShutdownReport {
    /// Whether the stage recorded any note.
    #[must_use]
    pub fn noted(&self, stage: &str) -> bool {
        self.notes.iter().any(|n| n.stage == stage)
    }
}

/// Run `drain` on a background thread and wait at most `timeout`.
///
/// On timeout the thread is left running; it owns its driver handles and
/// releases them whenever it finishes.
pub fn race_drain(
    drain: Arc<dyn InterconnectDrain>,
    timeout: Duration,
) -> Result<DrainReport, NodeError> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("peer-drain".into())
        .spawn(move || {
            let _ = tx.send(drain.drain());
        })
        .map_err(|e| NodeError::io("spawning drain thread", e))?;
    rx.recv_timeout(timeout).map_err(|e| match e {
        RecvTimeoutError::Timeout => NodeError::Timeout {
            operation: "peer-link drain".into(),
            timeout,
        },
        RecvTimeoutError::Disconnected => NodeError::io(
            "peer-link drain",
            io::Error::new(io::ErrorKind::Other, "drain thread exited without a report"),
        ),
    })
}

/// External collaborators used by the shutdown path.
#[derive(Clone)]
pub struct ShutdownDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub services: Arc<dyn ServiceManager>,
    pub drain: Arc<dyn InterconnectDrain>,
    pub log: Arc<dyn LogSource>,
}

impl ShutdownDeps {
    /// Production collaborators: subprocesses, `docker`, `systemctl`,
    /// `libcuda` and `dmesg`.
    pub fn system(config: &NodeConfig, diag: &Diagnostics) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(diag.clone()));
        Self {
            runtime: Arc::new(DockerCli::new(config, runner.clone(), diag.clone())),
            services: Arc::new(Systemctl::new(config, runner.clone(), diag.clone())),
            drain: Arc::new(DrainEngine::new(LibCudaLoader::default(), diag.clone())),
            log: Arc::new(Dmesg::new(runner.clone(), config.units.timeout())),
            runner,
        }
    }
}

/// Runs the shutdown stages.
pub struct ShutdownSequencer {
    deps: ShutdownDeps,
    probe: TopologyProbe,
    unloader: ModuleUnloader,
    watcher: CleanupWatcher,
    grace: Duration,
    drain_timeout: Duration,
    sync_timeout: Duration,
    settle: Duration,
    manage_gpu_stack: bool,
    gpu_services: Vec<String>,
    gpu_modules: Vec<String>,
    fabric_compute_devices: usize,
    diag: Diagnostics,
}

impl ShutdownSequencer {
    pub fn new(config: &NodeConfig, deps: ShutdownDeps, diag: Diagnostics) -> Self {
        Self {
            probe: TopologyProbe::new(config, diag.clone()),
            unloader: ModuleUnloader::new(config, deps.runner.clone(), diag.clone()),
            watcher: CleanupWatcher::new(config, deps.log.clone(), diag.clone()),
            grace: config.shutdown.stop_grace(),
            drain_timeout: config.shutdown.drain_timeout(),
            sync_timeout: config.units.timeout(),
            settle: config.shutdown.service_settle(),
            manage_gpu_stack: config.shutdown.manage_gpu_stack,
            gpu_services: config.shutdown.gpu_services.clone(),
            gpu_modules: config.shutdown.gpu_modules.clone(),
            fabric_compute_devices: config.topology.fabric_compute_devices,
            deps,
            diag,
        }
    }

    fn note(&self, report: &mut ShutdownReport, stage: &'static str, message: impl Into<String>) {
        let note = ShutdownNote {
            stage,
            severity: ShutdownSeverity::Warning,
            message: message.into(),
        };
        self.diag.warn(stage, &note.message);
        report.notes.push(note);
    }

    /// Run every stage in order.
    pub fn run(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        self.diag.info("shutdown", "starting shutdown sequence");

        self.stop_workloads(&mut report);

        report.topology = match self.probe.probe() {
            Ok(t) => t,
            Err(e) => {
                self.note(&mut report, "probe", format!("topology probe failed: {e}"));
                GpuTopology::default()
            }
        };

        if report.topology.is_multi_gpu_fabric {
            self.drain_interconnect(&mut report);
        }

        if self.manage_gpu_stack {
            self.stop_gpu_services(&mut report);
            self.unload_modules(&mut report);
        }

        if report.topology.has_accelerator {
            let expected = report
                .topology
                .expected_confirmations(self.fabric_compute_devices);
            self.diag.info(
                "cleanup",
                format!("waiting for secret cleanup on {expected} devices"),
            );
            let outcome = self.watcher.confirm(expected);
            if !outcome.satisfied() {
                self.note(
                    &mut report,
                    "cleanup",
                    format!(
                        "cleanup may not have completed (found {}/{})",
                        outcome.confirmed, outcome.expected
                    ),
                );
            }
            report.cleanup = Some(outcome);
        } else {
            self.diag.info("cleanup", "no accelerator present, skipping");
        }

        let sync = Invocation::new("sync", self.sync_timeout);
        if let Err(e) = run_checked(self.deps.runner.as_ref(), &sync) {
            self.note(&mut report, "sync", format!("sync failed: {e}"));
        }

        self.diag.info(
            "shutdown",
            format!("shutdown complete with {} warnings", report.notes.len()),
        );
        report
    }

    /// Graceful stop, forced kill on failure, then a sweep for stragglers.
    pub fn stop_workloads(&self, report: &mut ShutdownReport) {
        let runtime = self.deps.runtime.as_ref();
        let running = match runtime.list_running() {
            Ok(list) => list,
            Err(e) => {
                self.note(report, "containers", format!("skipping container stop: {e}"));
                return;
            }
        };
        if running.is_empty() {
            self.diag.info("containers", "no running containers");
            return;
        }
        self.diag
            .info("containers", format!("stopping {} containers", running.len()));

        for c in &running {
            match runtime.stop(&c.id, self.grace) {
                Ok(()) => {
                    self.diag.info("containers", format!("stopped {}", c.label()));
                    report.stopped += 1;
                }
                Err(e) => {
                    self.note(
                        report,
                        "containers",
                        format!("graceful stop of {} failed: {e}", c.label()),
                    );
                    self.kill(report, c.id.as_str(), c.label());
                }
            }
        }

        match runtime.list_running() {
            Ok(left) => {
                for c in &left {
                    self.kill(report, c.id.as_str(), c.label());
                }
            }
            Err(e) => self.note(report, "containers", format!("re-listing failed: {e}")),
        }
    }

    fn kill(&self, report: &mut ShutdownReport, id: &str, label: &str) {
        match self.deps.runtime.kill(id, KILL_SIGNAL) {
            Ok(()) => {
                self.diag.info("containers", format!("killed {label}"));
                report.killed += 1;
            }
            Err(e) => self.note(report, "containers", format!("kill of {label} failed: {e}")),
        }
    }

    fn drain_interconnect(&self, report: &mut ShutdownReport) {
        self.diag.info(
            "drain",
            format!("draining peer links (timeout {:?})", self.drain_timeout),
        );
        match race_drain(self.deps.drain.clone(), self.drain_timeout) {
            Ok(r) => {
                if r.skipped {
                    self.note(report, "drain", "driver unavailable, drain skipped");
                }
                report.drain = Some(r);
            }
            Err(e) => self.note(report, "drain", format!("{e}, continuing shutdown")),
        }
    }

    fn stop_gpu_services(&self, report: &mut ShutdownReport) {
        for unit in &self.gpu_services {
            self.diag.info("services", format!("stopping {unit}"));
            if let Err(e) = self.deps.services.stop(unit) {
                self.note(report, "services", format!("stopping {unit}: {e}"));
            }
        }
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }

    fn unload_modules(&self, report: &mut ShutdownReport) {
        match self.unloader.unload(&self.gpu_modules) {
            Ok(outcome) => {
                for (module, e) in outcome.failed {
                    self.note(report, "modules", format!("unloading {module}: {e}"));
                }
            }
            Err(e) => self.note(report, "modules", format!("reading loaded modules: {e}")),
        }
    }
}
