// CLASSIFICATION: COMMUNITY
// Filename: gpu_teardown.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use cvm_boot::cuda::{DrainEngine, InterconnectDrain};
use cvm_boot::diag::Diagnostics;
use cvm_boot::fakes::{
    DriverCall, FakeCuda, FakeRuntime, FakeServices, RecordingRunner, RuntimeCall, ScriptedLog,
};
use cvm_boot::logscan::CleanupWatcher;
use cvm_boot::shutdown::{race_drain, ShutdownDeps};
use cvm_boot::topology::TopologyProbe;
use cvm_boot::{NodeConfig, ShutdownSequencer};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const MARKER: &str = "kgspCheckGspRmCcCleanup_GH100: CC secret cleanup successful";

fn pci_tree(root: &Path, nvidia: usize, other: usize) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.paths.pci_devices = root.join("pci");
    fs::create_dir_all(&config.paths.pci_devices).unwrap();
    for i in 0..nvidia + other {
        let dev = config.paths.pci_devices.join(format!("0000:{i:02x}:00.0"));
        fs::create_dir_all(&dev).unwrap();
        let vendor = if i < nvidia { "0x10de" } else { "0x8086" };
        fs::write(dev.join("vendor"), format!("{vendor}\n")).unwrap();
    }
    config.shutdown.cleanup_poll_ms = 5;
    config
}

#[test]
fn stuck_workload_is_killed_once_and_none_remain() {
    let dir = tempdir().unwrap();
    let config = pci_tree(dir.path(), 0, 2);
    let runtime = Arc::new(
        FakeRuntime::with_running(&["web", "worker", "sidecar"]).stuck("id-worker"),
    );
    let runner = Arc::new(RecordingRunner::new());
    let deps = ShutdownDeps {
        runner: runner.clone(),
        runtime: runtime.clone(),
        services: Arc::new(FakeServices::default()),
        drain: Arc::new(DrainEngine::new(
            FakeCuda::new(0).loader(),
            Diagnostics::transcript(false).0,
        )),
        log: Arc::new(ScriptedLog::fixed(String::new())),
    };

    let report = ShutdownSequencer::new(&config, deps, Diagnostics::transcript(false).0).run();

    let kills = runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RuntimeCall::Kill(..)))
        .count();
    assert_eq!(kills, 1);
    assert!(runtime.running().is_empty());
    assert_eq!(report.stopped, 2);
    assert!(!report.topology.has_accelerator);
    assert!(report.cleanup.is_none());
    assert_eq!(runner.lines(), vec!["sync"]);
}

#[test]
fn cleanup_wait_returns_at_eighth_confirmation() {
    let dir = tempdir().unwrap();
    let mut config = pci_tree(dir.path(), 12, 0);
    config.shutdown.cleanup_timeout_secs = 30;
    let log = Arc::new(ScriptedLog::growing(MARKER, 1));
    let watcher = CleanupWatcher::new(&config, log.clone(), Diagnostics::transcript(false).0);

    let started = Instant::now();
    let outcome = watcher.confirm(config.topology.fabric_compute_devices);
    assert!(outcome.satisfied());
    assert_eq!(outcome.confirmed, 8);
    assert_eq!(log.reads(), 8);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[test]
fn failed_context_is_skipped_in_pairs_and_still_reset() {
    let fake = FakeCuda::new(4).fail_context(2);
    let engine: Arc<dyn InterconnectDrain> = Arc::new(DrainEngine::new(
        fake.loader(),
        Diagnostics::transcript(false).0,
    ));
    let report = race_drain(engine, Duration::from_secs(10)).unwrap();
    assert_eq!(report.valid, 3);

    let calls = fake.calls();
    let pairs: Vec<(usize, usize)> = calls
        .iter()
        .filter_map(|c| match c {
            DriverCall::Enable(i, j) | DriverCall::Disable(i, j) => Some((*i, *j)),
            _ => None,
        })
        .collect();
    assert_eq!(pairs.len(), 12);
    assert!(pairs.iter().all(|&(i, j)| i != 2 && j != 2 && i != j));
    assert!(calls.contains(&DriverCall::Reset(2)));
    assert!(!calls.contains(&DriverCall::Destroy(2)));
    assert_eq!(fake.live_contexts(), 0);
}

#[test]
fn fabric_shutdown_runs_drain_and_confirms_compute_devices() {
    let dir = tempdir().unwrap();
    let config = pci_tree(dir.path(), 12, 3);
    let fake = FakeCuda::new(12);
    let log = Arc::new(ScriptedLog::growing(MARKER, 4));
    let deps = ShutdownDeps {
        runner: Arc::new(RecordingRunner::new()),
        runtime: Arc::new(FakeRuntime::new()),
        services: Arc::new(FakeServices::default()),
        drain: Arc::new(DrainEngine::new(fake.loader(), Diagnostics::transcript(false).0)),
        log: log.clone(),
    };

    let report = ShutdownSequencer::new(&config, deps, Diagnostics::transcript(false).0).run();
    assert!(report.topology.is_multi_gpu_fabric);
    assert_eq!(report.drain.as_ref().map(|d| d.enabled), Some(132));
    let cleanup = report.cleanup.unwrap();
    assert_eq!(cleanup.expected, 8);
    assert_eq!(log.reads(), 2);
    assert!(report.notes.is_empty());
}

#[test]
fn eleven_devices_are_not_a_fabric() {
    let dir = tempdir().unwrap();
    let config = pci_tree(dir.path(), 11, 0);
    let topology = TopologyProbe::new(&config, Diagnostics::transcript(false).0)
        .probe()
        .unwrap();
    assert_eq!(topology.device_count, 11);
    assert!(!topology.is_multi_gpu_fabric);
    assert_eq!(topology.expected_confirmations(8), 11);
}
