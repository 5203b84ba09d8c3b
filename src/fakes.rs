// CLASSIFICATION: COMMUNITY
// Filename: fakes.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! In-memory collaborators for exercising the sequencers without a GPU,
//! container runtime or init system.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::attest::Attestor;
use crate::cuda::driver::{CudaDriver, DriverLoader};
use crate::cuda::{DrainReport, InterconnectDrain};
use crate::error::NodeError;
use crate::logscan::LogSource;
use crate::process::{CommandOutput, CommandRunner, Invocation};
use crate::runtime::{ContainerRuntime, RunningContainer};
use crate::shim::Fetcher;
use crate::topology::GpuTopology;
use crate::trusted::ContainerSpec;
use crate::units::ServiceManager;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

enum Reply {
    Output(CommandOutput),
    TimeOut,
}

struct Rule {
    program: String,
    arg0: Option<String>,
    reply: Reply,
}

/// Records every invocation and answers from a rule table.
///
/// Rules keyed on program and first argument win over program-only rules.
/// Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, program: &str, output: CommandOutput) {
        lock(&self.rules).push(Rule {
            program: program.to_owned(),
            arg0: None,
            reply: Reply::Output(output),
        });
    }

    pub fn respond_to(&self, program: &str, arg0: &str, output: CommandOutput) {
        lock(&self.rules).push(Rule {
            program: program.to_owned(),
            arg0: Some(arg0.to_owned()),
            reply: Reply::Output(output),
        });
    }

    /// Make `program arg0 ...` report a timeout.
    pub fn time_out(&self, program: &str, arg0: &str) {
        lock(&self.rules).push(Rule {
            program: program.to_owned(),
            arg0: Some(arg0.to_owned()),
            reply: Reply::TimeOut,
        });
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Rendered command lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        lock(&self.calls).iter().map(Invocation::display).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, NodeError> {
        lock(&self.calls).push(inv.clone());
        let rules = lock(&self.rules);
        let first = inv.args.first().map(String::as_str);
        let specific = rules
            .iter()
            .find(|r| r.program == inv.program && r.arg0.is_some() && r.arg0.as_deref() == first);
        let general = || {
            rules
                .iter()
                .find(|r| r.program == inv.program && r.arg0.is_none())
        };
        match specific.or_else(general).map(|r| &r.reply) {
            Some(Reply::Output(out)) => Ok(out.clone()),
            Some(Reply::TimeOut) => Err(NodeError::Timeout {
                operation: inv.display(),
                timeout: inv.timeout,
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

/// Driver calls observed by [`FakeCuda`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Init,
    DeviceCount,
    Create(usize),
    SetCurrent(usize),
    Synchronize(Option<usize>),
    CanAccess(usize, usize),
    Enable(usize, usize),
    Disable(usize, usize),
    Destroy(usize),
    Reset(usize),
}

/// `CUDA_ERROR_PEER_ACCESS_NOT_ENABLED`.
const PEER_NOT_ENABLED: i32 = 705;
/// `CUDA_ERROR_INVALID_CONTEXT`.
const INVALID_CONTEXT: i32 = 201;
/// `CUDA_ERROR_NO_DEVICE`.
const NO_DEVICE: i32 = 100;

#[derive(Default)]
struct CudaState {
    devices: usize,
    failing: BTreeSet<usize>,
    peer_access: bool,
    unavailable: bool,
    delay: Duration,
    current: Option<usize>,
    live: BTreeSet<usize>,
    peers: BTreeSet<(usize, usize)>,
    calls: Vec<DriverCall>,
}

/// Scriptable driver; clones share state so tests can inspect what the
/// drain thread did.
#[derive(Clone)]
pub struct FakeCuda {
    state: Arc<Mutex<CudaState>>,
}

impl FakeCuda {
    #[must_use]
    pub fn new(devices: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CudaState {
                devices,
                peer_access: true,
                ..CudaState::default()
            })),
        }
    }

    /// Context creation for `ordinal` fails.
    #[must_use]
    pub fn fail_context(self, ordinal: usize) -> Self {
        lock(&self.state).failing.insert(ordinal);
        self
    }

    /// `can_access_peer` answers `false` for every pair.
    #[must_use]
    pub fn no_peer_access(self) -> Self {
        lock(&self.state).peer_access = false;
        self
    }

    /// Loading the driver fails.
    #[must_use]
    pub fn unavailable(self) -> Self {
        lock(&self.state).unavailable = true;
        self
    }

    /// Every synchronize blocks for `delay`.
    #[must_use]
    pub fn slow(self, delay: Duration) -> Self {
        lock(&self.state).delay = delay;
        self
    }

    #[must_use]
    pub fn loader(&self) -> Self {
        self.clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.state).calls.clone()
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        lock(&self.state).live.len()
    }

    fn current(state: &CudaState, call: &'static str) -> Result<usize, NodeError> {
        state.current.ok_or(NodeError::Driver {
            call,
            code: INVALID_CONTEXT,
        })
    }
}

impl DriverLoader for FakeCuda {
    type Driver = FakeCuda;

    fn load(&self) -> Result<Self::Driver, NodeError> {
        if lock(&self.state).unavailable {
            return Err(NodeError::io(
                "loading libcuda.so.1",
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        Ok(self.clone())
    }
}

impl CudaDriver for FakeCuda {
    fn init(&mut self) -> Result<(), NodeError> {
        lock(&self.state).calls.push(DriverCall::Init);
        Ok(())
    }

    fn device_count(&mut self) -> Result<usize, NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(DriverCall::DeviceCount);
        Ok(s.devices)
    }

    fn create_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(DriverCall::Create(ordinal));
        if ordinal >= s.devices || s.failing.contains(&ordinal) {
            return Err(NodeError::Driver {
                call: "cuCtxCreate",
                code: NO_DEVICE,
            });
        }
        s.live.insert(ordinal);
        s.current = Some(ordinal);
        Ok(())
    }

    fn set_current(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(DriverCall::SetCurrent(ordinal));
        if !s.live.contains(&ordinal) {
            return Err(NodeError::Driver {
                call: "cuCtxSetCurrent",
                code: INVALID_CONTEXT,
            });
        }
        s.current = Some(ordinal);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), NodeError> {
        let delay = {
            let mut s = lock(&self.state);
            let current = s.current;
            s.calls.push(DriverCall::Synchronize(current));
            s.delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn can_access_peer(&mut self, from: usize, to: usize) -> bool {
        let mut s = lock(&self.state);
        s.calls.push(DriverCall::CanAccess(from, to));
        s.peer_access
    }

    fn enable_peer_access(&mut self, peer: usize) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        let current = Self::current(&s, "cuCtxEnablePeerAccess")?;
        s.calls.push(DriverCall::Enable(current, peer));
        s.peers.insert((current, peer));
        Ok(())
    }

    fn disable_peer_access(&mut self, peer: usize) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        let current = Self::current(&s, "cuCtxDisablePeerAccess")?;
        s.calls.push(DriverCall::Disable(current, peer));
        if s.peers.remove(&(current, peer)) {
            Ok(())
        } else {
            Err(NodeError::Driver {
                call: "cuCtxDisablePeerAccess",
                code: PEER_NOT_ENABLED,
            })
        }
    }

    fn destroy_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(DriverCall::Destroy(ordinal));
        s.live.remove(&ordinal);
        s.peers.retain(|&(a, b)| a != ordinal && b != ordinal);
        if s.current == Some(ordinal) {
            s.current = None;
        }
        Ok(())
    }

    fn reset_primary_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        lock(&self.state).calls.push(DriverCall::Reset(ordinal));
        Ok(())
    }
}

/// Drain stand-in that sleeps before reporting.
pub struct SleepyDrain {
    delay: Duration,
    runs: AtomicUsize,
}

impl SleepyDrain {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl InterconnectDrain for SleepyDrain {
    fn drain(&self) -> DrainReport {
        self.runs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        DrainReport {
            elapsed: self.delay,
            ..DrainReport::default()
        }
    }
}

enum Script {
    Growing { marker: String, per_read: usize },
    Fixed(String),
}

/// Kernel log whose contents are scripted per read.
pub struct ScriptedLog {
    script: Script,
    reads: AtomicUsize,
}

impl ScriptedLog {
    /// The n-th read returns `n * per_read` marker lines.
    #[must_use]
    pub fn growing(marker: &str, per_read: usize) -> Self {
        Self {
            script: Script::Growing {
                marker: marker.to_owned(),
                per_read,
            },
            reads: AtomicUsize::new(0),
        }
    }

    /// Every read returns `text`.
    #[must_use]
    pub fn fixed(text: String) -> Self {
        Self {
            script: Script::Fixed(text),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LogSource for ScriptedLog {
    fn read(&self) -> Result<String, NodeError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match &self.script {
            Script::Fixed(text) => text.clone(),
            Script::Growing { marker, per_read } => (0..n * per_read)
                .map(|i| format!("[{i}.000000] NVRM: {marker}\n"))
                .collect(),
        })
    }
}

/// Runtime calls observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List,
    Create(String),
    Stop(String),
    Kill(String, String),
}

#[derive(Default)]
struct RuntimeState {
    running: Vec<RunningContainer>,
    unavailable: bool,
    stuck: BTreeSet<String>,
    failing: BTreeSet<String>,
    launched: BTreeMap<String, Vec<(String, String)>>,
    calls: Vec<RuntimeCall>,
}

/// Container runtime kept entirely in memory.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `names` running; ids are `id-<name>`.
    #[must_use]
    pub fn with_running(names: &[&str]) -> Self {
        let rt = Self::default();
        lock(&rt.state).running = names
            .iter()
            .map(|n| RunningContainer {
                id: format!("id-{n}"),
                name: (*n).to_owned(),
            })
            .collect();
        rt
    }

    /// Graceful stop of `id` times out and leaves it running.
    #[must_use]
    pub fn stuck(self, id: &str) -> Self {
        lock(&self.state).stuck.insert(id.to_owned());
        self
    }

    /// Every call reports the runtime unreachable.
    #[must_use]
    pub fn unavailable(self) -> Self {
        lock(&self.state).unavailable = true;
        self
    }

    /// Launching the container named `name` fails.
    #[must_use]
    pub fn failing(self, name: &str) -> Self {
        lock(&self.state).failing.insert(name.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.state).calls.clone()
    }

    pub fn running(&self) -> Vec<RunningContainer> {
        lock(&self.state).running.clone()
    }

    /// Environment handed to the container named `name` at launch.
    pub fn launched_env(&self, name: &str) -> Option<Vec<(String, String)>> {
        lock(&self.state).launched.get(name).cloned()
    }

    fn reachable(s: &RuntimeState) -> Result<(), NodeError> {
        if s.unavailable {
            Err(NodeError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn list_running(&self) -> Result<Vec<RunningContainer>, NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(RuntimeCall::List);
        Self::reachable(&s)?;
        Ok(s.running.clone())
    }

    fn create_and_start(
        &self,
        spec: &ContainerSpec,
        env: &[(String, String)],
    ) -> Result<String, NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(RuntimeCall::Create(spec.name.clone()));
        Self::reachable(&s)?;
        if s.failing.contains(&spec.name) {
            return Err(NodeError::Command {
                command: format!("docker run --name {}", spec.name),
                status: "exit status: 125".into(),
                stderr: "image not found".into(),
            });
        }
        let id = format!("id-{}", spec.name);
        s.launched.insert(spec.name.clone(), env.to_vec());
        s.running.push(RunningContainer {
            id: id.clone(),
            name: spec.name.clone(),
        });
        Ok(id)
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        s.calls.push(RuntimeCall::Stop(id.to_owned()));
        Self::reachable(&s)?;
        if s.stuck.contains(id) {
            return Err(NodeError::Timeout {
                operation: format!("docker stop {id}"),
                timeout: grace,
            });
        }
        s.running.retain(|c| c.id != id);
        Ok(())
    }

    fn kill(&self, id: &str, signal: &str) -> Result<(), NodeError> {
        let mut s = lock(&self.state);
        s.calls
            .push(RuntimeCall::Kill(id.to_owned(), signal.to_owned()));
        Self::reachable(&s)?;
        s.running.retain(|c| c.id != id);
        Ok(())
    }
}

/// Service manager that records jobs.
#[derive(Default)]
pub struct FakeServices {
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
}

impl FakeServices {
    /// Jobs for `unit` fail.
    pub fn fail(&self, unit: &str) {
        lock(&self.failing).insert(unit.to_owned());
    }

    pub fn started(&self) -> Vec<String> {
        lock(&self.started).clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        lock(&self.stopped).clone()
    }

    fn job(&self, verb: &str, unit: &str, log: &Mutex<Vec<String>>) -> Result<(), NodeError> {
        lock(log).push(unit.to_owned());
        if lock(&self.failing).contains(unit) {
            return Err(NodeError::Command {
                command: format!("systemctl {verb} {unit}"),
                status: "exit status: 5".into(),
                stderr: format!("Unit {unit} not loaded."),
            });
        }
        Ok(())
    }
}

impl ServiceManager for FakeServices {
    fn start(&self, unit: &str) -> Result<(), NodeError> {
        self.job("start", unit, &self.started)
    }

    fn stop(&self, unit: &str) -> Result<(), NodeError> {
        self.job("stop", unit, &self.stopped)
    }
}

/// Fetcher that writes a fixed body for every URL.
pub struct StaticFetcher {
    body: Option<Vec<u8>>,
    urls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with HTTP 404.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            body: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, NodeError> {
        lock(&self.urls).push(url.to_owned());
        let body = self.body.as_ref().ok_or_else(|| NodeError::Fetch {
            url: url.to_owned(),
            detail: "HTTP 404".into(),
        })?;
        fs::write(dest, body).map_err(|e| NodeError::io_at("writing", dest, e))?;
        Ok(body.len() as u64)
    }
}

/// Attestor that records the topology it was asked to attest.
#[derive(Default)]
pub struct FakeAttestor {
    seen: Mutex<Vec<GpuTopology>>,
    fail: bool,
}

impl FakeAttestor {
    /// Every attestation fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<GpuTopology> {
        lock(&self.seen).clone()
    }
}

impl Attestor for FakeAttestor {
    fn attest(&self, topology: &GpuTopology) -> Result<(), NodeError> {
        lock(&self.seen).push(*topology);
        if self.fail {
            return Err(NodeError::Command {
                command: "attest".into(),
                status: "exit status: 1".into(),
                stderr: "evidence rejected".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_rule_wins_over_program_rule() {
        let runner = RecordingRunner::new();
        runner.respond("docker", CommandOutput::failed(1, "general"));
        runner.respond_to("docker", "ps", CommandOutput::ok("abc\tweb\n"));
        let ps = Invocation::new("docker", Duration::from_secs(1)).arg("ps");
        let stop = Invocation::new("docker", Duration::from_secs(1)).arg("stop");
        assert_eq!(runner.run(&ps).unwrap().stdout, "abc\tweb\n");
        assert!(!runner.run(&stop).unwrap().success);
        assert_eq!(runner.lines(), vec!["docker ps", "docker stop"]);
    }

    #[test]
    fn growing_log_adds_markers_per_read() {
        let log = ScriptedLog::growing("ok", 2);
        assert_eq!(log.read().unwrap().lines().count(), 2);
        assert_eq!(log.read().unwrap().lines().count(), 4);
        assert_eq!(log.reads(), 2);
    }
}
