// CLASSIFICATION: COMMUNITY
// Filename: runtime.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Container runtime collaborator.
//!
//! The production runtime drives the `docker` CLI through a
//! [`CommandRunner`]. Secret values are handed over through the child
//! environment (`--env KEY`), never on the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};
use crate::trusted::{CommandSpec, ContainerSpec, HealthcheckSpec};
use crate::validate;

/// A container reported as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
}

impl RunningContainer {
    /// Name when known, otherwise the short id.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id[..self.id.len().min(12)]
        } else {
            &self.name
        }
    }
}

/// Operations the boot and shutdown paths need from a container runtime.
pub trait ContainerRuntime: Send + Sync {
    /// Running containers. Unreachable runtime is `RuntimeUnavailable`.
    fn list_running(&self) -> Result<Vec<RunningContainer>, NodeError>;
    /// Pull, create and start `spec` with the resolved environment; returns the id.
    fn create_and_start(
        &self,
        spec: &ContainerSpec,
        env: &[(String, String)],
    ) -> Result<String, NodeError>;
    /// Graceful stop, waiting up to `grace` before the runtime escalates.
    fn stop(&self, id: &str, grace: Duration) -> Result<(), NodeError>;
    /// Deliver `signal` to the container.
    fn kill(&self, id: &str, signal: &str) -> Result<(), NodeError>;
}

/// `docker` CLI runtime.
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    bind_source: PathBuf,
    bind_target: String,
    default_network: String,
    docker_config: PathBuf,
    list_timeout: Duration,
    launch_timeout: Duration,
    kill_timeout: Duration,
    diag: Diagnostics,
}

impl DockerCli {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            runner,
            binary: config.workloads.runtime_binary.clone(),
            bind_source: config.paths.working_root.clone(),
            bind_target: config.workloads.bind_target.clone(),
            default_network: config.workloads.default_network.clone(),
            docker_config: config.paths.docker_config_dir(),
            list_timeout: config.workloads.list_timeout(),
            launch_timeout: config.workloads.launch_timeout(),
            kill_timeout: config.shutdown.kill_timeout(),
            diag,
        }
    }

    fn invocation(&self, timeout: Duration) -> Invocation {
        Invocation::new(self.binary.clone(), timeout)
            .env("DOCKER_CONFIG", self.docker_config.to_string_lossy())
    }

    /// Arguments for `docker run` (without the binary).
    pub fn run_args(
        &self,
        spec: &ContainerSpec,
        env_keys: &[&str],
    ) -> Result<Vec<String>, NodeError> {
        if spec.image.is_empty() {
            return Err(NodeError::invalid("container image", ""));
        }
        if spec.image.starts_with('-') {
            return Err(NodeError::invalid("container image", spec.image.clone()));
        }
        if !spec.name.is_empty() && !validate::is_container_name(&spec.name) {
            return Err(NodeError::invalid("container name", spec.name.clone()));
        }

        let mut a = Args::default();
        a.push("run");
        a.push("--detach");
        a.opt("--name", Some(&spec.name));
        let network = spec
            .network_mode
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_network);
        a.opt("--network", Some(network));
        a.pair(
            "--volume",
            format!("{}:{}", self.bind_source.display(), self.bind_target),
        );
        for v in &spec.volumes {
            a.pair("--volume", v);
        }
        for d in &spec.devices {
            a.pair("--device", d);
        }
        for k in env_keys {
            a.pair("--env", *k);
        }
        if let Some(flag) = spec.gpus.as_ref().and_then(|g| g.runtime_flag()) {
            a.pair("--gpus", flag);
        }
        a.opt("--runtime", spec.runtime.as_deref());
        a.opt("--ipc", spec.ipc.as_deref());
        a.opt("--pid", spec.pid.as_deref());
        a.opt("--user", spec.user.as_deref());
        a.opt("--workdir", spec.working_dir.as_deref());
        for c in &spec.cap_add {
            a.pair("--cap-add", c);
        }
        for c in &spec.cap_drop {
            a.pair("--cap-drop", c);
        }
        for s in &spec.security_opt {
            a.pair("--security-opt", s);
        }
        if spec.read_only {
            a.push("--read-only");
        }
        for (path, opts) in &spec.tmpfs {
            if opts.is_empty() {
                a.pair("--tmpfs", path);
            } else {
                a.pair("--tmpfs", format!("{path}:{opts}"));
            }
        }
        a.opt("--restart", spec.restart.as_deref());
        a.opt("--shm-size", spec.shm_size.as_deref());
        a.opt("--memory", spec.memory.as_deref());
        if let Some(cpus) = spec.cpus.filter(|c| *c > 0.0) {
            a.pair("--cpus", cpus.to_string());
        }
        a.opt("--stop-signal", spec.stop_signal.as_deref());
        if let Some(t) = spec.stop_timeout {
            a.pair("--stop-timeout", t.to_string());
        }
        if let Some(hc) = &spec.healthcheck {
            health_args(&mut a, hc)?;
        }

        let mut trailing = Vec::new();
        if let Some(entry) = spec.entrypoint.as_ref().map(CommandSpec::argv) {
            let mut entry = entry.into_iter();
            if let Some(first) = entry.next() {
                a.pair("--entrypoint", first);
            }
            trailing.extend(entry);
        }
        a.push(spec.image.clone());
        if let Some(cmd) = &spec.command {
            trailing.extend(cmd.argv());
        }
        a.0.extend(trailing);
        Ok(a.0)
    }
}

#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, v: impl Into<String>) {
        self.0.push(v.into());
    }

    fn pair(&mut self, flag: &str, v: impl Into<String>) {
        self.0.push(flag.to_owned());
        self.0.push(v.into());
    }

    fn opt(&mut self, flag: &str, v: Option<&str>) {
        if let Some(v) = v.filter(|v| !v.is_empty()) {
            self.pair(flag, v);
        }
    }
}

/// `--health-cmd` is run through a shell, so exec-form (`CMD`) elements are
/// quoted one by one. Shell-form tests pass through unchanged.
fn health_args(a: &mut Args, hc: &HealthcheckSpec) -> Result<(), NodeError> {
    match hc.test.split_first() {
        Some((kind, _)) if kind == "NONE" => {
            a.push("--no-healthcheck");
            return Ok(());
        }
        Some((kind, rest)) if kind == "CMD" => {
            let quoted = rest
                .iter()
                .map(|arg| {
                    shlex::try_quote(arg)
                        .map(|q| q.into_owned())
                        .map_err(|_| NodeError::invalid("healthcheck argument", arg.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            a.pair("--health-cmd", quoted.join(" "));
        }
        Some((kind, rest)) if kind == "CMD-SHELL" => a.pair("--health-cmd", rest.join(" ")),
        Some(_) => a.pair("--health-cmd", hc.test.join(" ")),
        None => {}
    }
    a.opt("--health-interval", hc.interval.as_deref());
    a.opt("--health-timeout", hc.timeout.as_deref());
    if let Some(r) = hc.retries {
        a.pair("--health-retries", r.to_string());
    }
    a.opt("--health-start-period", hc.start_period.as_deref());
    Ok(())
}

fn parse_ps(stdout: &str) -> Vec<RunningContainer> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(2, '\t');
            let id = fields.next()?.trim();
            if id.is_empty() {
                return None;
            }
            let name = fields.next().unwrap_or("").trim();
            let name = name.split(',').next().unwrap_or("").trim_start_matches('/');
            Some(RunningContainer {
                id: id.to_owned(),
                name: name.to_owned(),
            })
        })
        .collect()
}

impl ContainerRuntime for DockerCli {
    fn list_running(&self) -> Result<Vec<RunningContainer>, NodeError> {
        let inv = self
            .invocation(self.list_timeout)
            .args(["ps", "--no-trunc", "--format", "{{.ID}}\t{{.Names}}"]);
        let out = self
            .runner
            .run(&inv)
            .map_err(|e| NodeError::RuntimeUnavailable(e.to_string()))?;
        if !out.success {
            return Err(NodeError::RuntimeUnavailable(out.stderr.trim().to_owned()));
        }
        Ok(parse_ps(&out.stdout))
    }

    fn create_and_start(
        &self,
        spec: &ContainerSpec,
        env: &[(String, String)],
    ) -> Result<String, NodeError> {
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        let args = self.run_args(spec, &keys)?;

        self.diag
            .info("containers", format!("pulling image {} ({})", spec.name, spec.image));
        let pull = self
            .invocation(self.launch_timeout)
            .args(["pull".to_owned(), spec.image.clone()]);
        run_checked(self.runner.as_ref(), &pull)?;

        self.diag
            .info("containers", format!("creating container {}", spec.name));
        let mut run = self.invocation(self.launch_timeout).args(args);
        for (k, v) in env {
            run = run.env(k.clone(), v.clone());
        }
        let out = run_checked(self.runner.as_ref(), &run)?;
        let id = out.stdout.trim().to_owned();
        self.diag.info(
            "containers",
            format!("started container {} ({})", spec.name, &id[..id.len().min(12)]),
        );
        Ok(id)
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), NodeError> {
        let inv = self.invocation(grace + Duration::from_secs(10)).args([
            "stop".to_owned(),
            "--time".to_owned(),
            grace.as_secs().to_string(),
            id.to_owned(),
        ]);
        run_checked(self.runner.as_ref(), &inv).map(|_| ())
    }

    fn kill(&self, id: &str, signal: &str) -> Result<(), NodeError> {
        let inv = self.invocation(self.kill_timeout).args([
            "kill".to_owned(),
            "--signal".to_owned(),
            signal.to_owned(),
            id.to_owned(),
        ]);
        run_checked(self.runner.as_ref(), &inv).map(|_| ())
    }
}
