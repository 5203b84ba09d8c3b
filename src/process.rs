// CLASSIFICATION: COMMUNITY
// Filename: process.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Bounded subprocess execution.
//!
//! Every external tool (veritysetup, mount, rmmod, dmesg, docker, systemctl,
//! attestation verifiers) is invoked through a [`CommandRunner`] so that
//! tests can observe exactly which calls were attempted.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::diag::Diagnostics;
use crate::error::NodeError;

/// A single subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Render as a shell-like line for diagnostics.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout, used by fakes.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes subprocesses with a bounded wait.
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is returned as `Ok` with
    /// `success == false`; spawn failures are `Io`, overruns are `Timeout`.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, NodeError>;
}

/// Run and convert a non-zero exit into [`NodeError::Command`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<CommandOutput, NodeError> {
    let output = runner.run(invocation)?;
    if output.success {
        Ok(output)
    } else {
        Err(NodeError::Command {
            command: invocation.display(),
            status: output
                .code
                .map_or_else(|| "signal".to_owned(), |c| format!("exit code {c}")),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Runner backed by `std::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    diag: Diagnostics,
}

impl SystemRunner {
    #[must_use]
    pub fn new(diag: Diagnostics) -> Self {
        Self { diag }
    }
}

/// How long pipe readers get after the child exits. A grandchild that
/// inherited the pipes can hold them open past the child's exit.
const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Bound on reaping a killed child.
const REAP_GRACE: Duration = Duration::from_secs(2);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(rx: &Receiver<String>) -> String {
    rx.recv_timeout(PIPE_GRACE).unwrap_or_default()
}

/// Kill the child's whole process group, then reap it with a bound. Reader
/// threads are left detached.
fn kill_group(child: &mut Child) {
    let _ = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", child.id())])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = child.kill();
    let _ = child.wait_timeout(REAP_GRACE);
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, NodeError> {
        let line = invocation.display();
        self.diag.debug("exec", format!("running {line}"));

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| NodeError::io(format!("spawning {}", invocation.program), e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child
            .wait_timeout(invocation.timeout)
            .map_err(|e| NodeError::io(format!("waiting for {}", invocation.program), e))?
        {
            Some(status) => status,
            None => {
                kill_group(&mut child);
                return Err(NodeError::Timeout {
                    operation: line,
                    timeout: invocation.timeout,
                });
            }
        };

        let output = CommandOutput {
            code: status.code(),
            success: status.success(),
            stdout: collect(&stdout),
            stderr: collect(&stderr),
        };
        for l in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            self.diag.info("exec", format!("{}: {l}", invocation.program));
        }
        for l in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
            self.diag.warn("exec", format!("{}: {l}", invocation.program));
        }
        Ok(output)
    }
}
