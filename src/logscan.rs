// CLASSIFICATION: COMMUNITY
// Filename: logscan.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Kernel log polling for per-device secret cleanup confirmations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};

/// A readable kernel log.
pub trait LogSource: Send + Sync {
    /// Full current contents.
    fn read(&self) -> Result<String, NodeError>;
}

/// Reads the kernel ring buffer through `dmesg`.
pub struct Dmesg {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Dmesg {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl LogSource for Dmesg {
    fn read(&self) -> Result<String, NodeError> {
        let inv = Invocation::new("dmesg", self.timeout);
        Ok(run_checked(self.runner.as_ref(), &inv)?.stdout)
    }
}

/// Lines of `log` containing `marker`.
#[must_use]
pub fn count_markers(log: &str, marker: &str) -> usize {
    log.lines().filter(|l| l.contains(marker)).count()
}

/// Outcome of a confirmation wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub confirmed: usize,
    pub expected: usize,
    pub polls: usize,
}

impl CleanupOutcome {
    #[must_use]
    pub fn satisfied(&self) -> bool {
        self.confirmed >= self.expected
    }
}

/// Polls a [`LogSource`] until enough markers appear or the deadline passes.
pub struct CleanupWatcher {
    source: Arc<dyn LogSource>,
    marker: String,
    poll: Duration,
    timeout: Duration,
    diag: Diagnostics,
}

impl CleanupWatcher {
    pub fn new(config: &NodeConfig, source: Arc<dyn LogSource>, diag: Diagnostics) -> Self {
        Self {
            source,
            marker: config.shutdown.cleanup_marker.clone(),
            poll: config.shutdown.cleanup_poll(),
            timeout: config.shutdown.cleanup_timeout(),
            diag,
        }
    }

    fn count(&self) -> usize {
        match self.source.read() {
            Ok(text) => count_markers(&text, &self.marker),
            Err(e) => {
                self.diag.warn("cleanup", format!("error reading kernel log: {e}"));
                0
            }
        }
    }

    /// Wait for `expected` confirmations. The count is recomputed from the
    /// full log on every poll.
    pub fn confirm(&self, expected: usize) -> CleanupOutcome {
        let deadline = Instant::now() + self.timeout;
        let mut polls = 0;
        loop {
            let confirmed = self.count();
            polls += 1;
            if confirmed >= expected {
                self.diag.info(
                    "cleanup",
                    format!("secret cleanup confirmed for {confirmed} devices"),
                );
                return CleanupOutcome {
                    confirmed,
                    expected,
                    polls,
                };
            }
            let now = Instant::now();
            if now >= deadline {
                self.diag.warn(
                    "cleanup",
                    format!("cleanup may not have completed (found {confirmed}/{expected})"),
                );
                return CleanupOutcome {
                    confirmed,
                    expected,
                    polls,
                };
            }
            self.diag
                .info("cleanup", format!("cleanup progress: {confirmed}/{expected}"));
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}
