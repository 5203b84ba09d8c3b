// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Error taxonomy shared by the boot and shutdown paths.
//!
//! Severity is deliberately not part of [`NodeError`]: the boot sequencer
//! wraps failures in a `BootFailure` carrying a `BootSeverity`, while the
//! shutdown sequencer only ever records `ShutdownSeverity::Warning`.

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by node orchestration components.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Digest or format mismatch on measured content.
    #[error("integrity check failed for {subject}: expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },
    /// Malformed untrusted input, rejected before use.
    #[error("invalid {what}: {value:?}")]
    Validation { what: &'static str, value: String },
    /// Device, filesystem or network access failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// Native driver call returned a failure code.
    #[error("driver call {call} failed (rc={code})")]
    Driver { call: &'static str, code: i32 },
    /// A bounded wait elapsed.
    #[error("{operation} did not finish within {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    /// Verified mapping or read-only mount could not be established.
    #[error("mount of {target} failed: {detail}")]
    Mount { target: String, detail: String },
    /// External command exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    /// Verified content could not be decoded.
    #[error("parsing {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    /// The container runtime could not be reached.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    /// Artifact retrieval failed.
    #[error("fetching {url}: {detail}")]
    Fetch { url: String, detail: String },
}

/// Convenience alias used across the crate.
pub type NodeResult<T> = Result<T, NodeError>;

impl NodeError {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error that occurred on `path`.
    pub fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("{action} {}", path.display()), source)
    }

    /// Build a validation error for `what`.
    pub fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        Self::Validation {
            what,
            value: value.into(),
        }
    }

    /// Short machine-friendly tag, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integrity { .. } => "integrity",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
            Self::Driver { .. } => "driver",
            Self::Timeout { .. } => "timeout",
            Self::Mount { .. } => "mount",
            Self::Command { .. } => "command",
            Self::Parse { .. } => "parse",
            Self::RuntimeUnavailable(_) => "runtime-unavailable",
            Self::Fetch { .. } => "fetch",
        }
    }
}

/// Helper for building a not-found error on a required path.
pub(crate) fn missing(what: &str, path: &Path) -> NodeError {
    NodeError::io(
        format!("{what} not found at {}", path.display()),
        io::Error::from(io::ErrorKind::NotFound),
    )
}
