// CLASSIFICATION: COMMUNITY
// Filename: diag.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Diagnostic sink threaded through every component.
//!
//! Components never log through ambient state directly; they receive a
//! [`Diagnostics`] handle and report `(level, step, message)` triples. The
//! default sink forwards to the `log` facade, the transcript sink also keeps
//! a buffered copy for tests and the `--transcript` debug flag.

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use log::Level;

/// Destination for diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    /// Record one message emitted while executing `step`.
    fn record(&self, level: Level, step: &str, message: &str);
}

/// Forwards every record to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, level: Level, step: &str, message: &str) {
        log::log!(target: "cvm_boot", level, "[{step}] {message}");
    }
}

/// One buffered transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    /// RFC 3339 timestamp of the record.
    pub at: String,
    /// Severity.
    pub level: Level,
    /// Step that produced the record.
    pub step: String,
    /// Rendered message.
    pub message: String,
}

/// Buffered transcript, optionally echoed to the `log` facade.
#[derive(Debug, Default)]
pub struct TranscriptSink {
    echo: bool,
    lines: Mutex<Vec<TranscriptLine>>,
}

impl TranscriptSink {
    /// Create a transcript that only buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript that buffers and forwards to `log`.
    #[must_use]
    pub fn echoing() -> Self {
        Self {
            echo: true,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the recorded lines.
    #[must_use]
    pub fn lines(&self) -> Vec<TranscriptLine> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Return true if any line from `step` contains `needle`.
    #[must_use]
    pub fn contains(&self, step: &str, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|line| line.step == step && line.message.contains(needle))
    }

    /// Number of lines recorded at `level`.
    #[must_use]
    pub fn count_at(&self, level: Level) -> usize {
        self.lines().iter().filter(|line| line.level == level).count()
    }

    /// Render the transcript one record per line.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines()
            .iter()
            .map(|l| format!("{} {:<5} [{}] {}", l.at, l.level, l.step, l.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DiagnosticSink for TranscriptSink {
    fn record(&self, level: Level, step: &str, message: &str) {
        if self.echo {
            LogSink.record(level, step, message);
        }
        let line = TranscriptLine {
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            step: step.to_owned(),
            message: message.to_owned(),
        };
        match self.lines.lock() {
            Ok(mut guard) => guard.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

/// Cloneable handle passed into component constructors.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::log()
    }
}

impl Diagnostics {
    /// Wrap an arbitrary sink.
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    /// Handle backed by the `log` facade.
    #[must_use]
    pub fn log() -> Self {
        Self::new(Arc::new(LogSink))
    }

    /// Handle backed by a fresh transcript; the transcript is returned for
    /// later inspection.
    #[must_use]
    pub fn transcript(echo: bool) -> (Self, Arc<TranscriptSink>) {
        let sink = Arc::new(if echo {
            TranscriptSink::echoing()
        } else {
            TranscriptSink::new()
        });
        (Self::new(sink.clone()), sink)
    }

    pub fn debug(&self, step: &str, message: impl Display) {
        self.sink.record(Level::Debug, step, &message.to_string());
    }

    pub fn info(&self, step: &str, message: impl Display) {
        self.sink.record(Level::Info, step, &message.to_string());
    }

    pub fn warn(&self, step: &str, message: impl Display) {
        self.sink.record(Level::Warn, step, &message.to_string());
    }

    pub fn error(&self, step: &str, message: impl Display) {
        self.sink.record(Level::Error, step, &message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_keeps_step_and_level() {
        let (diag, transcript) = Diagnostics::transcript(false);
        diag.info("config", "hash verified");
        diag.warn("secrets", "external config disk not found");
        assert!(transcript.contains("config", "verified"));
        assert!(!transcript.contains("config", "not found"));
        assert_eq!(transcript.count_at(Level::Warn), 1);
        assert!(transcript.render().contains("[secrets]"));
    }

    #[test]
    fn clones_share_the_sink() {
        let (diag, transcript) = Diagnostics::transcript(false);
        let other = diag.clone();
        other.error("mount", "boom");
        assert_eq!(transcript.lines().len(), 1);
    }
}
