// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Root library for the `cvm-boot` measured boot and GPU teardown orchestrator.

/// Error type shared by every component
pub mod error;

/// Diagnostic sinks (log facade, in-memory transcript)
pub mod diag;

/// Node configuration value object
pub mod config;

/// SHA-256 digests and verified byte tokens
pub mod hash;
/// Format checks for untrusted values
pub mod validate;
/// Kernel command line parsing
pub mod cmdline;
/// Digest-verified boot specification types
pub mod trusted;
/// Config disk loading and verification
pub mod measured;

/// Bounded subprocess execution
pub mod process;
/// dm-verity model pack mounts
pub mod verity;
/// Working storage tmpfs mounts
pub mod storage;
/// PCI accelerator topology probe
pub mod topology;
/// Accelerator attestation
pub mod attest;

/// CUDA driver bindings and the peer-link drain
pub mod cuda;

/// Container runtime collaborator
pub mod runtime;
/// Service manager collaborator
pub mod units;
/// Kernel module unloading
pub mod kmod;
/// Kernel log cleanup confirmation
pub mod logscan;

/// Registry credentials
pub mod credentials;
/// Workload launch
pub mod workload;
/// Shim download and start
pub mod shim;

/// Boot pipeline
pub mod boot;
/// Shutdown pipeline
pub mod shutdown;

/// Command-line surface
pub mod cli;

/// In-memory collaborators for tests
pub mod fakes;

pub use boot::{BootFailure, BootSequencer, BootSeverity};
pub use config::NodeConfig;
pub use error::NodeError;
pub use shutdown::{ShutdownReport, ShutdownSequencer, ShutdownSeverity};
