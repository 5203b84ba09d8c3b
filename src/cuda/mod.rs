// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! CUDA driver integration for the shutdown peer-link drain.

pub mod drain;
pub mod driver;
pub mod libcuda;

pub use drain::{DrainEngine, DrainReport, DrainSession};
pub use driver::{CudaDriver, DriverLoader};
pub use libcuda::{LibCuda, LibCudaLoader};

/// A drain that can be run on a background thread.
pub trait InterconnectDrain: Send + Sync {
    fn drain(&self) -> DrainReport;
}

impl<L: DriverLoader> InterconnectDrain for DrainEngine<L> {
    fn drain(&self) -> DrainReport {
        DrainEngine::drain(self)
    }
}
