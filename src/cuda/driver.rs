// CLASSIFICATION: COMMUNITY
// Filename: driver.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Ordinal-level view of the CUDA driver API used by the peer-link drain.
//!
//! Implementations own every native handle; callers only ever name devices
//! by ordinal. A context created for ordinal `i` is the one later addressed
//! by `set_current(i)`, `enable_peer_access(i)` and `destroy_context(i)`.

use crate::error::NodeError;

/// `CUDA_SUCCESS`.
pub const CUDA_SUCCESS: i32 = 0;

/// Map a raw `CUresult` to a [`NodeError::Driver`].
pub fn check(call: &'static str, rc: i32) -> Result<(), NodeError> {
    if rc == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(NodeError::Driver { call, code: rc })
    }
}

/// Driver calls needed to cycle peer access and tear contexts down.
pub trait CudaDriver {
    /// `cuInit(0)`.
    fn init(&mut self) -> Result<(), NodeError>;
    /// `cuDeviceGetCount`.
    fn device_count(&mut self) -> Result<usize, NodeError>;
    /// `cuDeviceGet` + `cuCtxCreate` for `ordinal`.
    fn create_context(&mut self, ordinal: usize) -> Result<(), NodeError>;
    /// `cuCtxSetCurrent` with the context of `ordinal`.
    fn set_current(&mut self, ordinal: usize) -> Result<(), NodeError>;
    /// `cuCtxSynchronize` on the current context.
    fn synchronize(&mut self) -> Result<(), NodeError>;
    /// `cuDeviceCanAccessPeer(from, to)`; failures read as `false`.
    fn can_access_peer(&mut self, from: usize, to: usize) -> bool;
    /// `cuCtxEnablePeerAccess` from the current context to `peer`'s context.
    fn enable_peer_access(&mut self, peer: usize) -> Result<(), NodeError>;
    /// `cuCtxDisablePeerAccess` from the current context to `peer`'s context.
    fn disable_peer_access(&mut self, peer: usize) -> Result<(), NodeError>;
    /// `cuCtxDestroy` for `ordinal`'s context.
    fn destroy_context(&mut self, ordinal: usize) -> Result<(), NodeError>;
    /// `cuDevicePrimaryCtxReset` for device `ordinal`.
    fn reset_primary_context(&mut self, ordinal: usize) -> Result<(), NodeError>;
}

/// Produces a driver instance on the thread that will use it.
///
/// Native handles are not `Send`, so the drain thread loads its own driver.
pub trait DriverLoader: Send + Sync {
    type Driver: CudaDriver;

    /// Load the driver; an error means the drain is skipped.
    fn load(&self) -> Result<Self::Driver, NodeError>;
}
