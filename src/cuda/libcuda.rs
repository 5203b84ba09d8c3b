// CLASSIFICATION: COMMUNITY
// Filename: libcuda.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Dynamically loaded `libcuda.so.1`.
//!
//! This is the only module in the crate that contains `unsafe` code. Symbols
//! are resolved once at load time from an allowlist; raw `CUcontext`
//! pointers never leave this file.

use std::ffi::c_void;
use std::os::raw::{c_int, c_uint};

use libloading::Library;
use log::warn;

use super::driver::{check, CudaDriver, DriverLoader};
use crate::error::NodeError;

type CuResult = c_int;
type CuDevice = c_int;
type CuContext = *mut c_void;

type FnInit = unsafe extern "C" fn(c_uint) -> CuResult;
type FnDeviceGetCount = unsafe extern "C" fn(*mut c_int) -> CuResult;
type FnDeviceGet = unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult;
type FnCtxCreate = unsafe extern "C" fn(*mut CuContext, c_uint, CuDevice) -> CuResult;
type FnCtxHandle = unsafe extern "C" fn(CuContext) -> CuResult;
type FnCtxSynchronize = unsafe extern "C" fn() -> CuResult;
type FnCtxEnablePeer = unsafe extern "C" fn(CuContext, c_uint) -> CuResult;
type FnCanAccessPeer = unsafe extern "C" fn(*mut c_int, CuDevice, CuDevice) -> CuResult;
type FnPrimaryCtxReset = unsafe extern "C" fn(CuDevice) -> CuResult;

/// Default soname of the user-space driver.
pub const LIBCUDA: &str = "libcuda.so.1";

static VALID_SYMBOLS: &[&str] = &[
    "cuInit",
    "cuDeviceGetCount",
    "cuDeviceGet",
    "cuCtxCreate_v2",
    "cuCtxDestroy_v2",
    "cuCtxSetCurrent",
    "cuCtxSynchronize",
    "cuCtxEnablePeerAccess",
    "cuCtxDisablePeerAccess",
    "cuDeviceCanAccessPeer",
    "cuDevicePrimaryCtxReset_v2",
];

struct Api {
    init: FnInit,
    device_get_count: FnDeviceGetCount,
    device_get: FnDeviceGet,
    ctx_create: FnCtxCreate,
    ctx_destroy: FnCtxHandle,
    ctx_set_current: FnCtxHandle,
    ctx_synchronize: FnCtxSynchronize,
    ctx_enable_peer: FnCtxEnablePeer,
    ctx_disable_peer: FnCtxHandle,
    can_access_peer: FnCanAccessPeer,
    primary_ctx_reset: FnPrimaryCtxReset,
}

/// Resolve an allowlisted symbol as a plain function pointer.
///
/// # Safety
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, NodeError> {
    if !VALID_SYMBOLS.contains(&name) {
        return Err(NodeError::Driver {
            call: name,
            code: -2,
        });
    }
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    lib.get::<T>(&bytes).map(|s| *s).map_err(|e| {
        warn!("libcuda: missing symbol {name}: {e}");
        NodeError::Driver {
            call: name,
            code: -2,
        }
    })
}

/// Per-ordinal native state.
#[derive(Clone, Copy)]
struct Slot {
    device: CuDevice,
    context: CuContext,
}

/// Live binding to the user-space CUDA driver.
///
/// Declared field order matters: `api` function pointers are dropped before
/// `_lib` unloads the library.
pub struct LibCuda {
    api: Api,
    slots: Vec<Option<Slot>>,
    _lib: Library,
}

impl LibCuda {
    /// Load the library at `path` and resolve every required symbol.
    pub fn open(path: &str) -> Result<Self, NodeError> {
        // SAFETY: loading runs the vendor driver's initialisers.
        let lib = unsafe { Library::new(path) }.map_err(|e| NodeError::Io {
            context: format!("loading {path}"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        })?;
        // SAFETY: every type alias mirrors the prototype in cuda.h.
        let api = unsafe {
            Api {
                init: symbol(&lib, "cuInit")?,
                device_get_count: symbol(&lib, "cuDeviceGetCount")?,
                device_get: symbol(&lib, "cuDeviceGet")?,
                ctx_create: symbol(&lib, "cuCtxCreate_v2")?,
                ctx_destroy: symbol(&lib, "cuCtxDestroy_v2")?,
                ctx_set_current: symbol(&lib, "cuCtxSetCurrent")?,
                ctx_synchronize: symbol(&lib, "cuCtxSynchronize")?,
                ctx_enable_peer: symbol(&lib, "cuCtxEnablePeerAccess")?,
                ctx_disable_peer: symbol(&lib, "cuCtxDisablePeerAccess")?,
                can_access_peer: symbol(&lib, "cuDeviceCanAccessPeer")?,
                primary_ctx_reset: symbol(&lib, "cuDevicePrimaryCtxReset_v2")?,
            }
        };
        Ok(Self {
            api,
            slots: Vec::new(),
            _lib: lib,
        })
    }

    fn slot(&self, ordinal: usize, call: &'static str) -> Result<Slot, NodeError> {
        self.slots
            .get(ordinal)
            .copied()
            .flatten()
            .ok_or(NodeError::Driver { call, code: -1 })
    }

    fn device(&mut self, ordinal: usize) -> Result<CuDevice, NodeError> {
        if let Some(Some(slot)) = self.slots.get(ordinal) {
            return Ok(slot.device);
        }
        let index = c_int::try_from(ordinal).map_err(|_| NodeError::Driver {
            call: "cuDeviceGet",
            code: -1,
        })?;
        let mut dev: CuDevice = 0;
        // SAFETY: out-pointer to a live local.
        check("cuDeviceGet", unsafe { (self.api.device_get)(&mut dev, index) })?;
        Ok(dev)
    }
}

impl CudaDriver for LibCuda {
    fn init(&mut self) -> Result<(), NodeError> {
        // SAFETY: flags must be zero.
        check("cuInit", unsafe { (self.api.init)(0) })
    }

    fn device_count(&mut self) -> Result<usize, NodeError> {
        let mut n: c_int = 0;
        // SAFETY: out-pointer to a live local.
        check("cuDeviceGetCount", unsafe { (self.api.device_get_count)(&mut n) })?;
        let n = usize::try_from(n).unwrap_or(0);
        self.slots = vec![None; n];
        Ok(n)
    }

    fn create_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let device = self.device(ordinal)?;
        let mut ctx: CuContext = std::ptr::null_mut();
        // SAFETY: out-pointer to a live local; device came from cuDeviceGet.
        check("cuCtxCreate", unsafe { (self.api.ctx_create)(&mut ctx, 0, device) })?;
        if ctx.is_null() {
            return Err(NodeError::Driver {
                call: "cuCtxCreate",
                code: -1,
            });
        }
        if let Some(slot) = self.slots.get_mut(ordinal) {
            *slot = Some(Slot {
                device,
                context: ctx,
            });
        }
        Ok(())
    }

    fn set_current(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let slot = self.slot(ordinal, "cuCtxSetCurrent")?;
        // SAFETY: context is live until destroy_context.
        check("cuCtxSetCurrent", unsafe { (self.api.ctx_set_current)(slot.context) })
    }

    fn synchronize(&mut self) -> Result<(), NodeError> {
        // SAFETY: operates on the calling thread's current context.
        check("cuCtxSynchronize", unsafe { (self.api.ctx_synchronize)() })
    }

    fn can_access_peer(&mut self, from: usize, to: usize) -> bool {
        let call = "cuDeviceCanAccessPeer";
        let (Ok(a), Ok(b)) = (self.slot(from, call), self.slot(to, call)) else {
            return false;
        };
        let mut ok: c_int = 0;
        // SAFETY: out-pointer to a live local.
        let rc = unsafe { (self.api.can_access_peer)(&mut ok, a.device, b.device) };
        rc == 0 && ok != 0
    }

    fn enable_peer_access(&mut self, peer: usize) -> Result<(), NodeError> {
        let slot = self.slot(peer, "cuCtxEnablePeerAccess")?;
        // SAFETY: peer context is live; flags must be zero.
        check("cuCtxEnablePeerAccess", unsafe { (self.api.ctx_enable_peer)(slot.context, 0) })
    }

    fn disable_peer_access(&mut self, peer: usize) -> Result<(), NodeError> {
        let slot = self.slot(peer, "cuCtxDisablePeerAccess")?;
        // SAFETY: peer context is live.
        check("cuCtxDisablePeerAccess", unsafe { (self.api.ctx_disable_peer)(slot.context) })
    }

    fn destroy_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let slot = self.slot(ordinal, "cuCtxDestroy")?;
        if let Some(s) = self.slots.get_mut(ordinal) {
            *s = None;
        }
        // SAFETY: the slot is cleared first so the pointer is never reused.
        check("cuCtxDestroy", unsafe { (self.api.ctx_destroy)(slot.context) })
    }

    fn reset_primary_context(&mut self, ordinal: usize) -> Result<(), NodeError> {
        let device = self.device(ordinal)?;
        // SAFETY: device came from cuDeviceGet.
        check("cuDevicePrimaryCtxReset", unsafe { (self.api.primary_ctx_reset)(device) })
    }
}

/// Loads [`LibCuda`] from a soname.
#[derive(Debug, Clone)]
pub struct LibCudaLoader {
    path: String,
}

impl LibCudaLoader {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for LibCudaLoader {
    fn default() -> Self {
        Self::new(LIBCUDA)
    }
}

impl DriverLoader for LibCudaLoader {
    type Driver = LibCuda;

    fn load(&self) -> Result<LibCuda, NodeError> {
        LibCuda::open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_an_error() {
        let err = LibCudaLoader::new("libcuda-does-not-exist.so.0")
            .load()
            .err()
            .unwrap();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn allowlist_covers_every_resolved_symbol() {
        assert_eq!(VALID_SYMBOLS.len(), 11);
        assert!(VALID_SYMBOLS.contains(&"cuDevicePrimaryCtxReset_v2"));
    }
}
