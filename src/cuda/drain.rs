// CLASSIFICATION: COMMUNITY
// Filename: drain.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Peer-link drain.
//!
//! Cycles peer access between every pair of devices through
//! enable → synchronize → disable → synchronize so the switch fabric is
//! quiescent before the driver is torn down. Every failure is logged and
//! only narrows what the drain touches; the drain itself never fails.

use std::time::{Duration, Instant};

use super::driver::{CudaDriver, DriverLoader};
use crate::diag::Diagnostics;

const STEP: &str = "drain";

/// Counters from one drain attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Devices enumerated by the driver.
    pub devices: usize,
    /// Devices whose context opened.
    pub valid: usize,
    /// Peer mappings enabled.
    pub enabled: usize,
    /// Peer mappings disabled.
    pub disabled: usize,
    /// Set when the driver could not be loaded or initialised.
    pub skipped: bool,
    pub elapsed: Duration,
}

/// Contexts opened for one drain, released on every exit path.
///
/// Owns the driver, so dropping the session also unloads it.
pub struct DrainSession<D: CudaDriver> {
    driver: D,
    valid: Vec<bool>,
    closed: bool,
    diag: Diagnostics,
}

impl<D: CudaDriver> DrainSession<D> {
    /// Open one context per device; failures are excluded for the session.
    pub fn open(mut driver: D, devices: usize, diag: Diagnostics) -> Self {
        let mut valid = vec![false; devices];
        for (i, slot) in valid.iter_mut().enumerate() {
            match driver.create_context(i) {
                Ok(()) => *slot = true,
                Err(e) => diag.warn(STEP, format!("context for device {i} failed: {e}")),
            }
        }
        Self {
            driver,
            valid,
            closed: false,
            diag,
        }
    }

    /// Ordinals with a live context.
    pub fn valid_devices(&self) -> Vec<usize> {
        (0..self.valid.len()).filter(|&i| self.valid[i]).collect()
    }

    fn ordered_pairs(&self) -> Vec<(usize, Vec<usize>)> {
        let live = self.valid_devices();
        live.iter()
            .map(|&i| (i, live.iter().copied().filter(|&j| j != i).collect()))
            .collect()
    }

    /// Enable peer access for every capable ordered pair.
    pub fn enable_pass(&mut self) -> usize {
        let mut enabled = 0;
        for (i, peers) in self.ordered_pairs() {
            if let Err(e) = self.driver.set_current(i) {
                self.diag.warn(STEP, format!("set current {i}: {e}"));
                continue;
            }
            for j in peers {
                if !self.driver.can_access_peer(i, j) {
                    continue;
                }
                match self.driver.enable_peer_access(j) {
                    Ok(()) => enabled += 1,
                    Err(e) => self.diag.debug(STEP, format!("enable {i}->{j}: {e}")),
                }
            }
        }
        enabled
    }

    /// Disable peer access for every ordered pair, enabled or not.
    pub fn disable_pass(&mut self) -> usize {
        let mut disabled = 0;
        for (i, peers) in self.ordered_pairs() {
            if let Err(e) = self.driver.set_current(i) {
                self.diag.warn(STEP, format!("set current {i}: {e}"));
                continue;
            }
            for j in peers {
                match self.driver.disable_peer_access(j) {
                    Ok(()) => disabled += 1,
                    Err(e) => self.diag.debug(STEP, format!("disable {i}->{j}: {e}")),
                }
            }
        }
        disabled
    }

    /// Synchronize every valid device.
    pub fn barrier(&mut self) {
        for i in self.valid_devices() {
            let res = self
                .driver
                .set_current(i)
                .and_then(|()| self.driver.synchronize());
            if let Err(e) = res {
                self.diag.warn(STEP, format!("synchronize {i}: {e}"));
            }
        }
    }

    /// Destroy valid contexts, then reset every device's primary context.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for i in self.valid_devices() {
            if let Err(e) = self.driver.destroy_context(i) {
                self.diag.warn(STEP, format!("destroy context {i}: {e}"));
            }
            self.valid[i] = false;
        }
        for i in 0..self.valid.len() {
            if let Err(e) = self.driver.reset_primary_context(i) {
                self.diag.warn(STEP, format!("reset primary context {i}: {e}"));
            }
        }
    }
}

impl<D: CudaDriver> Drop for DrainSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain engine over a driver loader.
pub struct DrainEngine<L: DriverLoader> {
    loader: L,
    diag: Diagnostics,
}

impl<L: DriverLoader> DrainEngine<L> {
    pub fn new(loader: L, diag: Diagnostics) -> Self {
        Self { loader, diag }
    }

    /// Run one drain on the calling thread.
    pub fn drain(&self) -> DrainReport {
        let start = Instant::now();
        let mut report = DrainReport::default();
        self.diag.info(STEP, "draining peer-link state via driver API");

        let mut driver = match self.loader.load() {
            Ok(d) => d,
            Err(e) => {
                self.diag.info(STEP, format!("driver not available, skipping: {e}"));
                report.skipped = true;
                report.elapsed = start.elapsed();
                return report;
            }
        };
        if let Err(e) = driver.init() {
            self.diag.warn(STEP, format!("driver init failed, skipping: {e}"));
            report.skipped = true;
            report.elapsed = start.elapsed();
            return report;
        }
        let devices = match driver.device_count() {
            Ok(0) | Err(_) => {
                self.diag.info(STEP, "no devices found");
                report.elapsed = start.elapsed();
                return report;
            }
            Ok(n) => n,
        };
        self.diag.info(STEP, format!("found {devices} devices"));

        let mut session = DrainSession::open(driver, devices, self.diag.clone());
        report.devices = devices;
        report.valid = session.valid_devices().len();

        report.enabled = session.enable_pass();
        self.diag
            .info(STEP, format!("enabled {} peer access links", report.enabled));
        session.barrier();

        report.disabled = session.disable_pass();
        self.diag
            .info(STEP, format!("disabled {} peer access links", report.disabled));
        session.barrier();

        session.close();
        drop(session);

        report.elapsed = start.elapsed();
        self.diag.info(
            STEP,
            format!(
                "drain complete in {} ms (enabled={}, disabled={})",
                report.elapsed.as_millis(),
                report.enabled,
                report.disabled
            ),
        );
        report
    }
}
