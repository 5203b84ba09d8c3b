// CLASSIFICATION: COMMUNITY
// Filename: topology.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Accelerator topology probe over the PCI sysfs tree.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;

/// Result of a PCI scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuTopology {
    pub has_accelerator: bool,
    pub device_count: usize,
    pub is_multi_gpu_fabric: bool,
}

impl GpuTopology {
    /// Classify a vendor-matched device count.
    #[must_use]
    pub fn classify(device_count: usize, fabric_threshold: usize) -> Self {
        Self {
            has_accelerator: device_count > 0,
            device_count,
            is_multi_gpu_fabric: device_count >= fabric_threshold,
        }
    }

    /// Cleanup confirmations to wait for at shutdown.
    ///
    /// Switch devices never report, so a fabric node expects only its
    /// compute devices; otherwise every matched device, at least one.
    #[must_use]
    pub fn expected_confirmations(&self, fabric_compute_devices: usize) -> usize {
        if self.is_multi_gpu_fabric {
            fabric_compute_devices
        } else {
            self.device_count.max(1)
        }
    }
}

/// Scans `<bus_root>/*/vendor` for a vendor id.
#[derive(Debug, Clone)]
pub struct TopologyProbe {
    bus_root: PathBuf,
    vendor_id: String,
    fabric_threshold: usize,
    diag: Diagnostics,
}

impl TopologyProbe {
    pub fn new(config: &NodeConfig, diag: Diagnostics) -> Self {
        Self {
            bus_root: config.paths.pci_devices.clone(),
            vendor_id: config.topology.vendor_id.clone(),
            fabric_threshold: config.topology.fabric_threshold,
            diag,
        }
    }

    /// Count matching devices and classify the node.
    pub fn probe(&self) -> Result<GpuTopology, NodeError> {
        let entries = match fs::read_dir(&self.bus_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.diag.info(
                    "probe",
                    format!("{} absent, no accelerators", self.bus_root.display()),
                );
                return Ok(GpuTopology::default());
            }
            Err(e) => return Err(NodeError::io_at("reading", &self.bus_root, e)),
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| NodeError::io_at("reading", &self.bus_root, e))?;
            let Ok(vendor) = fs::read_to_string(entry.path().join("vendor")) else {
                continue;
            };
            if vendor.trim() == self.vendor_id {
                count += 1;
            }
        }

        let topology = GpuTopology::classify(count, self.fabric_threshold);
        if topology.has_accelerator {
            self.diag.info(
                "probe",
                format!(
                    "{} accelerator devices detected (fabric={})",
                    topology.device_count, topology.is_multi_gpu_fabric
                ),
            );
        } else {
            self.diag.info("probe", "no accelerator devices detected");
        }
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bus(devices: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (slot, vendor) in devices {
            let dev = dir.path().join(slot);
            fs::create_dir_all(&dev).unwrap();
            fs::write(dev.join("vendor"), format!("{vendor}\n")).unwrap();
        }
        dir
    }

    fn probe_at(root: PathBuf) -> TopologyProbe {
        let mut config = NodeConfig::default();
        config.paths.pci_devices = root;
        TopologyProbe::new(&config, Diagnostics::transcript(false).0)
    }

    #[test]
    fn threshold_boundary() {
        assert!(GpuTopology::classify(12, 12).is_multi_gpu_fabric);
        assert!(!GpuTopology::classify(11, 12).is_multi_gpu_fabric);
        assert!(!GpuTopology::classify(0, 12).has_accelerator);
    }

    #[test]
    fn expected_confirmations_by_shape() {
        assert_eq!(GpuTopology::classify(12, 12).expected_confirmations(8), 8);
        assert_eq!(GpuTopology::classify(2, 12).expected_confirmations(8), 2);
        assert_eq!(GpuTopology::classify(0, 12).expected_confirmations(8), 1);
    }

    #[test]
    fn counts_only_matching_vendor() {
        let dir = bus(&[
            ("0000:01:00.0", "0x10de"),
            ("0000:02:00.0", "0x8086"),
            ("0000:03:00.0", "0x10de"),
        ]);
        fs::create_dir_all(dir.path().join("0000:04:00.0")).unwrap();
        let topo = probe_at(dir.path().to_path_buf()).probe().unwrap();
        assert_eq!(topo.device_count, 2);
        assert!(topo.has_accelerator);
        assert!(!topo.is_multi_gpu_fabric);
    }

    #[test]
    fn missing_bus_root_is_empty_topology() {
        let dir = TempDir::new().unwrap();
        let topo = probe_at(dir.path().join("absent")).probe().unwrap();
        assert_eq!(topo, GpuTopology::default());
    }

    #[test]
    fn unreadable_bus_root_is_io() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();
        assert_eq!(probe_at(file).probe().unwrap_err().kind(), "io");
    }
}
