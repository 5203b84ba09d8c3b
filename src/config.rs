// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Node configuration value object.
//!
//! Every knob has a default matching the reference deployment, so an empty
//! (or absent) TOML file yields a working configuration. The value is built
//! once in `main` and passed by reference into each component.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable naming an alternative configuration file.
pub const CONFIG_ENV: &str = "CVM_BOOT_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub paths: PathsConfig,
    pub boot: BootConfig,
    pub topology: TopologyConfig,
    pub shutdown: ShutdownConfig,
    pub shim: ShimConfig,
    pub attestation: AttestationConfig,
    pub workloads: WorkloadConfig,
    pub units: UnitConfig,
}

/// Filesystem and device locations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Root of the tmpfs working storage. Never derived from untrusted input.
    pub working_root: PathBuf,
    pub tmp_root: PathBuf,
    pub config_device: PathBuf,
    pub secrets_device: PathBuf,
    pub cmdline: PathBuf,
    pub pci_devices: PathBuf,
    pub proc_modules: PathBuf,
    pub disk_by_uuid: PathBuf,
    pub mapper_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working_root: PathBuf::from("/mnt/ramdisk"),
            tmp_root: PathBuf::from("/tmp"),
            config_device: PathBuf::from("/dev/sdb"),
            secrets_device: PathBuf::from("/dev/sdc"),
            cmdline: PathBuf::from("/proc/cmdline"),
            pci_devices: PathBuf::from("/sys/bus/pci/devices"),
            proc_modules: PathBuf::from("/proc/modules"),
            disk_by_uuid: PathBuf::from("/dev/disk/by-uuid"),
            mapper_dir: PathBuf::from("/dev/mapper"),
        }
    }
}

impl PathsConfig {
    /// Staged copy of the verified configuration.
    #[must_use]
    pub fn staged_config(&self) -> PathBuf {
        self.working_root.join("config.yml")
    }

    /// Staged copy of the external secrets blob.
    #[must_use]
    pub fn staged_secrets(&self) -> PathBuf {
        self.working_root.join("external-config.yml")
    }

    /// Parent directory of model pack mount points.
    #[must_use]
    pub fn model_root(&self) -> PathBuf {
        self.working_root.join("mpk")
    }

    /// Docker client configuration directory.
    #[must_use]
    pub fn docker_config_dir(&self) -> PathBuf {
        self.working_root.join("docker-config")
    }

    /// Service-account key handed to `gcloud`.
    #[must_use]
    pub fn gcloud_key(&self) -> PathBuf {
        self.working_root.join("gcloud_key.json")
    }

    /// `CLOUDSDK_CONFIG` directory.
    #[must_use]
    pub fn gcloud_config_dir(&self) -> PathBuf {
        self.working_root.join("gcloud")
    }
}

/// Measured boot settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// Kernel command line key carrying the config digest.
    pub config_hash_param: String,
    /// tmpfs `size=` option for the working root.
    pub working_size: String,
    /// tmpfs `size=` option for the scratch root.
    pub tmp_size: String,
    /// Skip tmpfs mounts when storage is prepared by the image.
    pub skip_tmpfs: bool,
    /// Bound on each veritysetup/mount subprocess.
    pub command_timeout_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            config_hash_param: "tinfoil-config-hash".into(),
            working_size: "75%".into(),
            tmp_size: "512M".into(),
            skip_tmpfs: false,
            command_timeout_secs: 120,
        }
    }
}

impl BootConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Accelerator topology assumptions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    /// PCI vendor attribute identifying accelerator devices.
    pub vendor_id: String,
    /// Device count at or above which the node is a switch fabric.
    pub fabric_threshold: usize,
    /// Compute devices expected to confirm cleanup on a fabric node.
    pub fabric_compute_devices: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            vendor_id: "0x10de".into(),
            fabric_threshold: 12,
            fabric_compute_devices: 8,
        }
    }
}

/// Shutdown bounds and GPU stack handling.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub container_stop_grace_secs: u64,
    pub container_kill_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub cleanup_timeout_secs: u64,
    pub cleanup_poll_ms: u64,
    /// Kernel log line emitted once per device after secrets are erased.
    pub cleanup_marker: String,
    /// Stop GPU services and unload modules here instead of in the init system.
    pub manage_gpu_stack: bool,
    /// Units stopped in order when managing the GPU stack.
    pub gpu_services: Vec<String>,
    /// Modules unloaded in order, dependents first.
    pub gpu_modules: Vec<String>,
    pub module_unload_timeout_secs: u64,
    pub service_settle_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            container_stop_grace_secs: 120,
            container_kill_timeout_secs: 10,
            drain_timeout_secs: 60,
            cleanup_timeout_secs: 60,
            cleanup_poll_ms: 2_000,
            cleanup_marker: "kgspCheckGspRmCcCleanup_GH100: CC secret cleanup successful".into(),
            manage_gpu_stack: false,
            gpu_services: vec![
                "nvidia-cdi-refresh.path".into(),
                "nvidia-cdi-refresh.service".into(),
                "nvidia-fabricmanager.service".into(),
                "nvidia-persistenced.service".into(),
            ],
            gpu_modules: vec![
                "nvidia_uvm".into(),
                "nvidia_drm".into(),
                "nvidia_modeset".into(),
                "nvidia".into(),
            ],
            module_unload_timeout_secs: 30,
            service_settle_ms: 2_000,
        }
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.container_stop_grace_secs)
    }

    #[must_use]
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.container_kill_timeout_secs)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    #[must_use]
    pub fn cleanup_poll(&self) -> Duration {
        Duration::from_millis(self.cleanup_poll_ms)
    }

    #[must_use]
    pub fn module_unload_timeout(&self) -> Duration {
        Duration::from_secs(self.module_unload_timeout_secs)
    }

    #[must_use]
    pub fn service_settle(&self) -> Duration {
        Duration::from_millis(self.service_settle_ms)
    }
}

/// Auxiliary shim release retrieval.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ShimConfig {
    /// Download URL template; `{version}` is substituted.
    pub download_url: String,
    pub binary_name: String,
    pub config_name: String,
    pub unit: String,
    pub download_timeout_secs: u64,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            download_url: "https://github.com/tinfoilsh/tfshim/releases/download/{version}/tfshim"
                .into(),
            binary_name: "tfshim".into(),
            config_name: "shim.yml".into(),
            unit: "tfshim.service".into(),
            download_timeout_secs: 300,
        }
    }
}

impl ShimConfig {
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Opaque verifier command lines.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AttestationConfig {
    pub single_gpu_command: Vec<String>,
    pub fabric_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        let venv = "source /opt/venv-attestation/bin/activate";
        Self {
            single_gpu_command: vec![
                "/bin/bash".into(),
                "-c".into(),
                format!("{venv} && python3 -m verifier.cc_admin"),
            ],
            fabric_command: vec![
                "/bin/bash".into(),
                "-c".into(),
                format!(
                    "{venv} && python3 -m ppcie.verifier.verification \
                     --gpu-attestation-mode=LOCAL --switch-attestation-mode=LOCAL"
                ),
            ],
            timeout_secs: 600,
        }
    }
}

impl AttestationConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Container runtime invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    pub runtime_binary: String,
    /// Path inside each container where the working root is bound.
    pub bind_target: String,
    pub default_network: String,
    /// Bound on one create+start (includes the image pull).
    pub launch_timeout_secs: u64,
    pub list_timeout_secs: u64,
    pub gcloud_binary: String,
    /// Bound on each `gcloud auth` call.
    pub auth_timeout_secs: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".into(),
            bind_target: "/tinfoil".into(),
            default_network: "host".into(),
            launch_timeout_secs: 1_800,
            list_timeout_secs: 30,
            gcloud_binary: "gcloud".into(),
            auth_timeout_secs: 60,
        }
    }
}

impl WorkloadConfig {
    #[must_use]
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    #[must_use]
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Service manager invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UnitConfig {
    pub systemctl: String,
    pub timeout_secs: u64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            systemctl: "systemctl".into(),
            timeout_secs: 30,
        }
    }
}

impl UnitConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NodeConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    /// Load configuration from a TOML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading node configuration {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Load from an explicit path, falling back to [`CONFIG_ENV`], then defaults.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load_file(path);
        }
        if let Ok(value) = std::env::var(CONFIG_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Self::load_file(Path::new(trimmed));
            }
        }
        Ok(Self::default())
    }
}
