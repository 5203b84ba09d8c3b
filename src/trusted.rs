// CLASSIFICATION: COMMUNITY
// Filename: trusted.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Boot specification types.
//!
//! [`TrustedConfig`] can only be built from [`VerifiedBytes`]; the raw serde
//! representation stays private to this module.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::NodeError;
use crate::hash::VerifiedBytes;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "shim-version", default)]
    shim_version: String,
    #[serde(default)]
    shim: serde_yaml::Value,
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    containers: Vec<ContainerSpec>,
}

/// One entry of the model list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Model pack identifier, `<roothash>_<offset>_<uuid>`.
    pub mpk: String,
}

/// Parsed, digest-verified boot specification.
#[derive(Debug, Clone)]
pub struct TrustedConfig {
    digest: String,
    shim_version: String,
    shim: serde_yaml::Value,
    models: Vec<ModelEntry>,
    containers: Vec<ContainerSpec>,
}

impl TrustedConfig {
    /// Parse verified bytes.
    pub fn from_verified(source: &VerifiedBytes) -> Result<Self, NodeError> {
        let raw: RawConfig =
            serde_yaml::from_slice(source.as_bytes()).map_err(|e| NodeError::Parse {
                what: "config",
                detail: e.to_string(),
            })?;
        Ok(Self {
            digest: source.digest().to_owned(),
            shim_version: raw.shim_version,
            shim: raw.shim,
            models: raw.models,
            containers: raw.containers,
        })
    }

    /// Digest the configuration was verified against.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Shim release identifier, `version@sha256:digest`.
    #[must_use]
    pub fn shim_version(&self) -> &str {
        &self.shim_version
    }

    /// Opaque shim settings, written out verbatim for the shim service.
    #[must_use]
    pub fn shim(&self) -> &serde_yaml::Value {
        &self.shim
    }

    #[must_use]
    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    #[must_use]
    pub fn containers(&self) -> &[ContainerSpec] {
        &self.containers
    }
}

/// Environment entry: a bare key resolved from external secrets, or inline
/// `KEY: value` pairs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnvEntry {
    Key(String),
    Inline(BTreeMap<String, serde_yaml::Value>),
}

/// Command line given either as one string or as argv.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Split into argv; a single line is split on whitespace.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
            Self::Argv(argv) => argv.clone(),
        }
    }
}

/// GPU request: `true`, a count, `"all"` or a comma-separated id list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GpuRequest {
    Flag(bool),
    Count(i64),
    Ids(String),
}

impl GpuRequest {
    /// Value for the runtime's `--gpus` flag, `None` when no GPU is requested.
    #[must_use]
    pub fn runtime_flag(&self) -> Option<String> {
        match self {
            Self::Flag(false) => None,
            Self::Flag(true) => Some("all".into()),
            Self::Count(n) if *n < 0 => Some("all".into()),
            Self::Count(0) => None,
            Self::Count(n) => Some(n.to_string()),
            Self::Ids(ids) if ids == "all" => Some("all".into()),
            Self::Ids(ids) => Some(format!("\"device={ids}\"")),
        }
    }
}

/// Container health check.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub start_period: Option<String>,
}

/// Workload specification, passed through to the container runtime.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(alias = "args")]
    pub command: Option<CommandSpec>,
    pub entrypoint: Option<CommandSpec>,
    pub env: Vec<EnvEntry>,
    pub secrets: Vec<String>,
    pub volumes: Vec<String>,
    pub devices: Vec<String>,
    pub gpus: Option<GpuRequest>,
    pub network_mode: Option<String>,
    pub runtime: Option<String>,
    pub ipc: Option<String>,
    pub pid: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub read_only: bool,
    pub tmpfs: BTreeMap<String, String>,
    pub restart: Option<String>,
    pub shm_size: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<u32>,
    pub healthcheck: Option<HealthcheckSpec>,
}

/// Key-value lookups from the external secrets blob.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExternalSecrets {
    pub env: BTreeMap<String, Option<String>>,
    pub secrets: BTreeMap<String, Option<String>>,
}

fn present(value: Option<&Option<String>>) -> Option<&str> {
    value
        .and_then(Option::as_deref)
        .filter(|v| !v.is_empty() && *v != "null")
}

impl ExternalSecrets {
    /// Parse the staged secrets blob. It is not measured, so nothing in it
    /// may influence a trust decision.
    pub fn parse(bytes: &[u8]) -> Result<Self, NodeError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(bytes).map_err(|e| NodeError::Parse {
            what: "external secrets",
            detail: e.to_string(),
        })
    }

    /// Value of `key` in the `env` map.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        present(self.env.get(key))
    }

    /// Value of `key` in the `secrets` map.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<&str> {
        present(self.secrets.get(key))
    }

    /// First non-empty secret among `keys`.
    #[must_use]
    pub fn first_secret(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.secret(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{digest, verify_bytes};

    fn trusted(text: &str) -> TrustedConfig {
        let bytes = text.as_bytes().to_vec();
        let verified = verify_bytes("config", &digest(&bytes), bytes).unwrap();
        TrustedConfig::from_verified(&verified).unwrap()
    }

    #[test]
    fn json_flow_document_parses() {
        let cfg = trusted(r#"{"models":[]}"#);
        assert!(cfg.models().is_empty());
        assert!(cfg.containers().is_empty());
        assert_eq!(cfg.shim_version(), "");
    }

    #[test]
    fn full_document_parses() {
        let cfg = trusted(
            r#"
shim-version: v1.2.3@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
shim:
  upstream-port: 8080
models:
  - mpk: abc_0_def
containers:
  - name: vllm
    image: ghcr.io/example/vllm:latest
    args: --model /tinfoil/mpk/x
    env:
      - HF_TOKEN
      - MODE: serve
    secrets: [API_KEY]
    gpus: all
"#,
        );
        assert_eq!(cfg.models()[0].mpk, "abc_0_def");
        let c = &cfg.containers()[0];
        assert_eq!(c.name, "vllm");
        assert_eq!(c.command.as_ref().unwrap().argv(), vec!["--model", "/tinfoil/mpk/x"]);
        assert_eq!(c.env.len(), 2);
        assert_eq!(c.gpus.as_ref().unwrap().runtime_flag().as_deref(), Some("all"));
        assert!(cfg.shim().get("upstream-port").is_some());
    }

    #[test]
    fn gpu_request_forms() {
        assert_eq!(GpuRequest::Flag(false).runtime_flag(), None);
        assert_eq!(GpuRequest::Count(2).runtime_flag().as_deref(), Some("2"));
        assert_eq!(
            GpuRequest::Ids("0,1".into()).runtime_flag().as_deref(),
            Some("\"device=0,1\"")
        );
    }

    #[test]
    fn null_secrets_are_absent() {
        let ext =
            ExternalSecrets::parse(b"secrets:\n  A: 'null'\n  B: ''\n  C: x\n  D: null\n").unwrap();
        assert_eq!(ext.secret("A"), None);
        assert_eq!(ext.secret("D"), None);
        assert_eq!(ext.secret("B"), None);
        assert_eq!(ext.first_secret(&["A", "C"]), Some("x"));
    }
}
