// CLASSIFICATION: COMMUNITY
// Filename: credentials.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Registry credentials for image pulls.
//!
//! `REGISTRY_<HOST>_TOKEN` secrets (and an optional `REGISTRY_<HOST>_USER`)
//! become `auths` entries of the runtime client's `config.json`. Underscores
//! in the host part map to dots: `REGISTRY_GHCR_IO_TOKEN` names `ghcr.io`.
//!
//! A `GCLOUD_KEY` service-account key is activated with `gcloud`, and
//! `GCLOUD_REGISTRY` is then registered as a credential helper in the same
//! client config.

use std::collections::BTreeMap;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::process::{run_checked, CommandRunner, Invocation};
use crate::trusted::ExternalSecrets;
use crate::validate;

const STEP: &str = "registry-auth";
const DEFAULT_USER: &str = "token";
const GCLOUD_KEY: [&str; 2] = ["GCLOUD_KEY", "gcloud-key"];
const GCLOUD_REGISTRY: [&str; 2] = ["GCLOUD_REGISTRY", "gcloud-registry"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct RegistryAuth {
    auth: String,
}

/// Client configuration file; keys other than `auths` are preserved.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientConfig {
    #[serde(default)]
    auths: BTreeMap<String, RegistryAuth>,
    #[serde(flatten)]
    other: BTreeMap<String, serde_json::Value>,
}

/// Registry host and encoded `user:token` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub host: String,
    pub user: String,
    encoded: String,
}

/// Collect credentials from `secrets`, skipping malformed hosts.
pub fn registry_credentials(
    secrets: &ExternalSecrets,
    diag: &Diagnostics,
) -> Vec<RegistryCredential> {
    let mut found = Vec::new();
    for key in secrets.secrets.keys() {
        let Some(host_part) = key
            .strip_prefix("REGISTRY_")
            .and_then(|k| k.strip_suffix("_TOKEN"))
        else {
            continue;
        };
        let Some(token) = secrets.secret(key) else {
            continue;
        };
        let host = host_part.replace('_', ".").to_lowercase();
        if !validate::is_registry_host(&host) {
            diag.warn(STEP, format!("ignoring {key}: invalid registry host {host:?}"));
            continue;
        }
        let user = secrets
            .secret(&format!("REGISTRY_{host_part}_USER"))
            .unwrap_or(DEFAULT_USER)
            .to_owned();
        found.push(RegistryCredential {
            encoded: STANDARD.encode(format!("{user}:{token}")),
            host,
            user,
        });
    }
    found
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), NodeError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| NodeError::io_at("writing", path, e))?;
    file.write_all(bytes)
        .map_err(|e| NodeError::io_at("writing", path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| NodeError::io_at("chmod", path, e))
}

/// Writes registry credentials into the runtime client's config directory.
pub struct CredentialWriter {
    dir: PathBuf,
    gcloud: String,
    gcloud_key: PathBuf,
    gcloud_config: PathBuf,
    auth_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    diag: Diagnostics,
}

impl CredentialWriter {
    pub fn new(config: &NodeConfig, runner: Arc<dyn CommandRunner>, diag: Diagnostics) -> Self {
        Self {
            dir: config.paths.docker_config_dir(),
            gcloud: config.workloads.gcloud_binary.clone(),
            gcloud_key: config.paths.gcloud_key(),
            gcloud_config: config.paths.gcloud_config_dir(),
            auth_timeout: config.workloads.auth_timeout(),
            runner,
            diag,
        }
    }

    /// Path of the client `config.json`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    fn load_existing(path: &Path) -> Result<ClientConfig, NodeError> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(ClientConfig::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| NodeError::Parse {
                what: "registry client config",
                detail: e.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ClientConfig::default()),
            Err(e) => Err(NodeError::io_at("reading", path, e)),
        }
    }

    fn gcloud_auth(&self, args: &[&str]) -> Result<(), NodeError> {
        let inv = Invocation::new(self.gcloud.clone(), self.auth_timeout)
            .arg("auth")
            .args(args.iter().copied())
            .env("CLOUDSDK_CONFIG", self.gcloud_config.to_string_lossy())
            .env("DOCKER_CONFIG", self.dir.to_string_lossy());
        run_checked(self.runner.as_ref(), &inv).map(|_| ())
    }

    /// Activate the service-account key and, when a valid registry is
    /// named, register `gcloud` as its credential helper. Returns the
    /// registry on success.
    fn apply_gcloud(
        &self,
        key: &str,
        registry: Option<&str>,
    ) -> Result<Option<String>, NodeError> {
        if let Some(parent) = self.gcloud_key.parent() {
            fs::create_dir_all(parent).map_err(|e| NodeError::io_at("creating", parent, e))?;
        }
        write_private(&self.gcloud_key, key.as_bytes())?;
        let key_file = self.gcloud_key.to_string_lossy();
        self.gcloud_auth(&["activate-service-account", "--quiet", "--key-file", &key_file])?;
        self.diag.info(STEP, "gcloud service account activated");

        let Some(registry) = registry else {
            return Ok(None);
        };
        if !validate::is_registry_host(registry) {
            self.diag
                .warn(STEP, format!("ignoring invalid gcloud registry {registry:?}"));
            return Ok(None);
        }
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)
            .map_err(|e| NodeError::io_at("creating", &self.dir, e))?;
        self.gcloud_auth(&["configure-docker", "--quiet", registry])?;
        self.diag.info(STEP, format!("auth configured: {registry} (gcloud)"));
        Ok(Some(registry.to_owned()))
    }

    /// Configure gcloud auth when a key is present, then merge credentials
    /// from `secrets` into `config.json`. Returns the configured hosts;
    /// `config.json` is not written when there are no token credentials.
    /// A failed gcloud call is logged and does not fail the step.
    pub fn apply(&self, secrets: &ExternalSecrets) -> Result<Vec<String>, NodeError> {
        let mut hosts = Vec::new();
        if let Some(key) = secrets.first_secret(&GCLOUD_KEY) {
            match self.apply_gcloud(key, secrets.first_secret(&GCLOUD_REGISTRY)) {
                Ok(registry) => hosts.extend(registry),
                Err(e) => self.diag.warn(STEP, format!("gcloud auth failed: {e}")),
            }
        }

        let creds = registry_credentials(secrets, &self.diag);
        if creds.is_empty() {
            if hosts.is_empty() {
                self.diag.info(STEP, "no registry credentials configured");
            }
            return Ok(hosts);
        }

        let path = self.config_path();
        let mut client = match Self::load_existing(&path) {
            Ok(c) => c,
            Err(e) => {
                self.diag
                    .warn(STEP, format!("replacing unreadable client config: {e}"));
                ClientConfig::default()
            }
        };
        for cred in creds {
            self.diag.info(STEP, format!("auth configured: {}", cred.host));
            client.auths.insert(
                cred.host.clone(),
                RegistryAuth {
                    auth: cred.encoded,
                },
            );
            hosts.push(cred.host);
        }

        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)
            .map_err(|e| NodeError::io_at("creating", &self.dir, e))?;
        let text = serde_json::to_string_pretty(&client).map_err(|e| NodeError::Parse {
            what: "registry client config",
            detail: e.to_string(),
        })?;
        write_private(&path, text.as_bytes())?;
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use crate::process::CommandOutput;
    use tempfile::TempDir;

    fn secrets(pairs: &[(&str, &str)]) -> ExternalSecrets {
        let mut s = ExternalSecrets::default();
        for (k, v) in pairs {
            s.secrets.insert((*k).to_owned(), Some((*v).to_owned()));
        }
        s
    }

    fn writer(dir: &TempDir) -> CredentialWriter {
        writer_with(dir, Arc::new(RecordingRunner::new()), Diagnostics::transcript(false).0)
    }

    fn writer_with(
        dir: &TempDir,
        runner: Arc<RecordingRunner>,
        diag: Diagnostics,
    ) -> CredentialWriter {
        let mut config = NodeConfig::default();
        config.paths.working_root = dir.path().to_path_buf();
        CredentialWriter::new(&config, runner, diag)
    }

    #[test]
    fn host_is_derived_from_key() {
        let s = secrets(&[
            ("REGISTRY_GHCR_IO_TOKEN", "t0k"),
            ("REGISTRY_GHCR_IO_USER", "bot"),
            ("REGISTRY_QUAY_IO_TOKEN", "q"),
            ("UNRELATED", "x"),
        ]);
        let creds = registry_credentials(&s, &Diagnostics::transcript(false).0);
        let hosts: Vec<(&str, &str)> = creds
            .iter()
            .map(|c| (c.host.as_str(), c.user.as_str()))
            .collect();
        assert_eq!(hosts, vec![("ghcr.io", "bot"), ("quay.io", "token")]);
        assert_eq!(creds[0].encoded, STANDARD.encode("bot:t0k"));
    }

    #[test]
    fn invalid_host_and_empty_token_are_skipped() {
        let s = secrets(&[
            ("REGISTRY__EVIL_TOKEN", "x"),
            ("REGISTRY_GHCR_IO_TOKEN", ""),
            ("REGISTRY_A$B_TOKEN", "x"),
        ]);
        assert!(registry_credentials(&s, &Diagnostics::transcript(false).0).is_empty());
    }

    #[test]
    fn writes_private_config_and_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        fs::create_dir_all(dir.path().join("docker-config")).unwrap();
        fs::write(
            w.config_path(),
            r#"{"auths":{"old.io":{"auth":"b2xk"}},"credsStore":"none"}"#,
        )
        .unwrap();

        let hosts = w.apply(&secrets(&[("REGISTRY_GHCR_IO_TOKEN", "abc")])).unwrap();
        assert_eq!(hosts, vec!["ghcr.io"]);

        let mode = fs::metadata(w.config_path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let doc: serde_json::Value =
            serde_json::from_slice(&fs::read(w.config_path()).unwrap()).unwrap();
        assert_eq!(doc["auths"]["ghcr.io"]["auth"], STANDARD.encode("token:abc"));
        assert_eq!(doc["auths"]["old.io"]["auth"], "b2xk");
        assert_eq!(doc["credsStore"], "none");
    }

    #[test]
    fn nothing_written_without_credentials() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        assert!(w.apply(&ExternalSecrets::default()).unwrap().is_empty());
        assert!(!w.config_path().exists());
    }

    #[test]
    fn gcloud_key_activates_account_and_registry() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let w = writer_with(&dir, runner.clone(), Diagnostics::transcript(false).0);
        let s = secrets(&[
            ("gcloud-key", "{\"type\":\"service_account\"}"),
            ("GCLOUD_REGISTRY", "us-docker.pkg.dev"),
        ]);

        assert_eq!(w.apply(&s).unwrap(), vec!["us-docker.pkg.dev"]);

        let key = dir.path().join("gcloud_key.json");
        assert_eq!(fs::read_to_string(&key).unwrap(), "{\"type\":\"service_account\"}");
        assert_eq!(fs::metadata(&key).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(
            runner.lines(),
            vec![
                format!(
                    "gcloud auth activate-service-account --quiet --key-file {}",
                    key.display()
                ),
                "gcloud auth configure-docker --quiet us-docker.pkg.dev".to_owned(),
            ]
        );
        let calls = runner.calls();
        let sdk = dir.path().join("gcloud").to_string_lossy().into_owned();
        assert!(calls
            .iter()
            .all(|c| c.env.contains(&("CLOUDSDK_CONFIG".to_owned(), sdk.clone()))));
        assert_eq!(calls[0].timeout, Duration::from_secs(60));
    }

    #[test]
    fn invalid_gcloud_registry_is_not_configured() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let w = writer_with(&dir, runner.clone(), Diagnostics::transcript(false).0);
        let s = secrets(&[("GCLOUD_KEY", "k"), ("GCLOUD_REGISTRY", "--flag")]);
        assert!(w.apply(&s).unwrap().is_empty());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn failed_gcloud_activation_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("gcloud", CommandOutput::failed(1, "invalid key"));
        let (diag, transcript) = Diagnostics::transcript(false);
        let w = writer_with(&dir, runner.clone(), diag);
        let s = secrets(&[
            ("GCLOUD_KEY", "k"),
            ("GCLOUD_REGISTRY", "us-docker.pkg.dev"),
            ("REGISTRY_GHCR_IO_TOKEN", "abc"),
        ]);

        assert_eq!(w.apply(&s).unwrap(), vec!["ghcr.io"]);
        assert_eq!(runner.calls().len(), 1);
        assert!(transcript.contains(STEP, "gcloud auth failed"));
        assert!(w.config_path().exists());
    }
}
