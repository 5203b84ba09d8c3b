// CLASSIFICATION: COMMUNITY
// Filename: shim.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Auxiliary shim installation.
//!
//! The release identifier `vX.Y.Z@sha256:<digest>` comes from the measured
//! config; the downloaded binary must hash to that digest before it is
//! started.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{NodeConfig, ShimConfig};
use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::hash::{digest_file, verify_digest};
use crate::trusted::TrustedConfig;
use crate::units::ServiceManager;
use crate::validate;

const STEP: &str = "shim";

/// Parsed shim release identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimRelease {
    pub version: String,
    pub digest: String,
}

impl ShimRelease {
    /// Parse `version@sha256:digest`, validating both halves.
    pub fn parse(value: &str) -> Result<Self, NodeError> {
        if value.is_empty() {
            return Err(NodeError::invalid("shim-version", "<missing>"));
        }
        let (version, digest) = value
            .split_once("@sha256:")
            .ok_or_else(|| NodeError::invalid("shim-version", value))?;
        if !validate::is_version(version) {
            return Err(NodeError::invalid("shim version", version));
        }
        validate::hex_digest("shim digest", digest)?;
        Ok(Self {
            version: version.to_owned(),
            digest: digest.to_owned(),
        })
    }
}

/// Expand `{version}` in `template`; only `https://` URLs are accepted.
pub fn release_url(template: &str, version: &str) -> Result<String, NodeError> {
    let url = template.replace("{version}", version);
    if !url.starts_with("https://") {
        return Err(NodeError::invalid("shim download url", url));
    }
    Ok(url)
}

/// Retrieves a URL into a local file.
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, NodeError>;
}

/// `ureq` backed fetcher.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Fetcher for UreqFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, NodeError> {
        let fetch_err = |detail: String| NodeError::Fetch {
            url: url.to_owned(),
            detail,
        };
        let resp = self.agent.get(url).call().map_err(|e| fetch_err(e.to_string()))?;
        if resp.status() != 200 {
            return Err(fetch_err(format!("HTTP {}", resp.status())));
        }
        let mut out = File::create(dest).map_err(|e| NodeError::io_at("creating", dest, e))?;
        io::copy(&mut resp.into_reader(), &mut out).map_err(|e| fetch_err(e.to_string()))
    }
}

/// Downloads, verifies and starts the shim.
pub struct ShimInstaller {
    fetcher: Arc<dyn Fetcher>,
    services: Arc<dyn ServiceManager>,
    working_root: PathBuf,
    settings: ShimConfig,
    diag: Diagnostics,
}

impl ShimInstaller {
    pub fn new(
        config: &NodeConfig,
        fetcher: Arc<dyn Fetcher>,
        services: Arc<dyn ServiceManager>,
        diag: Diagnostics,
    ) -> Self {
        Self {
            fetcher,
            services,
            working_root: config.paths.working_root.clone(),
            settings: config.shim.clone(),
            diag,
        }
    }

    /// Install the release named by `config` and start its unit.
    pub fn install(&self, config: &TrustedConfig) -> Result<PathBuf, NodeError> {
        let release = ShimRelease::parse(config.shim_version())?;
        let url = release_url(&self.settings.download_url, &release.version)?;
        let binary = self.working_root.join(&self.settings.binary_name);

        self.diag
            .info(STEP, format!("downloading shim {}", release.version));
        let bytes = self.fetcher.fetch(&url, &binary)?;
        self.diag.debug(STEP, format!("fetched {bytes} bytes from {url}"));

        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .map_err(|e| NodeError::io_at("chmod", &binary, e))?;

        let actual = digest_file(&binary).map_err(|e| NodeError::io_at("hashing", &binary, e))?;
        if let Err(e) = verify_digest("shim binary", &release.digest, &actual) {
            self.diag.error(STEP, &e);
            let _ = fs::remove_file(&binary);
            return Err(e);
        }
        self.diag.info(STEP, format!("shim hash verified: {actual}"));

        let settings_path = self.working_root.join(&self.settings.config_name);
        let text = if config.shim().is_null() {
            "{}\n".to_owned()
        } else {
            serde_yaml::to_string(config.shim()).map_err(|e| NodeError::Parse {
                what: "shim settings",
                detail: e.to_string(),
            })?
        };
        fs::write(&settings_path, text)
            .map_err(|e| NodeError::io_at("writing", &settings_path, e))?;

        self.diag
            .info(STEP, format!("starting {}", self.settings.unit));
        self.services.start(&self.settings.unit)?;
        Ok(binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeServices, StaticFetcher};
    use crate::hash::{digest, verify_bytes};
    use tempfile::TempDir;

    fn trusted(version: &str) -> TrustedConfig {
        let text = format!("shim-version: \"{version}\"\nshim:\n  listen-port: 443\n");
        let bytes = text.into_bytes();
        let v = verify_bytes("config", &digest(&bytes), bytes).unwrap();
        TrustedConfig::from_verified(&v).unwrap()
    }

    fn installer(
        dir: &TempDir,
        body: &[u8],
    ) -> (ShimInstaller, Arc<StaticFetcher>, Arc<FakeServices>) {
        let mut config = NodeConfig::default();
        config.paths.working_root = dir.path().to_path_buf();
        let fetcher = Arc::new(StaticFetcher::new(body.to_vec()));
        let services = Arc::new(FakeServices::default());
        let inst = ShimInstaller::new(
            &config,
            fetcher.clone(),
            services.clone(),
            Diagnostics::transcript(false).0,
        );
        (inst, fetcher, services)
    }

    #[test]
    fn parse_release_forms() {
        let d = "a".repeat(64);
        let r = ShimRelease::parse(&format!("v1.2.3@sha256:{d}")).unwrap();
        assert_eq!(r.version, "v1.2.3");
        assert!(ShimRelease::parse("v1.2.3").is_err());
        assert!(ShimRelease::parse(&format!("1.2.3@sha256:{d}")).is_err());
        assert!(ShimRelease::parse(&format!("v1.2.3/../x@sha256:{d}")).is_err());
        assert!(ShimRelease::parse("").is_err());
    }

    #[test]
    fn plain_http_template_is_rejected() {
        assert!(release_url("http://example.com/{version}/tfshim", "v1.0.0").is_err());
        assert_eq!(
            release_url("https://example.com/{version}/tfshim", "v1.0.0").unwrap(),
            "https://example.com/v1.0.0/tfshim"
        );
    }

    #[test]
    fn installs_verifies_and_starts() {
        let dir = TempDir::new().unwrap();
        let body = b"#!/bin/sh\nexit 0\n";
        let (inst, fetcher, services) = installer(&dir, body);
        let path = inst
            .install(&trusted(&format!("v0.4.1@sha256:{}", digest(body))))
            .unwrap();

        assert_eq!(
            fetcher.urls(),
            vec!["https://github.com/tinfoilsh/tfshim/releases/download/v0.4.1/tfshim"]
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        let settings = fs::read_to_string(dir.path().join("shim.yml")).unwrap();
        assert!(settings.contains("listen-port: 443"));
        assert_eq!(services.started(), vec!["tfshim.service"]);
    }

    #[test]
    fn digest_mismatch_does_not_start() {
        let dir = TempDir::new().unwrap();
        let (inst, _fetcher, services) = installer(&dir, b"tampered");
        let err = inst
            .install(&trusted(&format!("v0.4.1@sha256:{}", "0".repeat(64))))
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(services.started().is_empty());
        assert!(!dir.path().join("tfshim").exists());
    }

    #[test]
    fn invalid_version_makes_no_request() {
        let dir = TempDir::new().unwrap();
        let (inst, fetcher, _services) = installer(&dir, b"");
        assert!(inst.install(&trusted("latest")).is_err());
        assert!(fetcher.urls().is_empty());
    }
}
