// CLASSIFICATION: COMMUNITY
// Filename: measured_boot.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use cvm_boot::diag::Diagnostics;
use cvm_boot::fakes::RecordingRunner;
use cvm_boot::hash::digest;
use cvm_boot::measured::MeasuredConfigLoader;
use cvm_boot::verity::IntegrityMounter;
use cvm_boot::NodeConfig;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn node(root: &Path, config_bytes: &[u8], reference: &str) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.paths.working_root = root.join("ramdisk");
    config.paths.config_device = root.join("sdb");
    config.paths.secrets_device = root.join("sdc");
    config.paths.cmdline = root.join("cmdline");
    fs::write(&config.paths.config_device, config_bytes).unwrap();
    fs::write(
        &config.paths.cmdline,
        format!("BOOT_IMAGE=/vmlinuz ro tinfoil-config-hash={reference} quiet\n"),
    )
    .unwrap();
    config
}

#[test]
fn padded_json_config_with_no_models() {
    let dir = tempdir().unwrap();
    let text = br#"{"models":[]}"#;
    let mut padded = text.to_vec();
    padded.resize(4096, 0);
    let config = node(dir.path(), &padded, &digest(text));

    let loader = MeasuredConfigLoader::new(&config, Diagnostics::transcript(false).0);
    let trusted = loader.load_verified().unwrap();
    assert!(trusted.models().is_empty());
    assert_eq!(trusted.digest(), digest(text));
    assert_eq!(fs::read(config.paths.staged_config()).unwrap(), text);
}

#[test]
fn digest_mismatch_stages_nothing() {
    let dir = tempdir().unwrap();
    let config = node(dir.path(), b"models: []\n", &"0".repeat(64));
    let (diag, transcript) = Diagnostics::transcript(false);

    let err = MeasuredConfigLoader::new(&config, diag).load_verified().unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains(&"0".repeat(64)));
    assert!(!config.paths.staged_config().exists());
    assert!(transcript.contains("config", "integrity check failed"));
}

#[test]
fn blank_config_disk_fails_the_digest_comparison() {
    let reference = digest(b"models: []\n");
    for contents in [vec![0u8; 4096], Vec::new()] {
        let dir = tempdir().unwrap();
        let config = node(dir.path(), &contents, &reference);
        let err = MeasuredConfigLoader::new(&config, Diagnostics::transcript(false).0)
            .load_verified()
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains(&digest(b"")));
        assert!(!config.paths.staged_config().exists());
        assert!(!config.paths.staged_secrets().exists());
    }
}

#[test]
fn stray_equals_token_does_not_hide_the_reference() {
    let dir = tempdir().unwrap();
    let text = b"models: []\n";
    let config = node(dir.path(), text, &digest(text));
    fs::write(
        &config.paths.cmdline,
        format!("console=ttyS0 = tinfoil-config-hash={} quiet\n", digest(text)),
    )
    .unwrap();
    let loader = MeasuredConfigLoader::new(&config, Diagnostics::transcript(false).0);
    assert_eq!(loader.reference_digest().unwrap(), digest(text));
    assert!(loader.load_verified().is_ok());
}

#[test]
fn one_flipped_bit_fails_verification() {
    let dir = tempdir().unwrap();
    let original = b"shim-version: v1.0.0@sha256:abc\n".to_vec();
    let mut flipped = original.clone();
    flipped[3] ^= 0x01;
    let config = node(dir.path(), &flipped, &digest(&original));
    let err = MeasuredConfigLoader::new(&config, Diagnostics::transcript(false).0)
        .load_verified()
        .unwrap_err();
    assert_eq!(err.kind(), "integrity");
}

#[test]
fn malformed_pack_identifier_touches_no_device() {
    let runner = Arc::new(RecordingRunner::new());
    let mounter = IntegrityMounter::new(
        &NodeConfig::default(),
        runner.clone(),
        Diagnostics::transcript(false).0,
    );
    let err = mounter.mount("abc_0_uuid").unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(runner.calls().is_empty());
}

#[test]
fn digest_is_deterministic() {
    assert_eq!(digest(b"tinfoil"), digest(b"tinfoil"));
    assert_ne!(digest(b"tinfoil"), digest(b"tinfoiL"));
    assert_eq!(
        digest(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
