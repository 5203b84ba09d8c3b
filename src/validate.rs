// CLASSIFICATION: COMMUNITY
// Filename: validate.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Strict format checks for values that originate from the config disk.
//!
//! Everything here runs before a value is interpolated into a device path,
//! a subprocess argument or a URL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::NodeError;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("static pattern"));
    };
}

pattern!(HEX_DIGEST, r"^[a-f0-9]{64}$");
pattern!(UUID, r"^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$");
pattern!(OFFSET, r"^[0-9]+$");
pattern!(VERSION, r"^v[0-9]+\.[0-9]+\.[0-9]+$");
pattern!(REGISTRY, r"^[a-z0-9]([a-z0-9.-]*[a-z0-9])?$");
pattern!(CONTAINER_NAME, r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$");

/// 64 lowercase hex characters.
#[must_use]
pub fn is_hex_digest(value: &str) -> bool {
    HEX_DIGEST.is_match(value)
}

/// Canonical lowercase 8-4-4-4-12 UUID.
#[must_use]
pub fn is_uuid(value: &str) -> bool {
    UUID.is_match(value)
}

/// Non-negative decimal integer.
#[must_use]
pub fn is_offset(value: &str) -> bool {
    OFFSET.is_match(value)
}

/// `vMAJOR.MINOR.PATCH` release tag.
#[must_use]
pub fn is_version(value: &str) -> bool {
    VERSION.is_match(value)
}

/// Registry hostname.
#[must_use]
pub fn is_registry_host(value: &str) -> bool {
    REGISTRY.is_match(value)
}

/// Container name accepted by the runtime.
#[must_use]
pub fn is_container_name(value: &str) -> bool {
    CONTAINER_NAME.is_match(value)
}

/// Require a hex digest, naming the field in the error.
pub fn hex_digest(what: &'static str, value: &str) -> Result<(), NodeError> {
    if is_hex_digest(value) {
        Ok(())
    } else {
        Err(NodeError::invalid(what, value))
    }
}
