// CLASSIFICATION: COMMUNITY
// Filename: cmdline.rs v0.1
// Date Modified: 2026-10-18
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Kernel command line parser
//
// Parses the key=value string the boot loader hands to the kernel
// (exposed at /proc/cmdline) so that measured values embedded at
// image build time can be read back during boot.
//
// Example cmdline:
//
//   console=ttyS0 tinfoil-config-hash=3a7b… ro quiet
//
// # Public API
// * [`BootArgs`] – read-only view of parsed arguments
// * [`parse_cmdline`] – convert raw string → [`BootArgs`]
// * [`read_cmdline`] – read and parse a cmdline file
// ─────────────────────────────────────────────────────────────

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;

use crate::error::NodeError;

/// Key/value map of boot parameters.
#[derive(Debug, Clone, Default)]
pub struct BootArgs {
    map: HashMap<String, String>,
}

impl BootArgs {
    /// Retrieve the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }
}

/// Parse a raw boot loader command line.
///
/// Splits on ASCII whitespace, then parses `key=value` pairs. A token without
/// `=` is a valueless flag with value `"1"`. Tokens with an empty key are
/// skipped. When a key repeats, the first occurrence wins, so a later token
/// cannot shadow a measured value.
///
/// # Examples
///
/// ```
/// use cvm_boot::cmdline::parse_cmdline;
///
/// let args = parse_cmdline("root=/dev/sda1 quiet");
/// assert_eq!(args.get("root"), Some("/dev/sda1"));
/// assert_eq!(args.get("quiet"), Some("1"));
/// ```
pub fn parse_cmdline(cmdline: &str) -> BootArgs {
    let mut map = HashMap::new();

    for token in cmdline.split_ascii_whitespace() {
        let (k, v) = match token.split_once('=') {
            Some((k, v)) => (k, v),
            None => (token, "1"),
        };
        if k.is_empty() {
            debug!("skipping kernel cmdline token {token:?}");
            continue;
        }
        map.entry(k.to_owned()).or_insert_with(|| v.to_owned());
    }

    BootArgs { map }
}

/// Read and parse the command line file at `path`.
pub fn read_cmdline(path: &Path) -> Result<BootArgs, NodeError> {
    let raw = fs::read_to_string(path).map_err(|e| NodeError::io_at("reading", path, e))?;
    Ok(parse_cmdline(&raw))
}

// ───────────────────────────── tests ─────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_values() {
        let args = parse_cmdline("root=/dev/sda rw\n");
        assert_eq!(args.get("root"), Some("/dev/sda"));
        assert_eq!(args.get("rw"), Some("1"));
    }

    #[test]
    fn keeps_equals_inside_values() {
        let args = parse_cmdline("opts=a=b");
        assert_eq!(args.get("opts"), Some("a=b"));
    }

    #[test]
    fn first_occurrence_wins() {
        let args = parse_cmdline("h=aaa h=bbb");
        assert_eq!(args.get("h"), Some("aaa"));
    }

    #[test]
    fn empty_key_tokens_are_skipped() {
        let hash = "ab".repeat(32);
        let args = parse_cmdline(&format!("console=ttyS0 = =novalue tinfoil-config-hash={hash}"));
        assert_eq!(args.get("console"), Some("ttyS0"));
        assert_eq!(args.get("tinfoil-config-hash"), Some(hash.as_str()));
        assert_eq!(args.get(""), None);
    }
}
