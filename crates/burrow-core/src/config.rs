//! Client configuration.
//!
//! Defaults suit an interactive session; each field can be overridden from the
//! environment:
//!
//! | variable                 | field                 |
//! |--------------------------|-----------------------|
//! | `BURROW_VERBOSE_MONITOR` | `verbose_monitor`     |
//! | `BURROW_SYMBOL_MAP`      | `symbol_map_path`     |
//! | `BURROW_MAX_STRING`      | `max_string_length`   |
//! | `BURROW_PAC_MASK`        | `pointer_auth_mask`   |
//!
//! Unparseable values are ignored with a warning.

use std::env;
use std::path::PathBuf;

use tracing::warn;

/// Mask keeping the address bits of a signed arm64e code pointer.
pub const DEFAULT_POINTER_AUTH_MASK: u64 = 0x0000_007f_ffff_ffff;

/// Upper bound for C-string reads.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 4096;

/// Tunables of a [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig
{
    /// When bulk-monitoring selector-style names, also print every selector
    /// argument with `po`.
    pub verbose_monitor: bool,
    /// Default location of the persisted symbol map.
    pub symbol_map_path: PathBuf,
    /// Longest C string `peek_str` will read before giving up.
    pub max_string_length: usize,
    /// Bits kept when stripping pointer authentication from code pointers.
    pub pointer_auth_mask: u64,
}

impl Default for ClientConfig
{
    fn default() -> Self
    {
        Self {
            verbose_monitor: false,
            symbol_map_path: env::temp_dir().join("burrow-symbols.json"),
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            pointer_auth_mask: DEFAULT_POINTER_AUTH_MASK,
        }
    }
}

impl ClientConfig
{
    /// Defaults overridden by `BURROW_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("BURROW_VERBOSE_MONITOR") {
            match parse_flag(&raw) {
                Some(flag) => config.verbose_monitor = flag,
                None => warn!("Ignoring BURROW_VERBOSE_MONITOR={raw:?}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup("BURROW_SYMBOL_MAP") {
            if raw.trim().is_empty() {
                warn!("Ignoring empty BURROW_SYMBOL_MAP");
            } else {
                config.symbol_map_path = PathBuf::from(raw);
            }
        }
        if let Some(raw) = lookup("BURROW_MAX_STRING") {
            match raw.trim().parse::<usize>() {
                Ok(length) if length > 0 => config.max_string_length = length,
                _ => warn!("Ignoring BURROW_MAX_STRING={raw:?}: expected a positive integer"),
            }
        }
        if let Some(raw) = lookup("BURROW_PAC_MASK") {
            match parse_u64(&raw) {
                Some(mask) if mask != 0 => config.pointer_auth_mask = mask,
                _ => warn!("Ignoring BURROW_PAC_MASK={raw:?}: expected a non-zero integer"),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool>
{
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u64(raw: &str) -> Option<u64>
{
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ClientConfig
    {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ClientConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn test_defaults_without_environment()
    {
        assert_eq!(config_from(&[]), ClientConfig::default());
    }

    #[test]
    fn test_overrides_are_applied()
    {
        let config = config_from(&[
            ("BURROW_VERBOSE_MONITOR", "yes"),
            ("BURROW_SYMBOL_MAP", "/tmp/app.symbols.json"),
            ("BURROW_MAX_STRING", "128"),
            ("BURROW_PAC_MASK", "0x0000_000f_ffff_ffff"),
        ]);
        assert!(config.verbose_monitor);
        assert_eq!(config.symbol_map_path, PathBuf::from("/tmp/app.symbols.json"));
        assert_eq!(config.max_string_length, 128);
        assert_eq!(config.pointer_auth_mask, 0x0000_000f_ffff_ffff);
    }

    #[test]
    fn test_invalid_values_keep_defaults()
    {
        let config = config_from(&[
            ("BURROW_VERBOSE_MONITOR", "maybe"),
            ("BURROW_MAX_STRING", "0"),
            ("BURROW_PAC_MASK", "zzz"),
        ]);
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_parse_u64_accepts_decimal_and_hex()
    {
        assert_eq!(parse_u64("4096"), Some(4096));
        assert_eq!(parse_u64("0x1000"), Some(0x1000));
        assert_eq!(parse_u64("0X_ff"), Some(0xff));
        assert_eq!(parse_u64("nope"), None);
    }
}
