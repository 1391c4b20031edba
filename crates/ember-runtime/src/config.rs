use std::time::Duration;

use ember_contracts::{
    ENV_ARENA_BYTES, ENV_DEBUG, ENV_PROFILE, ENV_SHUTDOWN_TIMEOUT_MS, ENV_WORKERS,
};

pub const DEFAULT_ARENA_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub arena_bytes: usize,
    pub profile: bool,
    pub debug: bool,
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            workers: default_workers(),
            arena_bytes: DEFAULT_ARENA_BYTES,
            profile: false,
            debug: false,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS as u64),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            workers: env_u32_nonzero(ENV_WORKERS, defaults.workers as u32) as usize,
            arena_bytes: env_u32_nonzero(ENV_ARENA_BYTES, defaults.arena_bytes as u32) as usize,
            profile: env_toggle(ENV_PROFILE),
            debug: env_bool(ENV_DEBUG, false),
            shutdown_timeout: Duration::from_millis(env_u32_nonzero(
                ENV_SHUTDOWN_TIMEOUT_MS,
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            ) as u64),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

pub fn env_u32_nonzero(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

/// Unset, `""` and `"0"` are off; any other value is on.
pub fn env_toggle(name: &str) -> bool {
    std::env::var(name)
        .map(|v| toggle_value(&v))
        .unwrap_or(false)
}

fn toggle_value(v: &str) -> bool {
    !v.is_empty() && v != "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_semantics() {
        assert!(!toggle_value(""));
        assert!(!toggle_value("0"));
        assert!(toggle_value("1"));
        assert!(toggle_value("false"));
        assert!(toggle_value("yes"));
    }

    #[test]
    fn bool_parsing_rejects_junk() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn missing_numeric_env_uses_default() {
        assert_eq!(env_u32_nonzero("EMBER_TEST_UNSET_VARIABLE_X", 17), 17);
    }

    #[test]
    fn defaults_have_at_least_one_worker() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.workers >= 1);
        assert!(!cfg.profile);
        assert_eq!(cfg.arena_bytes, DEFAULT_ARENA_BYTES);
    }
}
