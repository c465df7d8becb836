// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default storage directory.
pub const DEFAULT_STORE_DIR: &str = ".herald";
/// Default capacity of each namespace.
pub const DEFAULT_MAX_ENTRIES: usize = 10;
/// Default sequencing service address.
pub const DEFAULT_SEQUENCE_ADDR: &str = "127.0.0.1:7777";
/// Default basecalling service address.
pub const DEFAULT_BASECALL_ADDR: &str = "127.0.0.1:7778";

/// Herald configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the run and sample stores
    pub store_dir: PathBuf,
    /// Maximum number of records per namespace
    pub max_entries: usize,
    /// Upper bound on a single service request
    pub request_timeout: Duration,
    /// Upper bound on a connectivity probe
    pub probe_timeout: Duration,
    /// Address of the sequencing service
    pub sequence_addr: String,
    /// Address of the basecalling service
    pub basecall_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            max_entries: DEFAULT_MAX_ENTRIES,
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(1000),
            sequence_addr: DEFAULT_SEQUENCE_ADDR.to_string(),
            basecall_addr: DEFAULT_BASECALL_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `HERALD_STORE_DIR`: storage directory (default: `.herald`)
    /// - `HERALD_MAX_ENTRIES`: records per namespace (default: 10)
    /// - `HERALD_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `HERALD_PROBE_TIMEOUT_MS`: connectivity probe timeout (default: 1000)
    /// - `HERALD_SEQUENCE_ADDR`: sequencing service (default: `127.0.0.1:7777`)
    /// - `HERALD_BASECALL_ADDR`: basecalling service (default: `127.0.0.1:7778`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store_dir = std::env::var("HERALD_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.store_dir);
        if store_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "HERALD_STORE_DIR",
                "must not be empty",
            ));
        }

        let max_entries: usize = std::env::var("HERALD_MAX_ENTRIES")
            .unwrap_or_else(|_| DEFAULT_MAX_ENTRIES.to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "HERALD_MAX_ENTRIES",
                "must be a positive integer",
            ))?;

        let request_timeout_secs: u64 = std::env::var("HERALD_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "HERALD_REQUEST_TIMEOUT_SECS",
                "must be a positive number of seconds",
            ))?;

        let probe_timeout_ms: u64 = std::env::var("HERALD_PROBE_TIMEOUT_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "HERALD_PROBE_TIMEOUT_MS",
                "must be a positive number of milliseconds",
            ))?;

        let sequence_addr = address_var("HERALD_SEQUENCE_ADDR", defaults.sequence_addr)?;
        let basecall_addr = address_var("HERALD_BASECALL_ADDR", defaults.basecall_addr)?;

        Ok(Self {
            store_dir,
            max_entries,
            request_timeout: Duration::from_secs(request_timeout_secs),
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            sequence_addr,
            basecall_addr,
        })
    }
}

/// Read a `host:port` variable, falling back to `default`.
fn address_var(key: &'static str, default: String) -> Result<String, ConfigError> {
    let Ok(value) = std::env::var(key) else {
        return Ok(default);
    };
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(value),
        _ => Err(ConfigError::Invalid(key, "must be a host:port address")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 6] = [
        "HERALD_STORE_DIR",
        "HERALD_MAX_ENTRIES",
        "HERALD_REQUEST_TIMEOUT_SECS",
        "HERALD_PROBE_TIMEOUT_MS",
        "HERALD_SEQUENCE_ADDR",
        "HERALD_BASECALL_ADDR",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Start from a clean slate with every herald variable unset.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let config = Config::from_env().unwrap();

        assert_eq!(config.store_dir, PathBuf::from(".herald"));
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_millis(1000));
        assert_eq!(config.sequence_addr, "127.0.0.1:7777");
        assert_eq!(config.basecall_addr, "127.0.0.1:7778");
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("HERALD_STORE_DIR", "/var/lib/herald");
        guard.set("HERALD_MAX_ENTRIES", "250");
        guard.set("HERALD_REQUEST_TIMEOUT_SECS", "5");
        guard.set("HERALD_PROBE_TIMEOUT_MS", "200");
        guard.set("HERALD_SEQUENCE_ADDR", "minion.lab:9000");
        guard.set("HERALD_BASECALL_ADDR", "10.0.0.4:9001");

        let config = Config::from_env().unwrap();

        assert_eq!(config.store_dir, PathBuf::from("/var/lib/herald"));
        assert_eq!(config.max_entries, 250);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.probe_timeout, Duration::from_millis(200));
        assert_eq!(config.sequence_addr, "minion.lab:9000");
        assert_eq!(config.basecall_addr, "10.0.0.4:9001");
    }

    #[test]
    fn test_config_invalid_max_entries() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        for bad in ["abc", "0", "-5"] {
            guard.set("HERALD_MAX_ENTRIES", bad);
            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid("HERALD_MAX_ENTRIES", _)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_invalid_timeouts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("HERALD_REQUEST_TIMEOUT_SECS", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("HERALD_REQUEST_TIMEOUT_SECS", _)
        ));

        guard.set("HERALD_REQUEST_TIMEOUT_SECS", "10");
        guard.set("HERALD_PROBE_TIMEOUT_MS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("HERALD_PROBE_TIMEOUT_MS", _)
        ));
    }

    #[test]
    fn test_config_invalid_address() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("HERALD_SEQUENCE_ADDR", "localhost");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("HERALD_SEQUENCE_ADDR", _)
        ));

        guard.set("HERALD_SEQUENCE_ADDR", "localhost:7777");
        guard.set("HERALD_BASECALL_ADDR", "localhost:99999");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("HERALD_BASECALL_ADDR", _)
        ));
    }

    #[test]
    fn test_config_empty_store_dir() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("HERALD_STORE_DIR", "");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("HERALD_STORE_DIR", _)));
    }

    #[test]
    fn test_config_error_display() {
        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
