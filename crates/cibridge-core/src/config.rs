//! Environment configuration for the bridge.
//!
//! | Variable | Default |
//! |---|---|
//! | `CIBRIDGE_STORE_PATH` | `~/.cibridge/triggered_jobs.json` |
//! | `CIBRIDGE_TRIGGER_TIMEOUT_SECS` | 30 |
//! | `CIBRIDGE_POLL_INTERVAL_MS` | 1000 |
//! | `CIBRIDGE_MAX_POLL_INTERVAL_MS` | 5000 |
//! | `CIBRIDGE_LOG_CACHE_TTL_MS` | 2000 |
//! | `CIBRIDGE_SYNC_CONCURRENCY` | 4 |
//!
//! Connection settings for the CI server live in
//! [`cibridge_gateway::JenkinsConfig`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{BridgeError, Result};
use crate::ledger::SyncOptions;
use crate::log_pager::{DEFAULT_LOG_CACHE_CAPACITY, DEFAULT_LOG_CACHE_TTL};
use crate::resolver::ResolveOptions;

const STORE_DIR: &str = ".cibridge";
const STORE_FILE: &str = "triggered_jobs.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub store_path: PathBuf,
    pub resolve: ResolveOptions,
    pub sync: SyncOptions,
    pub log_cache_ttl: Duration,
    pub log_cache_capacity: usize,
}

impl BridgeConfig {
    /// Defaults with the ledger stored at `store_path`.
    pub fn with_store_path(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            resolve: ResolveOptions::default(),
            sync: SyncOptions::default(),
            log_cache_ttl: DEFAULT_LOG_CACHE_TTL,
            log_cache_capacity: DEFAULT_LOG_CACHE_CAPACITY,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_path = match get("CIBRIDGE_STORE_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_store_path()?,
        };
        let mut config = Self::with_store_path(store_path);

        if let Some(secs) = parse::<u64>(&get, "CIBRIDGE_TRIGGER_TIMEOUT_SECS")? {
            config.resolve.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&get, "CIBRIDGE_POLL_INTERVAL_MS")? {
            config.resolve.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "CIBRIDGE_MAX_POLL_INTERVAL_MS")? {
            config.resolve.max_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "CIBRIDGE_LOG_CACHE_TTL_MS")? {
            config.log_cache_ttl = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&get, "CIBRIDGE_SYNC_CONCURRENCY")? {
            config.sync.concurrency = n.max(1);
        }

        config
            .resolve
            .validate()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        Ok(config)
    }
}

/// `~/.cibridge/triggered_jobs.json`
pub fn default_store_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(STORE_DIR).join(STORE_FILE))
        .ok_or_else(|| {
            BridgeError::Config(
                "cannot locate a home directory; set CIBRIDGE_STORE_PATH".to_string(),
            )
        })
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| BridgeError::Config(format!("{key} must be a number, got '{raw}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            BridgeConfig::from_lookup(lookup_from(&[("CIBRIDGE_STORE_PATH", "/tmp/l.json")]))
                .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/tmp/l.json"));
        assert_eq!(config.resolve, ResolveOptions::default());
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.log_cache_ttl, Duration::from_millis(2000));
        assert_eq!(config.log_cache_capacity, 16);
    }

    #[test]
    fn test_overrides() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("CIBRIDGE_STORE_PATH", "ledger.json"),
            ("CIBRIDGE_TRIGGER_TIMEOUT_SECS", "90"),
            ("CIBRIDGE_POLL_INTERVAL_MS", "250"),
            ("CIBRIDGE_MAX_POLL_INTERVAL_MS", "8000"),
            ("CIBRIDGE_LOG_CACHE_TTL_MS", " 500 "),
            ("CIBRIDGE_SYNC_CONCURRENCY", "0"),
        ]))
        .unwrap();
        assert_eq!(config.resolve.timeout, Duration::from_secs(90));
        assert_eq!(config.resolve.poll_interval, Duration::from_millis(250));
        assert_eq!(config.resolve.max_poll_interval, Duration::from_millis(8000));
        assert_eq!(config.log_cache_ttl, Duration::from_millis(500));
        assert_eq!(config.sync.concurrency, 1);
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let err = BridgeConfig::from_lookup(lookup_from(&[
            ("CIBRIDGE_STORE_PATH", "ledger.json"),
            ("CIBRIDGE_POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("CIBRIDGE_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_poll_interval_is_config_error() {
        let err = BridgeConfig::from_lookup(lookup_from(&[
            ("CIBRIDGE_STORE_PATH", "ledger.json"),
            ("CIBRIDGE_POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_oversized_timeout_is_config_error() {
        let huge = u64::MAX.to_string();
        let err = BridgeConfig::from_lookup(lookup_from(&[
            ("CIBRIDGE_STORE_PATH", "ledger.json"),
            ("CIBRIDGE_TRIGGER_TIMEOUT_SECS", huge.as_str()),
        ]))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("timeout"));
    }
}
