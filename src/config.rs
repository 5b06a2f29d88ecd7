//! Configuration Module
//!
//! Handles loading TTLs, sharing policy and remote endpoints from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::flow::SharingPolicy;

/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Quote refresh TTL in seconds
    pub quotes_ttl: u64,
    /// Staking balance refresh TTL in seconds
    pub staking_ttl: u64,
    /// Grace window in milliseconds before an unobserved shared stream stops
    pub stop_timeout_ms: u64,
    /// Milliseconds a stopped shared stream keeps its replay slot
    pub replay_expiration_ms: u64,
    /// Background refresh interval in seconds
    pub refresh_interval: u64,
    /// Base URL of the quotes API
    pub quotes_api_url: String,
    /// Fiat currency quotes are expressed in
    pub fiat_currency: String,
    /// Currency ids observed by the watcher binary
    pub watch_currencies: Vec<String>,
    /// Upstream limit of staking balance requests per call
    pub staking_max_batch: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `QUOTES_TTL_SECS` - Quote TTL (default: 900)
    /// - `STAKING_TTL_SECS` - Staking balance TTL (default: 600)
    /// - `STOP_TIMEOUT_MS` - Shared stream grace window (default: 5000)
    /// - `REPLAY_EXPIRATION_MS` - Replay slot lifetime after stop (default: 0)
    /// - `REFRESH_INTERVAL_SECS` - Background refresh interval (default: 60)
    /// - `QUOTES_API_URL` - Quotes API base URL (default: http://localhost:8080)
    /// - `FIAT_CURRENCY` - Fiat currency id (default: usd)
    /// - `WATCH_CURRENCIES` - Comma separated currency ids (default: bitcoin,ethereum)
    /// - `STAKING_MAX_BATCH` - Staking requests per upstream call (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            quotes_ttl: parse_var("QUOTES_TTL_SECS").unwrap_or(defaults.quotes_ttl),
            staking_ttl: parse_var("STAKING_TTL_SECS").unwrap_or(defaults.staking_ttl),
            stop_timeout_ms: parse_var("STOP_TIMEOUT_MS").unwrap_or(defaults.stop_timeout_ms),
            replay_expiration_ms: parse_var("REPLAY_EXPIRATION_MS")
                .unwrap_or(defaults.replay_expiration_ms),
            refresh_interval: parse_var("REFRESH_INTERVAL_SECS")
                .unwrap_or(defaults.refresh_interval),
            quotes_api_url: env::var("QUOTES_API_URL").unwrap_or(defaults.quotes_api_url),
            fiat_currency: env::var("FIAT_CURRENCY").unwrap_or(defaults.fiat_currency),
            watch_currencies: env::var("WATCH_CURRENCIES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.watch_currencies),
            staking_max_batch: parse_var("STAKING_MAX_BATCH")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.staking_max_batch),
        }
    }

    /// Quote TTL as a Duration.
    pub fn quotes_ttl(&self) -> Duration {
        Duration::from_secs(self.quotes_ttl)
    }

    /// Staking balance TTL as a Duration.
    pub fn staking_ttl(&self) -> Duration {
        Duration::from_secs(self.staking_ttl)
    }

    /// Background refresh interval as a Duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Sharing policy applied to every supplier built from this config.
    pub fn sharing_policy(&self) -> SharingPolicy {
        SharingPolicy {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            replay_expiration: Duration::from_millis(self.replay_expiration_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quotes_ttl: 900,
            staking_ttl: 600,
            stop_timeout_ms: 5_000,
            replay_expiration_ms: 0,
            refresh_interval: 60,
            quotes_api_url: "http://localhost:8080".to_string(),
            fiat_currency: "usd".to_string(),
            watch_currencies: vec!["bitcoin".to_string(), "ethereum".to_string()],
            staking_max_batch: 15,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
