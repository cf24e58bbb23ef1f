//! Environment-driven configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_requests_per_second() -> u32 {
    95
}

fn default_hourly_quota() -> u32 {
    36_000
}

fn default_sync_interval_secs() -> u64 {
    30 * 60
}

fn default_batch_concurrency() -> usize {
    crate::sync::batch::DEFAULT_CONCURRENCY
}

fn default_workers_per_queue() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    /// Comma-separated `client_id:client_secret` pairs. More pairs means
    /// more sustainable throughput, since each carries its own limiter.
    pub blizzard_credentials: String,

    /// Per-credential request rate.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Per-credential hourly request quota.
    #[serde(default = "default_hourly_quota")]
    pub hourly_quota: u32,

    /// Seconds between sync cycle kickoffs.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// In-flight character syncs per batch job.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Worker tasks per job queue.
    #[serde(default = "default_workers_per_queue")]
    pub workers_per_queue: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Parse the credential list. At least one pair is required; a missing
    /// secret in any pair is a configuration error, not a skippable entry.
    pub fn credential_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for raw in self
            .blizzard_credentials
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let (id, secret) = raw
                .split_once(':')
                .with_context(|| format!("credential entry missing ':' separator: {raw:?}"))?;
            if id.is_empty() || secret.is_empty() {
                anyhow::bail!("credential entry has an empty id or secret");
            }
            pairs.push((id.to_string(), secret.to_string()));
        }
        if pairs.is_empty() {
            anyhow::bail!("BLIZZARD_CREDENTIALS must contain at least one client_id:client_secret pair");
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(credentials: &str) -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            blizzard_credentials: credentials.into(),
            requests_per_second: default_requests_per_second(),
            hourly_quota: default_hourly_quota(),
            sync_interval_secs: default_sync_interval_secs(),
            batch_concurrency: default_batch_concurrency(),
            workers_per_queue: default_workers_per_queue(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn test_credential_pairs_parse() {
        let pairs = config("abc:s3cret, def:other").credential_pairs().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("abc".into(), "s3cret".into()));
        assert_eq!(pairs[1], ("def".into(), "other".into()));
    }

    #[test]
    fn test_credential_pairs_reject_malformed() {
        assert!(config("").credential_pairs().is_err());
        assert!(config("justanid").credential_pairs().is_err());
        assert!(config("id:").credential_pairs().is_err());
    }
}
