use std::env;
use std::time::Duration;

use crate::client::queue::QueueConfig;
use crate::client::retry::RetryPolicy;
use crate::shared::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT_SECS, DEFAULT_MAX_CHUNK_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT_TRANSFERS,
};

/// Settings of the upload client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub queue: QueueConfig,
    /// Polling period of the change watcher
    pub watch_interval: Duration,
}

impl ClientConfig {
    const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:3000";
    const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
    const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
    const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
    const DEFAULT_WATCH_INTERVAL_SECS: u64 = 10;

    pub fn from_env() -> Result<Self, String> {
        let base_url =
            env::var("CLOUDVAULT_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        let token = env::var("CLOUDVAULT_TOKEN").ok().filter(|s| !s.is_empty());

        let chunk_size = parse_var("UPLOAD_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let concurrency = parse_var("UPLOAD_CONCURRENCY", DEFAULT_MAX_CONCURRENT_TRANSFERS)?;
        let max_attempts = parse_var("UPLOAD_MAX_ATTEMPTS", DEFAULT_MAX_CHUNK_ATTEMPTS)?;
        let backoff_base_ms = parse_var("UPLOAD_BACKOFF_BASE_MS", Self::DEFAULT_BACKOFF_BASE_MS)?;
        let backoff_factor = parse_var("UPLOAD_BACKOFF_FACTOR", Self::DEFAULT_BACKOFF_FACTOR)?;
        let backoff_cap_ms = parse_var("UPLOAD_BACKOFF_CAP_MS", Self::DEFAULT_BACKOFF_CAP_MS)?;
        let chunk_timeout_secs =
            parse_var("UPLOAD_CHUNK_TIMEOUT_SECS", DEFAULT_CHUNK_TIMEOUT_SECS)?;
        let watch_interval_secs =
            parse_var("WATCH_INTERVAL_SECS", Self::DEFAULT_WATCH_INTERVAL_SECS)?;

        if chunk_size == 0 || concurrency == 0 || max_attempts == 0 {
            return Err(
                "UPLOAD_CHUNK_SIZE, UPLOAD_CONCURRENCY and UPLOAD_MAX_ATTEMPTS must be positive"
                    .to_string(),
            );
        }
        if backoff_factor.is_nan() || backoff_factor < 1.0 {
            return Err("UPLOAD_BACKOFF_FACTOR must be at least 1.0".to_string());
        }

        Ok(Self {
            base_url,
            token,
            queue: QueueConfig {
                chunk_size,
                concurrency,
                max_attempts,
                retry: RetryPolicy {
                    base: Duration::from_millis(backoff_base_ms),
                    factor: backoff_factor,
                    cap: Duration::from_millis(backoff_cap_ms),
                },
                chunk_timeout: Duration::from_secs(chunk_timeout_secs),
            },
            watch_interval: Duration::from_secs(watch_interval_secs.max(1)),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", name)),
        _ => Ok(default),
    }
}
