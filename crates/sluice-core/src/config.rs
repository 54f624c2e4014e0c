use std::str::FromStr;
use std::time::Duration;

use crate::config_store::DEFAULT_CACHE_CAPACITY;
use crate::error::AppError;
use crate::retry::{DEFAULT_RETRYABLE_TAGS, RetryPolicy};

/// Runtime configuration of the processing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub default_scraper: Option<String>,
    pub config_cache_capacity: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrency: 10,
            request_timeout: Duration::from_millis(30_000),
            default_scraper: None,
            config_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Read configuration from environment variables. All are optional.
    ///
    /// - `SLUICE_MAX_RETRIES` (default 3)
    /// - `SLUICE_RETRY_BASE_DELAY_MS` (default 1000)
    /// - `SLUICE_RETRY_BACKOFF_FACTOR` (default 2.0)
    /// - `SLUICE_RETRYABLE_ERRORS` (comma separated, default `connection-reset,not-found,timeout`)
    /// - `SLUICE_MAX_CONCURRENCY` (default 10, at least 1)
    /// - `SLUICE_REQUEST_TIMEOUT_MS` (default 30000, at least 1)
    /// - `SLUICE_DEFAULT_SCRAPER` (unset)
    /// - `SLUICE_CONFIG_CACHE_CAPACITY` (default 10000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let max_retries = parse(&lookup, "SLUICE_MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries);
        let base_delay_ms: u64 = parse(&lookup, "SLUICE_RETRY_BASE_DELAY_MS")?
            .unwrap_or(defaults.retry.base_delay.as_millis() as u64);
        let backoff_factor: f64 =
            parse(&lookup, "SLUICE_RETRY_BACKOFF_FACTOR")?.unwrap_or(defaults.retry.backoff_factor);
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(AppError::ConfigError(format!(
                "Invalid SLUICE_RETRY_BACKOFF_FACTOR '{backoff_factor}': must be at least 1.0"
            )));
        }

        let retryable_tags: Vec<String> = match lookup("SLUICE_RETRYABLE_ERRORS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_RETRYABLE_TAGS.iter().map(|s| s.to_string()).collect(),
        };

        let max_concurrency = positive(&lookup, "SLUICE_MAX_CONCURRENCY")?
            .unwrap_or(defaults.max_concurrency as u64) as usize;
        let timeout_ms = positive(&lookup, "SLUICE_REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout.as_millis() as u64);
        let config_cache_capacity = positive(&lookup, "SLUICE_CONFIG_CACHE_CAPACITY")?
            .unwrap_or(defaults.config_cache_capacity);

        let default_scraper = lookup("SLUICE_DEFAULT_SCRAPER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            retry: RetryPolicy::default()
                .with_max_retries(max_retries)
                .with_base_delay(Duration::from_millis(base_delay_ms))
                .with_backoff_factor(backoff_factor)
                .with_retryable_tags(retryable_tags),
            max_concurrency,
            request_timeout: Duration::from_millis(timeout_ms),
            default_scraper,
            config_cache_capacity,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, AppError> {
    match parse::<u64>(lookup, key)? {
        Some(0) => Err(AppError::ConfigError(format!("{key} must be at least 1"))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.default_scraper.is_none());
        assert_eq!(config.retry.retryable_tags.len(), 3);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("SLUICE_MAX_RETRIES", "0"),
            ("SLUICE_RETRY_BACKOFF_FACTOR", "1.5"),
            ("SLUICE_RETRYABLE_ERRORS", "rate-limit, 503 ,"),
            ("SLUICE_DEFAULT_SCRAPER", "browser"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.backoff_factor, 1.5);
        assert_eq!(config.retry.retryable_tags, vec!["rate-limit", "503"]);
        assert_eq!(config.default_scraper.as_deref(), Some("browser"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for (key, value) in [
            ("SLUICE_MAX_RETRIES", "many"),
            ("SLUICE_MAX_CONCURRENCY", "0"),
            ("SLUICE_RETRY_BACKOFF_FACTOR", "0.5"),
        ] {
            let err = PipelineConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, AppError::ConfigError(_)), "{key}");
        }
    }
}
