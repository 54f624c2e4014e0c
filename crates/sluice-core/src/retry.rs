use std::time::Duration;

use crate::error::AppError;

/// Default retryable error tags.
pub const DEFAULT_RETRYABLE_TAGS: &[&str] = &["connection-reset", "not-found", "timeout"];

/// Retry configuration with exponential backoff, shared by all registries.
///
/// Delay before retry `n` (0-indexed attempt that just failed) is
/// `base_delay * backoff_factor^n`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    /// Case-insensitive substrings of an error message that make it retryable.
    pub retryable_tags: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            retryable_tags: DEFAULT_RETRYABLE_TAGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_retryable_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Delay to wait after the given 0-indexed attempt failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(0.0).powi(attempt as i32);
        let ms = self.base_delay.as_millis() as f64 * factor;
        if ms.is_finite() {
            Duration::from_millis(ms.round() as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Returns true if the error's message matches a retryable tag.
    ///
    /// `-`, `_` and whitespace are equivalent separators on both sides, so
    /// `connection-reset` matches "Connection reset by peer".
    pub fn is_retryable(&self, error: &AppError) -> bool {
        let message = normalize(&error.to_string());
        self.retryable_tags
            .iter()
            .map(|tag| normalize(tag))
            .any(|tag| !tag.is_empty() && message.contains(&tag))
    }

    /// Whether another attempt should follow the failed `attempt`.
    pub fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '-' | '_' => ' ',
            c if c.is_whitespace() => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
