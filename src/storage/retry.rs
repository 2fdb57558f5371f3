//! Retry configuration for counter store round trips.

use backon::ExponentialBuilder;
use std::time::Duration;

/// Exponential backoff applied to retryable store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Creates a RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SEQALLOC_MAX_RETRIES`: Maximum retry attempts (default: 5)
    /// - `SEQALLOC_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 100)
    /// - `SEQALLOC_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 10000)
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    /// Unparseable values fall back to the defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        Self {
            max_retries: parse_var(&lookup, "SEQALLOC_MAX_RETRIES")
                .unwrap_or(default.max_retries),
            initial_delay_ms: parse_var(&lookup, "SEQALLOC_RETRY_INITIAL_MS")
                .unwrap_or(default.initial_delay_ms),
            max_delay_ms: parse_var(&lookup, "SEQALLOC_RETRY_MAX_MS")
                .unwrap_or(default.max_delay_ms),
        }
    }

    /// No retries at all; the first failure surfaces.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Creates an exponential backoff builder with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

pub(crate) fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
