//! Retry policy: which failures are retried and how long to wait between attempts.

use std::time::Duration;

use rand::Rng;
use reqwest::Method;

use conceptlink_shared::RetryConfig;

/// The classic transient status set.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Bounded retry with jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Never below 1.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Cap for any single wait, including `Retry-After`.
    pub max_delay: Duration,
    /// Status codes worth another attempt.
    pub retryable_statuses: Vec<u16>,
    /// Only these methods are ever retried.
    pub retryable_methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(120),
            retryable_statuses: TRANSIENT_STATUSES.to_vec(),
            retryable_methods: read_only_methods(),
        }
    }
}

fn read_only_methods() -> Vec<Method> {
    vec![Method::GET, Method::HEAD, Method::OPTIONS]
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            retryable_statuses: config.retryable_statuses.clone(),
            retryable_methods: read_only_methods(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    /// Un-jittered wait before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Wait before retry number `retry`: half fixed, half uniform random,
    /// raised to `retry_after` when the server asked for longer.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let full = self.backoff(retry);
        let half = (full.as_micros() / 2) as u64;
        let jitter = rand::thread_rng().gen_range(0..=half);
        let jittered = Duration::from_micros(half + jitter);
        match retry_after {
            Some(wait) => jittered.max(wait).min(self.max_delay),
            None => jittered,
        }
    }
}
