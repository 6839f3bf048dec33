//! Exponential backoff for retryable control-plane operations (§4.2), tuned
//! to the spec's literal formula rather than the crate's general-purpose
//! Storage backoff: `delay = min(DELAY * 2^attempt, MAX_DELAY)` with
//! `JITTER_FACTOR = 0.2` applied as `delay * (1 +- jitter)`.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Tracks the evolving backoff state across attempts for one logical
/// operation (a single part PUT, a single `listUploadedParts` call, ...).
#[derive(Debug)]
pub struct BackoffState {
    config: RetryConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.config.attempts
    }

    /// Computes the delay before the next attempt and advances the attempt
    /// counter. The first call (attempt 0) yields the base delay; callers
    /// should only invoke this when a retry has already been decided.
    pub fn next_delay(&mut self) -> Duration {
        let exp = 2u32.saturating_pow(self.attempt);
        self.attempt += 1;

        let base_ms = (self.config.delay.as_millis() as u64).saturating_mul(exp as u64);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as u64);

        let jitter_span = capped_ms as f64 * self.config.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        let jittered_ms = (capped_ms as f64 + jitter).max(0.0);

        Duration::from_millis(jittered_ms.min(self.config.max_delay.as_millis() as f64) as u64)
    }

    pub fn is_retry_eligible_status(&self, status: u16) -> bool {
        self.config.status_codes.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_attempt_before_the_cap() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let mut backoff = BackoffState::new(config);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4000));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let mut backoff = BackoffState::new(config);
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(30_000));
        }
    }

    #[test]
    fn can_retry_respects_the_attempt_budget() {
        let config = RetryConfig {
            attempts: 2,
            ..RetryConfig::default()
        };
        let mut backoff = BackoffState::new(config);
        assert!(backoff.can_retry());
        backoff.next_delay();
        assert!(backoff.can_retry());
        backoff.next_delay();
        assert!(!backoff.can_retry());
    }

    #[test]
    fn retry_eligible_status_codes_match_the_documented_set() {
        let backoff = BackoffState::new(RetryConfig::default());
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(backoff.is_retry_eligible_status(status));
        }
        assert!(!backoff.is_retry_eligible_status(404));
    }
}
