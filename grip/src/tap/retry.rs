//! Retry policy: attempt budget and exponential backoff.

use std::fmt;
use std::sync::Arc;

use crate::time::Millis;

use super::state::RequestError;

/// Predicate deciding whether a failure is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&RequestError) -> bool + Send + Sync>;

/// Retry policy for failed fetches.
///
/// The backoff for attempt `n` (zero-based) is
/// `initial_delay_ms * backoff_multiplier ^ n`, capped at `max_delay_ms`.
/// The attempt counter is incremented at schedule time, so it always
/// reflects the *next* attempt.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum scheduled retries per request key (default: 3).
    pub max_retries: u32,
    /// Delay before the first retry (default: 1000ms).
    pub initial_delay_ms: Millis,
    /// Upper bound on any backoff delay (default: 30000ms).
    pub max_delay_ms: Millis,
    /// Growth factor between attempts (default: 2.0).
    pub backoff_multiplier: f64,
    /// Optional retryability predicate; `None` retries every failure.
    pub retry_on: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_on: None,
        }
    }
}

impl RetryConfig {
    /// Disables retries entirely.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay_ms(mut self, delay: Millis) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the upper bound on backoff delays.
    pub fn with_max_delay_ms(mut self, delay: Millis) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the retryability predicate.
    pub fn with_retry_on(
        mut self,
        predicate: impl Fn(&RequestError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Returns the backoff delay for the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Millis {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            raw as Millis
        }
    }

    /// Returns true if the error should be retried under this policy.
    pub fn should_retry(&self, error: &RequestError) -> bool {
        self.retry_on.as_ref().map_or(true, |pred| pred(error))
    }

    /// Returns true if the attempt budget still allows scheduling.
    pub fn budget_allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.retry_on.is_none());
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), 1_000);
        assert_eq!(config.delay_for_attempt(1), 2_000);
        assert_eq!(config.delay_for_attempt(2), 4_000);
        assert_eq!(config.delay_for_attempt(3), 8_000);
    }

    #[test]
    fn test_backoff_saturates_at_max_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(4), 16_000);
        assert_eq!(config.delay_for_attempt(5), 30_000);
        assert_eq!(config.delay_for_attempt(30), 30_000);
        // Exponent far past f64 comfort still saturates instead of wrapping.
        assert_eq!(config.delay_for_attempt(u32::MAX), 30_000);
    }

    #[test]
    fn test_backoff_with_custom_multiplier() {
        let config = RetryConfig::default()
            .with_initial_delay_ms(100)
            .with_backoff_multiplier(3.0)
            .with_max_delay_ms(10_000);
        assert_eq!(config.delay_for_attempt(0), 100);
        assert_eq!(config.delay_for_attempt(1), 300);
        assert_eq!(config.delay_for_attempt(2), 900);
        assert_eq!(config.delay_for_attempt(5), 10_000);
    }

    #[test]
    fn test_budget_allows() {
        let config = RetryConfig::default().with_max_retries(2);
        assert!(config.budget_allows(0));
        assert!(config.budget_allows(1));
        assert!(!config.budget_allows(2));

        let disabled = RetryConfig::disabled();
        assert!(!disabled.budget_allows(0));
    }

    #[test]
    fn test_should_retry_defaults_to_true() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&RequestError::fetch("timeout")));
    }

    #[test]
    fn test_should_retry_honors_predicate() {
        let config = RetryConfig::default()
            .with_retry_on(|err| !err.message().contains("permanent"));
        assert!(config.should_retry(&RequestError::fetch("timeout")));
        assert!(!config.should_retry(&RequestError::fetch("permanent failure")));
    }
}
