//! Backoff policy shared by call retries and block-fetch retries.

use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial * multiplier^(attempt-1)`
    Exponential { multiplier: f64 },
    /// `initial * attempt`
    Linear,
}

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first try).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Caps the computed delay.
    pub max_backoff: Duration,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Exponential doubling from `initial`.
    pub fn exponential(max_retries: u32, initial: Duration) -> Self {
        Self::new(RetryConfig {
            max_retries,
            initial_backoff: initial,
            ..Default::default()
        })
    }

    /// Linear growth by `step` per attempt, capped at one minute.
    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self::new(RetryConfig {
            max_retries,
            initial_backoff: step,
            max_backoff: Duration::from_secs(60),
            backoff: Backoff::Linear,
        })
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `max_retries` is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let initial_ms = self.config.initial_backoff.as_millis() as f64;
        let base_ms = match self.config.backoff {
            Backoff::Exponential { multiplier } => {
                initial_ms * multiplier.powi((attempt - 1) as i32)
            }
            Backoff::Linear => initial_ms * attempt as f64,
        };
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Total number of tries including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(100));
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy::linear(30, Duration::from_millis(200));
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(5).unwrap().as_millis(), 1_000);
        assert_eq!(policy.next_delay(30).unwrap().as_millis(), 6_000);
        assert!(policy.next_delay(31).is_none());
        assert_eq!(policy.max_attempts(), 31);
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff: Backoff::Exponential { multiplier: 10.0 },
        });
        assert_eq!(policy.next_delay(5).unwrap(), Duration::from_millis(500));
    }
}
