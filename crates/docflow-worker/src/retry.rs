//! Exponential backoff with jitter for failed job attempts.

use std::time::Duration;

use docflow_core::WorkerConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// ±25% random jitter on each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.backoff_base_ms,
            max_delay_ms: config.backoff_max_ms,
            jitter: true,
        }
    }

    /// Delay after the `attempts_made`-th failure (1-based): base·2^(n-1), capped.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }
        let exp = (attempts_made - 1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);

        let delay_ms = if self.jitter {
            let spread = delay_ms / 4;
            if spread > 0 {
                rand::thread_rng().gen_range(delay_ms - spread..=delay_ms.saturating_add(spread))
            } else {
                delay_ms
            }
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms)
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = fixed();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(60_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(60_000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            jitter: true,
            ..fixed()
        };
        for _ in 0..100 {
            let ms = policy.delay_for(2).as_millis();
            assert!((3_000..=5_000).contains(&ms), "{ms}");
        }
    }

    #[test]
    fn test_jitter_spreads_delays() {
        let policy = RetryPolicy {
            jitter: true,
            ..fixed()
        };
        let distinct: std::collections::HashSet<_> =
            (0..50).map(|_| policy.delay_for(3)).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let policy = fixed();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
