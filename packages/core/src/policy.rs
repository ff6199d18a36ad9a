//! Broker configuration and the retry/backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry and backoff configuration for failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of executions before a job fails for good.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound for any single retry delay (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Backoff before retrying after `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Decide what happens after `attempt` failed with a transient error.
    pub fn decide(&self, attempt: u32) -> RequeueDecision {
        if attempt >= self.max_attempts {
            RequeueDecision::Terminal
        } else {
            RequeueDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.backoff(attempt),
            }
        }
    }
}

/// Outcome of reporting a failed attempt to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueDecision {
    /// The job went back to pending and becomes eligible after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// The job is now `failed`.
    Terminal,
    /// The report referred to a lease the job no longer holds.
    Discarded,
}

/// Configuration for broker behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub retry: RetryPolicy,
    /// Invisibility window granted with each lease (milliseconds).
    pub lease_timeout_ms: u64,
    /// Housekeeping period for lease expiry and delayed retries (milliseconds).
    pub tick_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease_timeout_ms: 300_000,
            tick_interval_ms: 250,
        }
    }
}

impl BrokerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn decide_stops_at_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(
            policy.decide(1),
            RequeueDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_millis(10)
            }
        );
        assert!(matches!(policy.decide(2), RequeueDecision::Retry { .. }));
        assert_eq!(policy.decide(3), RequeueDecision::Terminal);
    }
}
