use std::time::{Duration, Instant};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How crashed or unstartable instances are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct RestartPolicy {
    /// Delay before the first retry.
    #[builder(default = DEFAULT_INITIAL_DELAY_MS)]
    initial_delay_ms: u64,

    /// Upper bound of the delay.
    #[builder(default = DEFAULT_MAX_DELAY_MS)]
    max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    #[builder(default = DEFAULT_MULTIPLIER)]
    multiplier: u32,

    /// Consecutive failures after which the instance is marked failed.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Try again once this instant has passed.
    RetryAt(Instant),

    /// Stop retrying until an operator intervenes.
    GiveUp,
}

/// Consecutive-failure bookkeeping for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackoffState {
    attempts: u32,
    retry_at: Option<Instant>,
    gave_up: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RestartPolicy {
    /// The delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(exponent);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl BackoffState {
    /// Records a failure observed at `now`.
    pub fn record_failure(&mut self, policy: &RestartPolicy, now: Instant) -> BackoffDecision {
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts >= policy.max_attempts {
            self.gave_up = true;
            self.retry_at = None;
            return BackoffDecision::GiveUp;
        }

        let at = now + policy.delay_for(self.attempts);
        self.retry_at = Some(at);
        BackoffDecision::RetryAt(at)
    }

    /// Returns true if an automatic attempt is allowed at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        !self.gave_up && self.retry_at.map_or(true, |at| now >= at)
    }

    /// Returns true once retries are exhausted.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Consecutive failures so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forgets every failure.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RestartPolicy::builder()
            .initial_delay_ms(100)
            .max_delay_ms(1_000)
            .build();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RestartPolicy::builder()
            .initial_delay_ms(100)
            .max_attempts(3)
            .build();
        let mut state = BackoffState::default();
        let now = Instant::now();

        assert!(state.ready(now));
        assert_eq!(
            state.record_failure(&policy, now),
            BackoffDecision::RetryAt(now + Duration::from_millis(100))
        );
        assert!(!state.ready(now));
        assert!(state.ready(now + Duration::from_millis(100)));

        state.record_failure(&policy, now);
        assert_eq!(state.record_failure(&policy, now), BackoffDecision::GiveUp);
        assert!(state.gave_up());
        assert!(!state.ready(now + Duration::from_secs(3600)));

        state.reset();
        assert!(state.ready(now));
        assert_eq!(state.attempts(), 0);
    }
}
