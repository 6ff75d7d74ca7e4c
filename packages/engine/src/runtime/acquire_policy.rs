// packages/engine/src/runtime/acquire_policy.rs
//! Acquire policy for the rendering-context pool
//!
//! Controls how a blocked acquirer polls:
//! - Backoff interval between unsuccessful polls
//! - Optional overall timeout (fails with resource exhaustion)
//! - Optional bound on activation retries

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Polling policy used by [`ContextPool::acquire`](super::ContextPool::acquire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquirePolicy {
    /// Sleep between polls when no slot is free or activation failed
    pub backoff: Duration,

    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,

    /// Give up activation after this many attempts; `None` retries forever
    pub max_activation_attempts: Option<u32>,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(1),
            timeout: None,
            max_activation_attempts: None,
        }
    }
}

impl AcquirePolicy {
    /// Block until a context is obtained, however long it takes
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Fail with resource exhaustion after `timeout`
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Bounded wait and bounded activation retries
    pub fn strict() -> Self {
        Self {
            backoff: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
            max_activation_attempts: Some(100),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_activation_attempts(mut self, attempts: u32) -> Self {
        self.max_activation_attempts = Some(attempts);
        self
    }

    /// Validate policy values
    pub fn validate(&self) -> Result<()> {
        if self.backoff > Duration::from_secs(1) {
            return Err(EngineError::InvalidConfig(
                "acquire backoff cannot exceed 1s".to_string(),
            ));
        }

        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(EngineError::InvalidConfig(
                    "acquire timeout cannot be 0".to_string(),
                ));
            }
        }

        if self.max_activation_attempts == Some(0) {
            return Err(EngineError::InvalidConfig(
                "activation attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the wait that began at `started` has run out of time
    pub fn expired(&self, started: Instant) -> bool {
        self.timeout
            .map(|timeout| started.elapsed() >= timeout)
            .unwrap_or(false)
    }

    /// Whether `attempts` failed activations exhaust the retry budget
    pub fn activation_exhausted(&self, attempts: u32) -> bool {
        self.max_activation_attempts
            .map(|max| attempts >= max)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = AcquirePolicy::default();
        assert_eq!(policy.backoff, Duration::from_millis(1));
        assert!(policy.timeout.is_none());
        assert!(policy.max_activation_attempts.is_none());
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!policy.expired(started));
    }

    #[test]
    fn test_bounded_policy_expires() {
        let policy = AcquirePolicy::bounded(Duration::from_millis(10));
        assert!(!policy.expired(Instant::now()));

        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(20));
        assert!(policy.expired(started));
    }

    #[test]
    fn test_activation_budget() {
        let policy = AcquirePolicy::unbounded().with_activation_attempts(3);
        assert!(!policy.activation_exhausted(2));
        assert!(policy.activation_exhausted(3));
        assert!(!AcquirePolicy::unbounded().activation_exhausted(u32::MAX));
    }

    #[test]
    fn test_validation() {
        assert!(AcquirePolicy::strict().validate().is_ok());

        let zero_timeout = AcquirePolicy::bounded(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());

        let zero_attempts = AcquirePolicy::unbounded().with_activation_attempts(0);
        assert!(zero_attempts.validate().is_err());

        let slow = AcquirePolicy::unbounded().with_backoff(Duration::from_secs(2));
        assert!(slow.validate().is_err());
    }
}
