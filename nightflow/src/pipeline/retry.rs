//! Retry policy engine.
//!
//! A pure decision function over (attempt count, outcome, policy). The delay
//! is fixed per policy; there is no backoff and no jitter.

use crate::core::AttemptOutcome;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-node retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    pub base_delay: Duration,
    /// Whether collaborator failures count as retryable for this node.
    pub retry_collaborator_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` total attempts.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            retry_collaborator_failures: true,
        }
    }

    /// Creates a policy allowing `retries` re-invocations after the first attempt.
    #[must_use]
    pub fn with_retries(retries: u32, base_delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), base_delay)
    }

    /// A single attempt, never retried.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Treats collaborator failures as fatal for this node.
    #[must_use]
    pub fn without_collaborator_retries(mut self) -> Self {
        self.retry_collaborator_failures = false;
        self
    }

    /// Returns the number of re-invocations the policy allows.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Checks that the policy can be applied.
    ///
    /// # Errors
    ///
    /// Returns a reason string if `max_attempts` is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Result of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-invoke the same node after the delay.
    Retry {
        /// Delay before the next attempt.
        after: Duration,
    },
    /// Stop; the node's last outcome is final.
    GiveUp,
}

impl RetryDecision {
    /// Returns true for [`RetryDecision::Retry`].
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Decides whether a node is re-invoked after its `attempt_count`-th attempt.
///
/// Only retryable outcomes (collaborator failures and timeouts) are retried,
/// and only while `attempt_count < policy.max_attempts`. Success, fatal
/// failures and cancellations always give up.
#[must_use]
pub fn decide(attempt_count: u32, outcome: AttemptOutcome, policy: &RetryPolicy) -> RetryDecision {
    if outcome.is_retryable() && attempt_count < policy.max_attempts {
        RetryDecision::Retry {
            after: policy.base_delay,
        }
    } else {
        RetryDecision::GiveUp
    }
}
