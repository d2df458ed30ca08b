//! Retry policy for broadcast information fetches.
//!
//! The retry counter rides inside the requeued `Broad.Connect` message, so
//! the policy itself is stateless: given the attempt number that just
//! failed and the error, it says whether to try again and when.

use std::time::Duration;

use super::error::NicoError;
use crate::constants::{FETCH_INFORMATION_RETRY_DELAY, FETCH_INFORMATION_RETRY_LIMIT};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with this retry counter after `delay`.
    Retry {
        /// Counter to carry in the requeued message.
        next_retry_n: u32,
        /// Delay before requeueing.
        delay: Duration,
    },
    /// Surface the error.
    GiveUp,
}

/// Fixed-delay retry policy with a hard attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub limit: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: FETCH_INFORMATION_RETRY_LIMIT,
            delay: FETCH_INFORMATION_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Decide after attempt `retry_n` (0 for the first) failed with `err`.
    pub fn decide(&self, retry_n: u32, err: &NicoError) -> RetryDecision {
        if !err.is_retryable() {
            return RetryDecision::GiveUp;
        }
        let next_retry_n = retry_n.saturating_add(1);
        if next_retry_n >= self.limit {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            next_retry_n,
            delay: self.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_attempts_total() {
        let policy = RetryPolicy::default();
        let err = NicoError::Network("timeout".into());

        let mut attempts = 1;
        let mut retry_n = 0;
        while let RetryDecision::Retry { next_retry_n, delay } = policy.decide(retry_n, &err) {
            assert_eq!(delay, Duration::from_secs(1));
            retry_n = next_retry_n;
            attempts += 1;
        }
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, &NicoError::IncorrectAccount("notlogin".into())),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(0, &NicoError::ClosedBroadcast("closed".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_out_of_range_counter_gives_up() {
        let policy = RetryPolicy::default();
        let err = NicoError::Network(String::new());
        assert_eq!(policy.decide(u32::MAX, &err), RetryDecision::GiveUp);
    }
}
