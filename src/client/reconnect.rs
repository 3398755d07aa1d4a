//! Reconnect policy - decides whether and when to reopen a closed channel

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Protocol error
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Unsupported data
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// No close frame was received
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation; handshake rejections (401/403) are reported with it too
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Codes that mean the credential or the protocol is wrong
const FATAL_CLOSE_CODES: [u16; 3] = [
    CLOSE_PROTOCOL_ERROR,
    CLOSE_UNSUPPORTED_DATA,
    CLOSE_POLICY_VIOLATION,
];

/// Going away, service restart, try again later
const SERVER_RESTART_CODES: [u16; 3] = [1001, 1012, 1013];

/// How a channel closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    /// A close handshake completed
    pub clean: bool,
}

impl CloseReason {
    pub fn clean(code: u16) -> Self {
        Self { code, clean: true }
    }

    /// Dropped without a close handshake
    pub fn abnormal() -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            clean: false,
        }
    }

    pub fn rejected() -> Self {
        Self {
            code: CLOSE_POLICY_VIOLATION,
            clean: false,
        }
    }
}

/// Outcome of [`ReconnectPolicy::should_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reopen after the delay
    Retry { delay: Duration },
    /// Credential or protocol failure; the user has to sign in again
    Reauthenticate,
    /// Attempt budget spent
    GiveUp,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after a close.
    ///
    /// `attempt` is the number of reconnects already made since the last
    /// successful open.
    pub fn should_retry(&self, attempt: u32, close: CloseReason) -> RetryDecision {
        if FATAL_CLOSE_CODES.contains(&close.code) {
            return RetryDecision::Reauthenticate;
        }

        if close.clean && attempt == 0 && !SERVER_RESTART_CODES.contains(&close.code) {
            return RetryDecision::Reauthenticate;
        }

        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }

    /// `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
