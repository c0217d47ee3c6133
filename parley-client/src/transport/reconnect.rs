//! Reconnection policy

use std::time::Duration;

use rand::RngExt;

use super::{CLOSE_POLICY, TransportError};
use crate::constants::{RECONNECT_BASE_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY};

/// Bounded exponential backoff with full jitter
///
/// Attempt `n` (1-based) that fails is followed by a sleep drawn uniformly
/// from `[0, min(base * 2^(n-1), max))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Upper bound of the backoff after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Random sleep in `[0, delay_for(attempt))`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let bound = u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..bound))
    }
}

/// Decides whether a read error should trigger a reconnect
///
/// Any `FnMut(&TransportError) -> bool` closure works.
pub trait ReconnectDecider {
    fn should_reconnect(&mut self, error: &TransportError) -> bool;
}

impl<F> ReconnectDecider for F
where
    F: FnMut(&TransportError) -> bool,
{
    fn should_reconnect(&mut self, error: &TransportError) -> bool {
        self(error)
    }
}

/// Reconnect after anything except a deliberate end of the session
///
/// A normal closure, a rejected session token (close code 1008), a protocol
/// error and cancellation all stop the client.
pub fn reconnect_unless_closed(error: &TransportError) -> bool {
    !error.is_normal_closure()
        && !matches!(
            error,
            TransportError::Closed {
                code: Some(CLOSE_POLICY)
            } | TransportError::Protocol(_)
                | TransportError::Cancelled
        )
}
