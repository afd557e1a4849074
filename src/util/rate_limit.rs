//! Rate limiting for participant action traffic

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max action/aim messages per second from one participant.
/// Aim updates stream while dragging, so this sits at the tick rate.
pub const ACTION_RATE_LIMIT: u32 = 30;

/// Per-participant rate limiter state
#[derive(Clone)]
pub struct ParticipantRateLimiter {
    action_limiter: Arc<Limiter>,
}

impl ParticipantRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(ACTION_RATE_LIMIT)
    }

    pub fn with_rate(requests_per_second: u32) -> Self {
        Self {
            action_limiter: create_limiter(requests_per_second),
        }
    }

    /// Check if an inbound message is allowed (returns true if allowed)
    pub fn check_action(&self) -> bool {
        self.action_limiter.check().is_ok()
    }
}

impl Default for ParticipantRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
