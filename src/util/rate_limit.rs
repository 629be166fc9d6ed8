//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::game::PlayerId;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Key of the input limiter: claimed player id and the datagram's source
pub type InputKey = (PlayerId, SocketAddr);

/// Limiter keyed per player and source address
pub type KeyedLimiter = RateLimiter<InputKey, DefaultKeyedStateStore<InputKey>, DefaultClock>;

fn quota(per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
}

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    Arc::new(RateLimiter::direct(quota(requests_per_second)))
}

/// Input datagrams per player per second (clients send one per frame)
pub const INPUT_RATE_LIMIT: u32 = 240;

/// Control tokens per connection per second
pub const CONTROL_RATE_LIMIT: u32 = 10;

/// Per-connection rate limiter for the control channel
#[derive(Clone)]
pub struct ControlRateLimiter {
    limiter: Arc<Limiter>,
}

impl ControlRateLimiter {
    pub fn new() -> Self {
        Self {
            limiter: create_limiter(CONTROL_RATE_LIMIT),
        }
    }

    /// Check if a control token is allowed (returns true if allowed)
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for ControlRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-player, per-source rate limiter for the state channel.
///
/// Keying on the source too keeps datagrams that only claim an id from
/// eating into the quota of the player who owns it.
#[derive(Clone)]
pub struct InputRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl InputRateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota(per_second))),
        }
    }

    /// Check if another datagram for `player_id` from `source` is allowed
    pub fn check(&self, player_id: &PlayerId, source: SocketAddr) -> bool {
        self.limiter
            .check_key(&(player_id.clone(), source))
            .is_ok()
    }

    /// Drop bookkeeping for players that have been idle long enough to be full again
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

impl Default for InputRateLimiter {
    fn default() -> Self {
        Self::new(INPUT_RATE_LIMIT)
    }
}
