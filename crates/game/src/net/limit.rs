use std::collections::HashMap;
use std::num::NonZeroU32;

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

pub type ClientId = u32;

/// Manually advanced clock for running an authority on simulated time.
pub type VirtualClock = governor::clock::FakeRelativeClock;

type Bucket<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Token bucket per client for inbound input messages. Excess input is
/// dropped by the caller without telling the sender.
pub struct InputLimiter<C: Clock = DefaultClock> {
    quota: Quota,
    clock: C,
    buckets: HashMap<ClientId, Bucket<C>>,
}

impl InputLimiter<DefaultClock> {
    pub fn new(capacity: u32, refill_per_second: u32) -> Self {
        Self::with_clock(capacity, refill_per_second, DefaultClock::default())
    }
}

impl<C: Clock> InputLimiter<C> {
    pub fn with_clock(capacity: u32, refill_per_second: u32, clock: C) -> Self {
        let refill = NonZeroU32::new(refill_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(capacity).unwrap_or(NonZeroU32::MIN);
        Self {
            quota: Quota::per_second(refill).allow_burst(burst),
            clock,
            buckets: HashMap::new(),
        }
    }

    /// Takes one token from `client`'s bucket. Returns false when empty.
    pub fn check(&mut self, client: ClientId) -> bool {
        let quota = self.quota;
        let clock = &self.clock;
        self.buckets
            .entry(client)
            .or_insert_with(|| RateLimiter::direct_with_clock(quota, clock))
            .check()
            .is_ok()
    }

    pub fn remove(&mut self, client: ClientId) {
        self.buckets.remove(&client);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
