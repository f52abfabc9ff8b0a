//! Token bucket bandwidth model for simulated nodes and links.
//!
//! A bucket holds a *flow* of bytes that refills at a fixed rate up to a
//! maximum. Reserving capacity for a payload never blocks: it returns how long
//! the payload has to wait for enough flow, and debits the flow right away.
//! The flow may go negative, in which case the backlog delays every later
//! reservation on the same resource.

use parking_lot::Mutex;

use super::time::SimTime;

/// Token bucket driven by network time.
///
/// Thread-safe via internal mutex.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketState {
    /// Refill rate (bytes per network second)
    pub refill_rate: f64,
    /// Burst capacity (bytes)
    pub maximum_flow: f64,
    /// Currently available bytes, negative while backlogged
    pub flow: f64,
    /// Network time of the last replenishment
    pub last_update: SimTime,
}

impl TokenBucket {
    /// Create a bucket with a burst capacity of ten seconds of traffic, starting full.
    pub fn new(refill_rate: f64, now: SimTime) -> Self {
        Self::with_capacity(refill_rate, 10.0 * refill_rate, now)
    }

    pub fn with_capacity(refill_rate: f64, maximum_flow: f64, now: SimTime) -> Self {
        Self {
            state: Mutex::new(BucketState {
                refill_rate,
                maximum_flow,
                flow: maximum_flow,
                last_update: now,
            }),
        }
    }

    /// Reserve capacity for `size` bytes at network time `now`.
    ///
    /// Returns the delay until the payload has fully passed through this
    /// resource. The flow is debited immediately.
    pub fn reserve(&self, size: usize, now: SimTime) -> SimTime {
        let mut state = self.state.lock();
        state.replenish(now);
        let size = size as f64;
        let delay = ((size - state.flow) / state.refill_rate).max(0.0);
        state.flow -= size;
        delay
    }

    /// Current state, replenished up to `now`.
    pub fn state_at(&self, now: SimTime) -> BucketState {
        let mut state = self.state.lock();
        state.replenish(now);
        *state
    }

    /// Current state without replenishing.
    pub fn state(&self) -> BucketState {
        *self.state.lock()
    }
}

impl BucketState {
    fn replenish(&mut self, now: SimTime) {
        let elapsed = (now - self.last_update).max(0.0);
        self.flow = (self.flow + elapsed * self.refill_rate).min(self.maximum_flow);
        self.last_update = self.last_update.max(now);
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TokenBucket").field(&self.state()).finish()
    }
}
