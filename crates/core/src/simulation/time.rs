//! Time abstraction layer for the network simulator.
//!
//! This module provides:
//! - `TimeSource` trait abstracting the underlying monotonic clock
//! - `RealTime` implementation delegating to tokio (honors paused test time)
//! - `VirtualTime` implementation advanced by hand for deterministic tests
//! - `NetworkClock`, the scaled virtual clock every simulated node observes

use std::{
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

/// Network time, in seconds since the simulator was created.
pub type SimTime = f64;

/// Monotonic base clock driving a [`NetworkClock`].
pub trait TimeSource: Send + Sync + 'static {
    /// Nanoseconds since an arbitrary, fixed epoch.
    fn now_nanos(&self) -> u64;

    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }
}

/// Base clock following tokio's notion of time.
///
/// Reads go through `tokio::time::Instant`, so a paused test runtime drives
/// this clock as well.
#[derive(Clone)]
pub struct RealTime {
    epoch: tokio::time::Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Virtual time implementation for deterministic tests.
///
/// Stands still until stepped with [`advance`](Self::advance) or
/// [`advance_to`](Self::advance_to).
/// Clones share the same underlying counter.
#[derive(Clone, Debug, Default)]
pub struct VirtualTime {
    current_nanos: Arc<AtomicU64>,
}

impl VirtualTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances time by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.current_nanos
            .fetch_add(duration.as_nanos() as u64, AtomicOrdering::SeqCst);
    }

    /// Advances time to the given absolute nanoseconds; moving backwards is a no-op.
    pub fn advance_to(&self, target_nanos: u64) {
        self.current_nanos
            .fetch_max(target_nanos, AtomicOrdering::SeqCst);
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.current_nanos.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug)]
struct ClockState {
    net_time: SimTime,
    last_base_nanos: u64,
    speed: f64,
}

/// Scaled clock shared by the simulator and its nodes.
///
/// Every reading folds the base clock delta since the previous reading into
/// the network time, multiplied by the current speed. Changing the speed only
/// affects time elapsed after the change.
pub struct NetworkClock {
    base: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl NetworkClock {
    pub fn new(base: Arc<dyn TimeSource>, speed: f64) -> Self {
        let last_base_nanos = base.now_nanos();
        Self {
            base,
            state: Mutex::new(ClockState {
                net_time: 0.0,
                last_base_nanos,
                speed: speed.max(0.0),
            }),
        }
    }

    pub fn now(&self) -> SimTime {
        let mut state = self.state.lock();
        Self::accrue(&mut state, self.base.now_nanos());
        state.net_time
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Negative speeds are clamped to a stopped clock.
    pub fn set_speed(&self, speed: f64) {
        let mut state = self.state.lock();
        Self::accrue(&mut state, self.base.now_nanos());
        state.speed = speed.max(0.0);
    }

    /// Base-clock duration until the network clock reaches `target`, if it is moving.
    pub fn base_duration_until(&self, target: SimTime) -> Option<Duration> {
        let mut state = self.state.lock();
        Self::accrue(&mut state, self.base.now_nanos());
        if state.speed <= 0.0 {
            return None;
        }
        let remaining = ((target - state.net_time) / state.speed).max(0.0);
        // arrivals too far ahead for a `Duration` are waited on forever
        Some(Duration::try_from_secs_f64(remaining).unwrap_or(Duration::MAX))
    }

    fn accrue(state: &mut ClockState, base_nanos: u64) {
        let delta = base_nanos.saturating_sub(state.last_base_nanos);
        state.net_time += delta as f64 / 1e9 * state.speed;
        state.last_base_nanos = state.last_base_nanos.max(base_nanos);
    }
}

impl std::fmt::Debug for NetworkClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClock")
            .field("state", &*self.state.lock())
            .finish()
    }
}
