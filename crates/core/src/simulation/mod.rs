//! Discrete-event network simulator.
//!
//! This module models a packet-switched network in which every node is an
//! independent tokio task. Delivery is gated by three resources:
//!
//! - **Links**: one per directed pair of nodes, with a fixed latency and a
//!   token-bucket bandwidth. Unless configured explicitly, a link is created on
//!   first use with a latency proportional to the distance between both nodes
//!   plus a random jitter.
//! - **Node bandwidth**: an inbound token bucket per node.
//! - **Packet loss**: every transmission is independently marked as dropped
//!   with the configured probability when it is created.
//!
//! Time is *network time*, in seconds, derived from a [`TimeSource`] scaled by
//! a runtime adjustable speed. With [`RealTime`] the base clock is tokio's, so
//! tests running on a paused runtime advance deterministically.
//!
//! # Example
//!
//! ```no_run
//! use dhtsim::config::SimulatorConfig;
//! use dhtsim::simulation::Simulator;
//!
//! # async fn demo() -> Result<(), dhtsim::simulation::SimError> {
//! let simulator = Simulator::start(SimulatorConfig::default())?;
//! let mut alice = simulator.register("alice", 0.0, 0.0, 1e6)?;
//! let bob = simulator.register("bob", 3.0, 4.0, 1e6)?;
//! bob.send(alice.address(), "hello");
//! let envelope = alice.recv().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ConfigError;
use crate::node::Address;

mod bandwidth;
mod network;
mod rng;
mod time;
mod transmission;

#[cfg(test)]
mod tests;

pub use bandwidth::{BucketState, TokenBucket};
pub use network::{LinkState, NetworkStats, Simulator, UNKNOWN_DISTANCE};
pub use rng::SimulationRng;
pub use time::{NetworkClock, RealTime, SimTime, TimeSource, VirtualTime};
pub use transmission::Transmission;

/// Setup errors surfaced to whoever builds the network.
///
/// Runtime anomalies (unknown destinations, drops) are never errors: they are
/// counted in [`NetworkStats`] and logged.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("address {0} is already registered")]
    DuplicateAddress(Address),
    #[error("cannot link node {0} to itself")]
    LinkingSelf(Address),
    #[error("invalid rate {0}: must be positive and finite")]
    InvalidRate(f64),
    #[error("invalid latency {0}: must be non-negative and finite")]
    InvalidLatency(f64),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
