/// Simulator, overlay and command line configuration.
pub mod config;

/// Self-organizing DHT overlay nodes.
pub mod dht;

/// Overlay wire messages.
pub mod message;

/// Node actors and their handle on the network.
pub mod node;

/// Positions on the key space and peer tree bookkeeping.
pub mod ring;

/// Discrete-event network simulator.
pub mod simulation;

/// Tracing and logging infrastructure.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

pub mod util;
