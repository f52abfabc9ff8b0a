//! Simulated node actors.
//!
//! A node is an independent task that owns its business state and talks to the
//! rest of the network exclusively through its [`NodeContext`]: outbound
//! payloads go to the [`Simulator`], inbound ones are drained from an unbounded
//! FIFO inbox the delivery loop fills. The simulator never runs node logic
//! inline.
//!
//! # Implementations
//! - [`HashNode`](crate::dht::HashNode): the DHT overlay peer.
//! - [`ClientNode`]: an outside entity with no loop of its own, polled by a driver.
//! - [`TrafficNode`]: a load generator used to saturate links.

use std::{fmt::Display, future::Future, sync::Arc};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::simulation::{SimTime, Simulator};

mod client;
mod traffic;

pub use client::{ClientCommand, ClientNode};
pub use traffic::TrafficNode;

/// Opaque unique name of a node for its whole lifetime.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&Address> for Address {
    fn from(value: &Address) -> Self {
        value.clone()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// A delivered payload together with its endpoints and timing.
#[derive(Clone, Debug)]
pub struct Envelope {
    from: Address,
    to: Address,
    payload: Bytes,
    sent_time: SimTime,
    arrival_time: SimTime,
}

impl Envelope {
    pub(crate) fn new(
        from: Address,
        to: Address,
        payload: Bytes,
        sent_time: SimTime,
        arrival_time: SimTime,
    ) -> Self {
        Self {
            from,
            to,
            payload,
            sent_time,
            arrival_time,
        }
    }

    pub fn from(&self) -> &Address {
        &self.from
    }

    pub fn to(&self) -> &Address {
        &self.to
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Network time at which the sender submitted the payload.
    pub fn sent_time(&self) -> SimTime {
        self.sent_time
    }

    /// Network time at which the payload became deliverable.
    pub fn arrival_time(&self) -> SimTime {
        self.arrival_time
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Behaviour of a simulated node.
///
/// `run` is spawned as its own task by [`Simulator::add_node`] and should
/// return once [`NodeContext::recv`] yields `None`.
pub trait Node: Send + 'static {
    fn address(&self) -> &Address;

    fn run(self, ctx: NodeContext) -> impl Future<Output = ()> + Send;
}

/// A node's handle on the simulated network.
pub struct NodeContext {
    address: Address,
    simulator: Simulator,
    clock_offset: SimTime,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    stop: watch::Receiver<bool>,
}

impl NodeContext {
    pub(crate) fn new(
        address: Address,
        simulator: Simulator,
        clock_offset: SimTime,
        inbox: mpsc::UnboundedReceiver<Envelope>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            address,
            simulator,
            clock_offset,
            inbox,
            stop,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Hands a payload to the simulator; unknown or stopped destinations drop it silently.
    pub fn send(&self, to: &Address, payload: impl Into<Bytes>) {
        self.simulator.send(&self.address, to, payload.into());
    }

    /// This node's view of network time, skewed by its clock offset.
    pub fn time(&self) -> SimTime {
        self.simulator.time() + self.clock_offset
    }

    pub fn clock_offset(&self) -> SimTime {
        self.clock_offset
    }

    pub fn stop(&self) {
        self.simulator.stop_node(&self.address);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Waits for the next inbound payload, or `None` once the node is stopped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.is_stopped() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.stop.changed() => None,
            envelope = self.inbox.recv() => envelope,
        }
    }

    /// Takes the next queued payload without waiting.
    ///
    /// Payloads delivered before the node stopped stay readable here.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.inbox.try_recv().ok()
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("address", &self.address)
            .field("clock_offset", &self.clock_offset)
            .finish_non_exhaustive()
    }
}
