//! The simulated packet-switched network.
//!
//! The [`Simulator`] is the sole authority over network time and delivery. A
//! send computes, at submission time, when the payload will have crossed both
//! the directed link and the destination node's inbound bandwidth, and queues
//! a [`Transmission`] ordered by that arrival time. A delivery loop task pops
//! every transmission whose arrival time has passed and pushes its payload
//! into the destination's inbox.
//!
//! Sends and delivery passes both read the clock while holding the queue lock,
//! so a destination always receives its payloads in non-decreasing arrival
//! order.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use super::bandwidth::{BucketState, TokenBucket};
use super::rng::SimulationRng;
use super::time::{NetworkClock, RealTime, SimTime, TimeSource};
use super::transmission::Transmission;
use super::SimError;
use crate::config::SimulatorConfig;
use crate::node::{Address, Envelope, Node, NodeContext};

/// Distance reported when either endpoint is unknown.
pub const UNKNOWN_DISTANCE: f64 = 99_999_999.0;

/// Statistics about network traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Transmissions queued
    pub messages_sent: u64,
    /// Payloads pushed into a destination inbox
    pub messages_delivered: u64,
    /// Transmissions lost to the packet drop chance
    pub messages_dropped: u64,
    /// Sends ignored because an endpoint was unknown or stopped
    pub messages_rejected: u64,
    /// Transmissions discarded because the destination stopped while they were in flight
    pub messages_expired: u64,
}

/// Directed connection between two nodes.
#[derive(Debug)]
pub struct Link {
    latency: SimTime,
    bandwidth: TokenBucket,
}

impl Link {
    fn new(latency: SimTime, rate: f64, now: SimTime) -> Self {
        Self {
            latency,
            bandwidth: TokenBucket::new(rate, now),
        }
    }
}

/// Snapshot of a link's latency and bandwidth state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkState {
    pub latency: SimTime,
    pub bandwidth: BucketState,
}

struct NodeEntry {
    x: f32,
    y: f32,
    bandwidth: TokenBucket,
    clock_offset: SimTime,
    inbox: mpsc::UnboundedSender<Envelope>,
    stop: watch::Sender<bool>,
}

impl NodeEntry {
    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

#[derive(Default)]
struct PendingQueue {
    heap: BinaryHeap<Transmission>,
    next_seq: u64,
}

struct Shared {
    config: SimulatorConfig,
    clock: NetworkClock,
    rng: SimulationRng,
    nodes: DashMap<Address, Arc<NodeEntry>>,
    links: DashMap<(Address, Address), Arc<Link>>,
    queue: Mutex<PendingQueue>,
    /// Serializes delivery passes so each destination sees a single consumer.
    delivery: Mutex<()>,
    wake: Notify,
    stopped: watch::Sender<bool>,
    stats: Mutex<NetworkStats>,
}

/// Handle to a simulated network. Clones share the same network.
#[derive(Clone)]
pub struct Simulator {
    inner: Arc<Shared>,
}

impl Simulator {
    /// Creates a simulator driven by the tokio clock, without starting the delivery loop.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimError> {
        Self::with_time_source(config, RealTime::new())
    }

    /// Creates a simulator whose network time is derived from `source`.
    pub fn with_time_source(
        config: SimulatorConfig,
        source: impl TimeSource,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let (stopped, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Shared {
                clock: NetworkClock::new(Arc::new(source), config.time_speed),
                rng: SimulationRng::new(config.seed),
                config,
                nodes: DashMap::new(),
                links: DashMap::new(),
                queue: Mutex::new(PendingQueue::default()),
                delivery: Mutex::new(()),
                wake: Notify::new(),
                stopped,
                stats: Mutex::new(NetworkStats::default()),
            }),
        })
    }

    /// Creates a simulator and spawns its delivery loop on the current runtime.
    pub fn start(config: SimulatorConfig) -> Result<Self, SimError> {
        let simulator = Self::new(config)?;
        simulator.spawn_delivery();
        Ok(simulator)
    }

    pub fn spawn_delivery(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_delivery())
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.inner.config
    }

    /// Current network time.
    pub fn time(&self) -> SimTime {
        self.inner.clock.now()
    }

    pub fn time_speed(&self) -> f64 {
        self.inner.clock.speed()
    }

    pub fn set_time_speed(&self, speed: f64) {
        self.inner.clock.set_speed(speed);
        self.inner.wake.notify_one();
    }

    /// Registers a node and spawns its task.
    pub fn add_node<N: Node>(
        &self,
        node: N,
        x: f32,
        y: f32,
        rate: f64,
    ) -> Result<JoinHandle<()>, SimError> {
        let ctx = self.register(node.address().clone(), x, y, rate)?;
        Ok(tokio::spawn(node.run(ctx)))
    }

    /// Registers a node without spawning anything and hands back its context.
    ///
    /// Inbound bandwidth refills at `rate` bytes per second, with a burst
    /// capacity of ten seconds worth of traffic.
    pub fn register(
        &self,
        address: impl Into<Address>,
        x: f32,
        y: f32,
        rate: f64,
    ) -> Result<NodeContext, SimError> {
        let address = address.into();
        check_rate(rate)?;
        let clock_offset = self
            .inner
            .rng
            .gen_symmetric(self.inner.config.clock_desync);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let entry = NodeEntry {
            x,
            y,
            bandwidth: TokenBucket::new(rate, self.time()),
            clock_offset,
            inbox: inbox_tx,
            stop: stop_tx,
        };
        match self.inner.nodes.entry(address.clone()) {
            Entry::Occupied(_) => return Err(SimError::DuplicateAddress(address)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
            }
        }
        tracing::info!(%address, x, y, rate, clock_offset, "Node registered");
        Ok(NodeContext::new(
            address,
            self.clone(),
            clock_offset,
            inbox_rx,
            stop_rx,
        ))
    }

    /// Replaces the link from `from` to `to` with one of the given latency and rate, starting full.
    pub fn configure_link(
        &self,
        from: &Address,
        to: &Address,
        latency: SimTime,
        rate: f64,
    ) -> Result<(), SimError> {
        if from == to {
            return Err(SimError::LinkingSelf(from.clone()));
        }
        check_rate(rate)?;
        if !latency.is_finite() || latency < 0.0 {
            return Err(SimError::InvalidLatency(latency));
        }
        let link = Arc::new(Link::new(latency, rate, self.time()));
        self.inner.links.insert((from.clone(), to.clone()), link);
        tracing::debug!(%from, %to, latency, rate, "Link configured");
        Ok(())
    }

    fn node(&self, address: &Address) -> Option<Arc<NodeEntry>> {
        self.inner
            .nodes
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn link(&self, from: &Address, to: &Address) -> Arc<Link> {
        let key = (from.clone(), to.clone());
        if let Some(link) = self.inner.links.get(&key) {
            return Arc::clone(link.value());
        }
        let config = &self.inner.config;
        let latency = self.distance(from, to) * config.latency_per_distance
            + self.inner.rng.gen_up_to(config.max_random_latency);
        let link = Link::new(latency, config.default_link_rate, self.time());
        tracing::debug!(%from, %to, latency, "Default link created");
        let entry = self.inner.links.entry(key).or_insert(Arc::new(link));
        Arc::clone(entry.value())
    }

    /// Submits `payload` for delivery from `from` to `to`.
    ///
    /// Nothing is queued unless both endpoints are registered and running.
    pub fn send(&self, from: &Address, to: &Address, payload: Bytes) {
        let (Some(source), Some(destination)) = (self.node(from), self.node(to)) else {
            tracing::debug!(%from, %to, "Send ignored: unknown endpoint");
            self.inner.stats.lock().messages_rejected += 1;
            return;
        };
        if source.is_stopped() || destination.is_stopped() {
            tracing::debug!(%from, %to, "Send ignored: endpoint stopped");
            self.inner.stats.lock().messages_rejected += 1;
            return;
        }

        let link = self.link(from, to);
        let dropped = self
            .inner
            .rng
            .gen_bool(self.inner.config.packet_drop_chance);
        let size = payload.len();

        let mut queue = self.inner.queue.lock();
        let sent_time = self.inner.clock.now();
        let link_done = sent_time + link.latency + link.bandwidth.reserve(size, sent_time);
        let node_done = sent_time + destination.bandwidth.reserve(size, sent_time);
        let arrival_time = link_done.max(node_done);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        tracing::trace!(
            %from,
            %to,
            size,
            sent_time,
            arrival_time,
            dropped,
            "Transmission scheduled"
        );
        queue.heap.push(Transmission::new(
            from.clone(),
            to.clone(),
            payload,
            sent_time,
            arrival_time,
            dropped,
            seq,
        ));
        drop(queue);

        self.inner.stats.lock().messages_sent += 1;
        self.inner.wake.notify_one();
    }

    /// Runs one delivery pass, returning how many payloads reached an inbox.
    pub fn deliver_due(&self) -> usize {
        let _pass = self.inner.delivery.lock();
        let due = {
            let mut queue = self.inner.queue.lock();
            let now = self.inner.clock.now();
            let mut due = Vec::new();
            while queue
                .heap
                .peek()
                .is_some_and(|transmission| transmission.arrival_time() <= now)
            {
                if let Some(transmission) = queue.heap.pop() {
                    due.push(transmission);
                }
            }
            due
        };
        due.into_iter()
            .map(|transmission| self.deliver(transmission))
            .filter(|delivered| *delivered)
            .count()
    }

    fn deliver(&self, transmission: Transmission) -> bool {
        let from = transmission.from();
        let to = transmission.to();
        if transmission.is_dropped() {
            tracing::trace!(%from, %to, "Message dropped: random loss");
            self.inner.stats.lock().messages_dropped += 1;
            return false;
        }
        let destination = match self.node(to) {
            Some(destination) if !destination.is_stopped() => destination,
            _ => {
                tracing::trace!(%from, %to, "Message dropped: destination stopped");
                self.inner.stats.lock().messages_expired += 1;
                return false;
            }
        };
        let (sent_time, arrival_time) = (transmission.sent_time(), transmission.arrival_time());
        let (from, to, payload) = transmission.into_parts();
        let envelope = Envelope::new(from, to, payload, sent_time, arrival_time);
        if destination.inbox.send(envelope).is_err() {
            tracing::trace!("Message dropped: destination inbox closed");
            self.inner.stats.lock().messages_expired += 1;
            return false;
        }
        self.inner.stats.lock().messages_delivered += 1;
        true
    }

    fn next_wait(&self) -> Duration {
        let idle = self.inner.config.idle_wait();
        let next_arrival = self
            .inner
            .queue
            .lock()
            .heap
            .peek()
            .map(Transmission::arrival_time);
        next_arrival
            .and_then(|arrival| self.inner.clock.base_duration_until(arrival))
            .map_or(idle, |until| until.min(idle))
    }

    async fn run_delivery(self) {
        let mut stopped = self.inner.stopped.subscribe();
        tracing::debug!("Delivery loop started");
        while !self.is_stopped() {
            self.deliver_due();
            let wait = self.next_wait();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.inner.wake.notified() => {}
                _ = stopped.changed() => {}
            }
        }
        tracing::debug!("Delivery loop stopped");
    }

    /// Stops every node and the delivery loop. Idempotent.
    pub fn stop(&self) {
        for entry in self.inner.nodes.iter() {
            entry.value().stop.send_replace(true);
        }
        self.inner.stopped.send_replace(true);
        self.inner.wake.notify_one();
        tracing::debug!("Simulator stopped");
    }

    /// Stops a single node; unknown addresses are ignored.
    pub fn stop_node(&self, address: &Address) {
        if let Some(entry) = self.node(address) {
            if !entry.stop.send_replace(true) {
                tracing::info!(%address, "Node stopped");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Whether `address` is registered and not stopped.
    pub fn is_active(&self, address: &Address) -> bool {
        self.node(address).is_some_and(|entry| !entry.is_stopped())
    }

    /// Registered addresses in a stable order.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .inner
            .nodes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        addresses.sort();
        addresses
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Uniformly chosen registered address.
    pub fn random_node(&self) -> Option<Address> {
        self.inner.rng.choose(&self.addresses()).cloned()
    }

    /// Euclidean distance between two registered nodes, or [`UNKNOWN_DISTANCE`].
    pub fn distance(&self, from: &Address, to: &Address) -> f64 {
        match (self.node(from), self.node(to)) {
            (Some(a), Some(b)) => {
                let dx = f64::from(a.x) - f64::from(b.x);
                let dy = f64::from(a.y) - f64::from(b.y);
                (dx * dx + dy * dy).sqrt()
            }
            _ => UNKNOWN_DISTANCE,
        }
    }

    /// State of an existing link, replenished up to now.
    pub fn link_state(&self, from: &Address, to: &Address) -> Option<LinkState> {
        let link = self
            .inner
            .links
            .get(&(from.clone(), to.clone()))
            .map(|link| Arc::clone(link.value()))?;
        Some(LinkState {
            latency: link.latency,
            bandwidth: link.bandwidth.state_at(self.time()),
        })
    }

    /// Inbound bandwidth state of a node, replenished up to now.
    pub fn node_flow(&self, address: &Address) -> Option<BucketState> {
        let entry = self.node(address)?;
        Some(entry.bandwidth.state_at(self.time()))
    }

    pub fn clock_offset(&self, address: &Address) -> Option<SimTime> {
        self.node(address).map(|entry| entry.clock_offset)
    }

    /// Transmissions queued and not yet consumed.
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().heap.len()
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.stats.lock().clone()
    }
}

fn check_rate(rate: f64) -> Result<(), SimError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidRate(rate))
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("nodes", &self.inner.nodes.len())
            .field("links", &self.inner.links.len())
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}
