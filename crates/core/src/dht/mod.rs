//! Self-organizing distributed hash table overlay.
//!
//! Every [`HashNode`] owns the keys nearest to its position and keeps a small
//! tree of peers, denser around its own position, through which GET/PUT
//! requests are routed greedily. Peers are discovered by fanning a join request
//! out over the overlay: each node forwards the request to whichever of its
//! peers owns a part of the requested range, aggregates their answers and
//! hands the best candidates back.

use tokio::sync::watch;

use crate::config::HashNodeConfig;
use crate::message::DhtMessage;
use crate::node::{Address, Node, NodeContext};
use crate::ring::{Peer, Position};

mod peer_fan;
mod state;

pub use state::{HashNodeState, Outbound};

/// Overlay node actor.
pub struct HashNode {
    state: HashNodeState,
    bootstrap: Option<Address>,
    peers_tx: watch::Sender<Vec<Peer>>,
}

impl HashNode {
    /// Creates a node joining the overlay through `bootstrap`, or starting a new one.
    pub fn new(
        address: impl Into<Address>,
        position: Position,
        bootstrap: Option<Address>,
        config: HashNodeConfig,
    ) -> Self {
        let (peers_tx, _) = watch::channel(Vec::new());
        Self {
            state: HashNodeState::new(address, position, config.peer_depth),
            bootstrap,
            peers_tx,
        }
    }

    /// Observer of this node's peer list, usable after the node has been spawned.
    pub fn handle(&self) -> HashNodeHandle {
        HashNodeHandle {
            address: self.state.address().clone(),
            position: self.state.position(),
            peers: self.peers_tx.subscribe(),
        }
    }

    fn dispatch(&self, ctx: &NodeContext, outbound: Outbound) {
        match outbound.message.encode() {
            Ok(payload) => ctx.send(&outbound.to, payload),
            Err(err) => {
                tracing::warn!(
                    node = %self.state.address(),
                    to = %outbound.to,
                    %err,
                    "Failed encoding message"
                );
            }
        }
    }

    fn publish(&self, was_ready: bool) {
        let list = self.state.peer_list();
        self.peers_tx.send_if_modified(|current| {
            if current.as_slice() == list {
                false
            } else {
                *current = list.to_vec();
                true
            }
        });
        if !was_ready && self.state.is_ready() {
            tracing::info!(node = %self.state.address(), peers = list.len(), "Node ready");
        }
    }
}

impl Node for HashNode {
    fn address(&self) -> &Address {
        self.state.address()
    }

    async fn run(mut self, mut ctx: NodeContext) {
        match self.bootstrap.take() {
            Some(contact) => {
                tracing::info!(
                    node = %self.state.address(),
                    position = %self.state.position(),
                    %contact,
                    "Joining overlay"
                );
                let request = self.state.join_request();
                self.dispatch(&ctx, Outbound::new(contact, request));
            }
            None => {
                tracing::info!(
                    node = %self.state.address(),
                    position = %self.state.position(),
                    "Starting overlay"
                );
            }
        }

        while let Some(envelope) = ctx.recv().await {
            let message = match DhtMessage::decode(envelope.payload()) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(
                        node = %self.state.address(),
                        from = %envelope.from(),
                        %err,
                        "Undecodable payload"
                    );
                    continue;
                }
            };
            tracing::trace!(
                node = %self.state.address(),
                from = %envelope.from(),
                %message,
                "Handling message"
            );
            let was_ready = self.state.is_ready();
            for outbound in self.state.handle(envelope.from(), message) {
                self.dispatch(&ctx, outbound);
            }
            self.publish(was_ready);
        }
        tracing::debug!(node = %self.state.address(), "Node loop finished");
    }
}

/// Read-only view on a running [`HashNode`].
#[derive(Clone, Debug)]
pub struct HashNodeHandle {
    address: Address,
    position: Position,
    peers: watch::Receiver<Vec<Peer>>,
}

impl HashNodeHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_ready(&self) -> bool {
        !self.peers.borrow().is_empty()
    }

    pub fn peer_list(&self) -> Vec<Peer> {
        self.peers.borrow().clone()
    }

    /// Waits until the node knows at least one peer; false if the node went away first.
    pub async fn ready(&mut self) -> bool {
        self.peers.wait_for(|peers| !peers.is_empty()).await.is_ok()
    }
}
