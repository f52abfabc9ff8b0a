//! Protocol state of one overlay node.
//!
//! [`HashNodeState`] is a synchronous state machine: it consumes one decoded
//! message at a time and returns the messages to send in reaction, leaving all
//! I/O to its caller. The actor in [`super::HashNode`] drives it from the
//! node's inbox; tests drive it directly.

use std::collections::{hash_map::Entry, HashMap};

use super::peer_fan::PeerFan;
use crate::message::DhtMessage;
use crate::node::Address;
use crate::ring::{peers, Peer, Position};

/// A message the state machine wants sent.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub to: Address,
    pub message: DhtMessage,
}

impl Outbound {
    pub fn new(to: Address, message: DhtMessage) -> Self {
        Self { to, message }
    }
}

#[derive(Debug)]
pub struct HashNodeState {
    me: Peer,
    depth: usize,
    peers: Vec<Option<Peer>>,
    peer_list: Vec<Peer>,
    table: HashMap<String, String>,
    /// Requesters waiting on an upstream answer, per key.
    pending_requests: HashMap<String, Vec<Address>>,
    /// Outstanding fan-outs, by the request id used for their sub-requests.
    pending_peer_requests: HashMap<i32, PeerFan>,
    next_request_id: i32,
}

impl HashNodeState {
    pub fn new(address: impl Into<Address>, position: Position, depth: usize) -> Self {
        Self {
            me: Peer::new(address, position),
            depth,
            peers: vec![None; peers::slot_count(depth)],
            peer_list: Vec::new(),
            table: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_peer_requests: HashMap::new(),
            next_request_id: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.me.address
    }

    pub fn position(&self) -> Position {
        self.me.position
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A node is ready once it knows at least one peer.
    pub fn is_ready(&self) -> bool {
        !self.peer_list.is_empty()
    }

    pub fn peers(&self) -> &[Option<Peer>] {
        &self.peers
    }

    pub fn peer_list(&self) -> &[Peer] {
        &self.peer_list
    }

    /// Value stored locally for `key`.
    pub fn stored(&self, key: &str) -> Option<&str> {
        self.table.get(key).map(String::as_str)
    }

    pub fn stored_count(&self) -> usize {
        self.table.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn pending_fan_count(&self) -> usize {
        self.pending_peer_requests.len()
    }

    fn take_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Discovery request a joining node sends to its bootstrap contact.
    ///
    /// Its answer is not tracked by any fan-out: it is recognized by carrying
    /// this node's own position as target.
    pub fn join_request(&mut self) -> DhtMessage {
        DhtMessage::PeerRequest {
            requester: self.me.clone(),
            range_min: 0.0,
            range_max: 1.0,
            request_id: self.take_request_id(),
        }
    }

    /// Peer nearest to `target`, or `None` when this node is at least as close as all of them.
    pub fn nearest_peer(&self, target: Position) -> Option<&Peer> {
        let mut best = None;
        let mut best_distance = self.me.position.distance(target);
        for peer in &self.peer_list {
            let distance = peer.position.distance(target);
            if distance < best_distance {
                best = Some(peer);
                best_distance = distance;
            }
        }
        best
    }

    pub fn handle(&mut self, from: &Address, message: DhtMessage) -> Vec<Outbound> {
        match message {
            DhtMessage::Request { key } => self.on_request(from, key),
            DhtMessage::Response { key, value } => self.on_response(key, value),
            DhtMessage::StoreRequest { key, value } => self.on_store(key, value),
            DhtMessage::PeerRequest {
                requester,
                range_min,
                range_max,
                request_id,
            } => self.on_peer_request(from, requester, range_min, range_max, request_id),
            DhtMessage::PeerResponse {
                target,
                request_id,
                peers,
            } => self.on_peer_response(target, request_id, peers),
        }
    }

    fn on_request(&mut self, from: &Address, key: String) -> Vec<Outbound> {
        let Some(next_hop) = self.nearest_peer(Position::from_key(&key)).cloned() else {
            let value = self.table.get(&key).cloned().unwrap_or_default();
            tracing::debug!(
                node = %self.me.address,
                %key,
                requester = %from,
                "Answering request locally"
            );
            return vec![Outbound::new(from.clone(), DhtMessage::Response { key, value })];
        };
        match self.pending_requests.entry(key) {
            Entry::Occupied(mut waiting) => {
                tracing::debug!(
                    node = %self.me.address,
                    key = %waiting.key(),
                    requester = %from,
                    "Request already in flight"
                );
                waiting.get_mut().push(from.clone());
                Vec::new()
            }
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(vec![from.clone()]);
                tracing::debug!(
                    node = %self.me.address,
                    %key,
                    next_hop = %next_hop,
                    "Forwarding request"
                );
                vec![Outbound::new(next_hop.address, DhtMessage::Request { key })]
            }
        }
    }

    fn on_response(&mut self, key: String, value: String) -> Vec<Outbound> {
        let Some(requesters) = self.pending_requests.remove(&key) else {
            tracing::warn!(node = %self.me.address, %key, "Response without a pending request");
            return Vec::new();
        };
        requesters
            .into_iter()
            .map(|requester| {
                Outbound::new(
                    requester,
                    DhtMessage::Response {
                        key: key.clone(),
                        value: value.clone(),
                    },
                )
            })
            .collect()
    }

    fn on_store(&mut self, key: String, value: String) -> Vec<Outbound> {
        match self.nearest_peer(Position::from_key(&key)).cloned() {
            None => {
                tracing::debug!(node = %self.me.address, %key, "Storing locally");
                self.table.insert(key, value);
                Vec::new()
            }
            Some(next_hop) => {
                tracing::debug!(
                    node = %self.me.address,
                    %key,
                    next_hop = %next_hop,
                    "Forwarding store"
                );
                vec![Outbound::new(
                    next_hop.address,
                    DhtMessage::StoreRequest { key, value },
                )]
            }
        }
    }

    fn on_peer_request(
        &mut self,
        from: &Address,
        requester: Peer,
        range_min: f32,
        range_max: f32,
        request_id: i32,
    ) -> Vec<Outbound> {
        let own = self.me.position.as_f32();
        let fan_id = self.next_request_id;
        let mut outbound = Vec::new();

        for (k, peer) in self.peer_list.iter().enumerate() {
            let kpos = peer.position.as_f32();
            let mut kmin = match k {
                0 => 0.0,
                _ => (self.peer_list[k - 1].position.as_f32() + kpos) * 0.5,
            };
            let mut kmax = match self.peer_list.get(k + 1) {
                Some(next) => (next.position.as_f32() + kpos) * 0.5,
                None => 1.0,
            };
            // the region between this node and the peer's midpoint is ours
            if kpos < own {
                kmax = kmax.min((own + kpos) * 0.5);
            } else {
                kmin = kmin.max((own + kpos) * 0.5);
            }
            let kmin = kmin.max(range_min);
            let kmax = kmax.min(range_max);
            if kmax > kmin {
                outbound.push(Outbound::new(
                    peer.address.clone(),
                    DhtMessage::PeerRequest {
                        requester: requester.clone(),
                        range_min: kmin,
                        range_max: kmax,
                        request_id: fan_id,
                    },
                ));
            }
        }

        let nomination = peers::nominate(requester.position, &self.me, self.depth);
        if outbound.is_empty() {
            tracing::debug!(node = %self.me.address, %requester, "Answering peer request directly");
            outbound.push(Outbound::new(
                from.clone(),
                DhtMessage::PeerResponse {
                    target: requester.position,
                    request_id,
                    peers: nomination,
                },
            ));
        } else {
            tracing::debug!(
                node = %self.me.address,
                %requester,
                fan_id,
                sub_requests = outbound.len(),
                "Fanning out peer request"
            );
            let fan = PeerFan::new(
                from.clone(),
                requester.position,
                outbound.len(),
                request_id,
                nomination,
            );
            let taken = self.take_request_id();
            debug_assert_eq!(taken, fan_id);
            self.pending_peer_requests.insert(fan_id, fan);
        }

        // every peer request doubles as an announcement of its requester
        if requester.address != self.me.address {
            let announced = peers::nominate(self.me.position, &requester, self.depth);
            self.adopt(peers::merge_peers(self.me.position, &self.peers, &announced));
        }
        outbound
    }

    fn on_peer_response(
        &mut self,
        target: Position,
        request_id: i32,
        candidates: Vec<Option<Peer>>,
    ) -> Vec<Outbound> {
        if candidates.len() != self.peers.len() {
            tracing::warn!(
                node = %self.me.address,
                slots = candidates.len(),
                expected = self.peers.len(),
                "Peer response with a foreign tree depth"
            );
            return Vec::new();
        }

        let Some(fan) = self.pending_peer_requests.get_mut(&request_id) else {
            if target == self.me.position {
                tracing::debug!(node = %self.me.address, "Adopting peers from join response");
                self.adopt(candidates);
            } else {
                tracing::warn!(
                    node = %self.me.address,
                    request_id,
                    %target,
                    "Uncorrelated peer response"
                );
            }
            return Vec::new();
        };
        if !fan.absorb(&candidates) {
            return Vec::new();
        }
        match self.pending_peer_requests.remove(&request_id) {
            Some(fan) => {
                let (to, response) = fan.into_response();
                vec![Outbound::new(to, response)]
            }
            None => Vec::new(),
        }
    }

    /// Replaces the peer array; this node never keeps itself as a peer.
    fn adopt(&mut self, peers: Vec<Option<Peer>>) {
        self.peers = peers
            .into_iter()
            .map(|slot| slot.filter(|peer| peer.address != self.me.address))
            .collect();
        self.peer_list = peers::peer_list(&self.peers);
    }
}
