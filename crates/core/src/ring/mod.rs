//! Keyspace positions and overlay peer selection.
//!
//! Every overlay node sits at a [`Position`] in [0, 1); keys hash onto the same
//! space and are owned by whichever node is nearest to them.

use std::fmt::Display;

use crate::node::Address;

pub mod peers;
mod position;

pub use position::Position;

/// A known overlay node and where it sits in the keyspace.
///
/// Peers are identified by address only; the position is carried along for
/// routing decisions.
#[derive(Clone, Debug)]
pub struct Peer {
    pub address: Address,
    pub position: Position,
}

impl Peer {
    pub fn new(address: impl Into<Address>, position: Position) -> Self {
        Self {
            address: address.into(),
            position,
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Peer {}

impl std::hash::Hash for Peer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.address, self.position)
    }
}
