use crate::message::DhtMessage;
use crate::node::Address;
use crate::ring::{peers, Peer, Position};

/// Aggregation state of one fanned-out peer request.
///
/// Lives from the moment a node forwards re-scoped sub-requests to its peers
/// until every one of them has answered.
#[derive(Debug)]
pub(crate) struct PeerFan {
    /// Node the aggregated answer goes back to.
    origin: Address,
    /// Position of the node looking for peers.
    target: Position,
    expected: usize,
    received: usize,
    best: Vec<Option<Peer>>,
    /// Request id the origin used, echoed back in the answer.
    respond_to: i32,
}

impl PeerFan {
    pub fn new(
        origin: Address,
        target: Position,
        expected: usize,
        respond_to: i32,
        initial: Vec<Option<Peer>>,
    ) -> Self {
        debug_assert!(expected > 0);
        Self {
            origin,
            target,
            expected,
            received: 0,
            best: initial,
            respond_to,
        }
    }

    /// Folds one sub-response into the best candidates; true once all have arrived.
    pub fn absorb(&mut self, candidates: &[Option<Peer>]) -> bool {
        self.best = peers::merge_peers(self.target, &self.best, candidates);
        self.received += 1;
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected.saturating_sub(self.received)
    }

    /// The aggregated answer and who it is for.
    pub fn into_response(self) -> (Address, DhtMessage) {
        (
            self.origin,
            DhtMessage::PeerResponse {
                target: self.target,
                request_id: self.respond_to,
                peers: self.best,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_expected_responses() {
        let target = Position::new(0.5);
        let own = Peer::new("self", Position::new(0.7));
        let mut fan = PeerFan::new("origin".into(), target, 2, 9, peers::nominate(target, &own, 1));
        assert_eq!(fan.remaining(), 2);

        let closer = Peer::new("closer", Position::new(0.6));
        assert!(!fan.absorb(&peers::nominate(target, &closer, 1)));
        let low = Peer::new("low", Position::new(0.2));
        assert!(fan.absorb(&peers::nominate(target, &low, 1)));

        let (to, response) = fan.into_response();
        assert_eq!(to, Address::from("origin"));
        let DhtMessage::PeerResponse {
            target: answered,
            request_id,
            peers,
        } = response
        else {
            panic!("expected a peer response");
        };
        assert_eq!(answered, target);
        assert_eq!(request_id, 9);
        // the far slot keeps the node that was already closer to its target
        assert_eq!(peers, vec![Some(low.clone()), Some(low), Some(closer), Some(own)]);
    }
}
