//! Peer selection for the DHT overlay.
//!
//! A node keeps a *peer array* of `2 + 2·depth` slots. Each slot has a target
//! position; the lower half of the array covers the keyspace below the node's
//! own position, halving the distance to it at every step, and the upper half
//! mirrors it above. The two middle slots both target the node's own position,
//! so they end up holding its immediate neighbours.
//!
//! All functions here are pure so that they can be shared by the node state
//! machine and by the peer fan-out aggregation.

use super::{Peer, Position};

/// Slot count of a peer array for the given tree depth.
pub fn slot_count(depth: usize) -> usize {
    2 + 2 * depth
}

/// Tree depth that produced an array of `len` slots.
pub fn depth_of(len: usize) -> usize {
    len.saturating_sub(2) / 2
}

/// Target positions for every slot of a peer array centered on `center`.
pub fn peer_targets(center: Position, depth: usize) -> Vec<f32> {
    let c = center.as_f32();
    let len = slot_count(depth);
    let mut targets = vec![c; len];
    if depth == 0 {
        return targets;
    }
    targets[0] = c * 0.5;
    targets[len - 1] = (1.0 + c) * 0.5;
    for k in 1..depth {
        targets[k] = (targets[k - 1] + c) * 0.5;
        targets[len - 1 - k] = (targets[len - k] + c) * 0.5;
    }
    targets
}

/// Slot-wise merge of two peer arrays of the same length.
///
/// A slot filled in only one array is taken from it; when both are filled the
/// peer strictly closer to the slot target wins and ties keep the entry of `a`.
pub fn merge_peers(center: Position, a: &[Option<Peer>], b: &[Option<Peer>]) -> Vec<Option<Peer>> {
    debug_assert_eq!(a.len(), b.len(), "merging peer arrays of different depth");
    let targets = peer_targets(center, depth_of(a.len()));
    a.iter()
        .zip(b)
        .zip(targets)
        .map(|((left, right), target)| match (left, right) {
            (Some(l), Some(r)) => {
                if (r.position.as_f32() - target).abs() < (l.position.as_f32() - target).abs() {
                    Some(r.clone())
                } else {
                    Some(l.clone())
                }
            }
            (Some(l), None) => Some(l.clone()),
            (None, r) => r.clone(),
        })
        .collect()
}

/// Peer array, centered on `center`, in which `peer` is the only candidate.
///
/// The peer fills every slot on its side of the center, and no slot at all when
/// it sits exactly on the center.
pub fn nominate(center: Position, peer: &Peer, depth: usize) -> Vec<Option<Peer>> {
    let len = slot_count(depth);
    let half = len / 2;
    let mut array = vec![None; len];
    let slots = if peer.position < center {
        0..half
    } else if peer.position > center {
        half..len
    } else {
        0..0
    };
    for slot in &mut array[slots] {
        *slot = Some(peer.clone());
    }
    array
}

/// Projection of a peer array without empty slots or consecutive repeats, in array order.
pub fn peer_list(array: &[Option<Peer>]) -> Vec<Peer> {
    let mut list: Vec<Peer> = Vec::with_capacity(array.len());
    for peer in array.iter().flatten() {
        if list.last() != Some(peer) {
            list.push(peer.clone());
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, position: f32) -> Peer {
        Peer::new(name, Position::new(position))
    }

    #[test]
    fn targets_halve_towards_center() {
        assert_eq!(
            peer_targets(Position::new(0.5), 2),
            vec![0.25, 0.375, 0.5, 0.5, 0.625, 0.75]
        );
        assert_eq!(peer_targets(Position::new(0.0), 1), vec![0.0, 0.0, 0.0, 0.5]);
        assert_eq!(peer_targets(Position::new(0.4), 0), vec![0.4, 0.4]);
    }

    #[test]
    fn nomination_fills_one_side() {
        let center = Position::new(0.5);
        let low = nominate(center, &peer("low", 0.2), 2);
        assert!(low[..3].iter().all(|p| p.as_ref().is_some_and(|p| p.address.as_str() == "low")));
        assert!(low[3..].iter().all(Option::is_none));

        let high = nominate(center, &peer("high", 0.7), 2);
        assert!(high[..3].iter().all(Option::is_none));
        assert!(high[3..].iter().all(Option::is_some));

        assert!(nominate(center, &peer("same", 0.5), 2)
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn merge_keeps_closest_per_slot() {
        let center = Position::new(0.5);
        let a = nominate(center, &peer("far", 0.0), 2);
        let b = nominate(center, &peer("near", 0.45), 2);
        let merged = merge_peers(center, &a, &b);
        let names: Vec<_> = merged
            .iter()
            .map(|p| p.as_ref().map(|p| p.address.as_str()))
            .collect();
        // targets: 0.25, 0.375, 0.5 on the low side
        assert_eq!(
            names,
            vec![Some("near"), Some("near"), Some("near"), None, None, None]
        );

        let c = nominate(center, &peer("mid", 0.2), 2);
        let merged = merge_peers(center, &merged, &c);
        assert_eq!(merged[0].as_ref().unwrap().address.as_str(), "mid");
        assert_eq!(merged[1].as_ref().unwrap().address.as_str(), "near");
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        let center = Position::new(0.5);
        let depth = 3;
        let candidates = [
            peer("a", 0.1),
            peer("b", 0.33),
            peer("c", 0.49),
            peer("d", 0.52),
            peer("e", 0.8),
        ];
        let arrays: Vec<_> = candidates
            .iter()
            .map(|p| nominate(center, p, depth))
            .collect();
        let left = arrays[..3]
            .iter()
            .fold(vec![None; slot_count(depth)], |acc, arr| merge_peers(center, &acc, arr));
        let right = arrays[2..]
            .iter()
            .fold(vec![None; slot_count(depth)], |acc, arr| merge_peers(center, &acc, arr));

        assert_eq!(merge_peers(center, &left, &left), left);
        assert_eq!(merge_peers(center, &left, &right), merge_peers(center, &right, &left));
    }

    #[test]
    fn peer_list_drops_empty_and_repeated_slots() {
        let a = peer("a", 0.1);
        let b = peer("b", 0.6);
        let array = vec![
            Some(a.clone()),
            Some(a.clone()),
            None,
            Some(b.clone()),
            Some(b.clone()),
            Some(a.clone()),
        ];
        let list = peer_list(&array);
        assert_eq!(list, vec![a.clone(), b, a]);
        for pair in list.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert!(peer_list(&[None, None]).is_empty());
    }
}
