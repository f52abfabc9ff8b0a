use std::cmp::Ordering;

use bytes::Bytes;
use ordered_float::OrderedFloat;

use super::time::SimTime;
use crate::node::Address;

/// A payload in flight between two nodes.
///
/// Created by a send with its arrival time already computed, and consumed
/// exactly once by the delivery loop when that time has passed.
#[derive(Debug)]
pub struct Transmission {
    from: Address,
    to: Address,
    payload: Bytes,
    sent_time: SimTime,
    arrival_time: SimTime,
    dropped: bool,
    seq: u64,
}

impl Transmission {
    pub(crate) fn new(
        from: Address,
        to: Address,
        payload: Bytes,
        sent_time: SimTime,
        arrival_time: SimTime,
        dropped: bool,
        seq: u64,
    ) -> Self {
        debug_assert!(arrival_time >= sent_time);
        Self {
            from,
            to,
            payload,
            sent_time,
            arrival_time,
            dropped,
            seq,
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

    pub fn sent_time(&self) -> SimTime {
        self.sent_time
    }

    pub fn arrival_time(&self) -> SimTime {
        self.arrival_time
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub(crate) fn into_parts(self) -> (Address, Address, Bytes) {
        (self.from, self.to, self.payload)
    }
}

impl PartialEq for Transmission {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Transmission {}

impl PartialOrd for Transmission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Transmission {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse ordering so the earliest arrival comes first
        // Ties broken by send order (smaller seq = sent earlier)
        match OrderedFloat(other.arrival_time).cmp(&OrderedFloat(self.arrival_time)) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn transmission(arrival: SimTime, seq: u64) -> Transmission {
        Transmission::new(
            "a".into(),
            "b".into(),
            Bytes::new(),
            0.0,
            arrival,
            false,
            seq,
        )
    }

    #[test]
    fn heap_pops_earliest_arrival_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(transmission(2.0, 0));
        heap.push(transmission(1.0, 1));
        heap.push(transmission(2.0, 2));
        heap.push(transmission(0.5, 3));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.seq)).collect();
        assert_eq!(order, vec![3, 1, 0, 2]);
    }
}
