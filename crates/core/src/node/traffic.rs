use std::{collections::HashMap, time::Duration};

use super::{Address, Node, NodeContext};
use crate::simulation::SimTime;

/// Targets silent for this many send intervals are forgotten.
const SILENCE_FACTOR: f64 = 30.0;
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Load generator cycling fixed-size packets through a list of targets.
///
/// Every node it hears from becomes a target too, so two traffic nodes that
/// know about each other keep a link busy in both directions.
pub struct TrafficNode {
    address: Address,
    targets: Vec<Address>,
    last_heard: HashMap<Address, SimTime>,
    wait: SimTime,
    size: usize,
    next: usize,
    last_send: SimTime,
}

impl TrafficNode {
    /// Sends `size` bytes to the next target every `wait` units of node time.
    pub fn new(
        address: impl Into<Address>,
        targets: Vec<Address>,
        wait: SimTime,
        size: usize,
    ) -> Self {
        Self {
            address: address.into(),
            targets,
            last_heard: HashMap::new(),
            wait,
            size,
            next: 0,
            last_send: 0.0,
        }
    }

    pub fn targets(&self) -> &[Address] {
        &self.targets
    }

    /// Target due for a packet at `now`, if the send interval has elapsed.
    fn tick(&mut self, now: SimTime) -> Option<Address> {
        if now - self.last_send <= self.wait {
            return None;
        }
        self.last_send = now;

        let silence = self.wait * SILENCE_FACTOR;
        let last_heard = &mut self.last_heard;
        self.targets.retain(|target| {
            let heard = *last_heard.entry(target.clone()).or_insert(now);
            let keep = now - heard <= silence;
            if !keep {
                tracing::debug!(%target, "Dropping silent target");
            }
            keep
        });
        if self.targets.is_empty() {
            return None;
        }
        if self.next >= self.targets.len() {
            self.next = 0;
        }
        let target = self.targets[self.next].clone();
        self.next += 1;
        Some(target)
    }

    fn observe(&mut self, from: &Address, now: SimTime) {
        if !self.targets.contains(from) {
            self.targets.push(from.clone());
        }
        self.last_heard.insert(from.clone(), now);
    }
}

impl Node for TrafficNode {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn run(mut self, mut ctx: NodeContext) {
        while !ctx.is_stopped() {
            if let Some(target) = self.tick(ctx.time()) {
                ctx.send(&target, vec![0u8; self.size]);
            }
            while let Some(envelope) = ctx.try_recv() {
                self.observe(envelope.from(), ctx.time());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        tracing::debug!(address = %self.address, "Traffic node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_targets_once_per_interval() {
        let mut node = TrafficNode::new("t", vec!["a".into(), "b".into()], 1.0, 8);
        assert_eq!(node.tick(0.5), None);
        assert_eq!(node.tick(1.5), Some("a".into()));
        assert_eq!(node.tick(2.0), None);
        assert_eq!(node.tick(2.6), Some("b".into()));
        assert_eq!(node.tick(3.7), Some("a".into()));
    }

    #[test]
    fn forgets_silent_targets_and_learns_senders() {
        let mut node = TrafficNode::new("t", vec!["a".into(), "b".into()], 1.0, 8);
        assert_eq!(node.tick(2.0), Some("a".into()));
        node.observe(&"b".into(), 20.0);
        node.observe(&"c".into(), 20.0);
        assert_eq!(node.targets().len(), 3);

        // "a" was first considered at 2.0 and never answered
        assert_eq!(node.tick(40.0), Some("c".into()));
        let expected = vec![Address::from("b"), Address::from("c")];
        assert_eq!(node.targets(), &expected[..]);
    }
}
