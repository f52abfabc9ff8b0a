use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::config::SimulatorConfig;
use crate::node::Address;

const FAST: f64 = 1e9;

fn quiet_config() -> SimulatorConfig {
    SimulatorConfig {
        max_random_latency: 0.0,
        ..Default::default()
    }
}

fn simulator(config: SimulatorConfig) -> (Simulator, VirtualTime) {
    let time = VirtualTime::new();
    let simulator = Simulator::with_time_source(config, time.clone()).unwrap();
    (simulator, time)
}

fn addr(name: &str) -> Address {
    name.into()
}

#[test]
fn arrivals_respect_latency_and_link_backlog() {
    let (sim, time) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 0.0, 0.0, FAST).unwrap();
    // 100 B/s with a 1000 byte burst
    sim.configure_link(&addr("a"), &addr("b"), 0.5, 100.0).unwrap();

    for _ in 0..3 {
        a.send(&addr("b"), vec![7u8; 600]);
    }
    assert_eq!(sim.pending_count(), 3);

    time.advance(Duration::from_secs(1));
    assert_eq!(sim.deliver_due(), 1);
    time.advance(Duration::from_secs(2));
    assert_eq!(sim.deliver_due(), 1);
    assert_eq!(sim.deliver_due(), 0);
    time.advance(Duration::from_secs(6));
    assert_eq!(sim.deliver_due(), 1);

    let arrivals: Vec<_> = std::iter::from_fn(|| b.try_recv())
        .map(|envelope| {
            assert_eq!(envelope.sent_time(), 0.0);
            assert!(envelope.arrival_time() >= envelope.sent_time() + 0.5);
            envelope.arrival_time()
        })
        .collect();
    assert_eq!(arrivals, vec![0.5, 2.5, 8.5]);
    assert_eq!(sim.stats().messages_delivered, 3);
}

#[test]
fn simultaneous_arrivals_keep_send_order() {
    let (sim, time) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 0.0, 0.0, FAST).unwrap();
    sim.configure_link(&addr("a"), &addr("b"), 0.25, FAST).unwrap();

    for payload in ["one", "two", "three"] {
        a.send(&addr("b"), payload);
    }
    time.advance(Duration::from_secs(1));
    assert_eq!(sim.deliver_due(), 3);

    let received: Vec<Bytes> = std::iter::from_fn(|| b.try_recv())
        .map(|envelope| envelope.into_payload())
        .collect();
    assert_eq!(received, vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]);
}

#[test]
fn node_bandwidth_delays_large_payloads() {
    let (sim, time) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 0.0, 0.0, 100.0).unwrap();
    sim.configure_link(&addr("a"), &addr("b"), 0.0, FAST).unwrap();

    a.send(&addr("b"), vec![0u8; 1_500]);
    time.advance(Duration::from_secs(4));
    assert_eq!(sim.deliver_due(), 0);
    time.advance(Duration::from_secs(1));
    assert_eq!(sim.deliver_due(), 1);
    assert_eq!(b.try_recv().map(|e| e.arrival_time()), Some(5.0));

    let flow = sim.node_flow(&addr("b")).unwrap();
    assert_eq!(flow.flow, 0.0);
    assert_eq!(flow.maximum_flow, 1_000.0);
}

#[test]
fn certain_loss_drops_everything() {
    let (sim, time) = simulator(SimulatorConfig {
        packet_drop_chance: 1.0,
        ..quiet_config()
    });
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 1.0, 1.0, FAST).unwrap();

    for _ in 0..5 {
        a.send(&addr("b"), "lost");
    }
    time.advance(Duration::from_secs(10));
    assert_eq!(sim.deliver_due(), 0);
    assert!(b.try_recv().is_none());

    let stats = sim.stats();
    assert_eq!(stats.messages_sent, 5);
    assert_eq!(stats.messages_dropped, 5);
    assert_eq!(stats.messages_delivered, 0);
    assert_eq!(sim.pending_count(), 0);
}

#[test]
fn stopping_a_node_discards_in_flight_payloads() {
    let (sim, time) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 0.0, 0.0, FAST).unwrap();
    sim.configure_link(&addr("a"), &addr("b"), 1.0, FAST).unwrap();

    a.send(&addr("b"), "first");
    time.advance(Duration::from_millis(1_500));
    assert_eq!(sim.deliver_due(), 1);

    a.send(&addr("b"), "second");
    b.stop();
    assert!(b.is_stopped());
    assert!(!sim.is_active(&addr("b")));
    time.advance(Duration::from_secs(2));
    assert_eq!(sim.deliver_due(), 0);
    assert_eq!(sim.stats().messages_expired, 1);

    // what arrived before the stop is still there
    assert_eq!(b.try_recv().map(|e| e.into_payload()), Some(Bytes::from("first")));
    assert!(b.try_recv().is_none());

    a.send(&addr("b"), "third");
    assert_eq!(sim.pending_count(), 0);
    assert_eq!(sim.stats().messages_rejected, 1);
}

#[test]
fn setup_errors_are_reported() {
    let (sim, _) = simulator(quiet_config());
    sim.register("a", 0.0, 0.0, FAST).unwrap();

    assert!(matches!(
        sim.register("a", 1.0, 1.0, FAST),
        Err(SimError::DuplicateAddress(address)) if address == addr("a")
    ));
    assert!(matches!(
        sim.register("b", 0.0, 0.0, 0.0),
        Err(SimError::InvalidRate(_))
    ));
    assert!(matches!(
        sim.configure_link(&addr("a"), &addr("a"), 0.1, FAST),
        Err(SimError::LinkingSelf(_))
    ));
    assert!(matches!(
        sim.configure_link(&addr("a"), &addr("c"), -0.1, FAST),
        Err(SimError::InvalidLatency(_))
    ));
    assert!(matches!(
        Simulator::new(SimulatorConfig {
            packet_drop_chance: -0.5,
            ..Default::default()
        }),
        Err(SimError::InvalidConfig(_))
    ));
    assert_eq!(sim.node_count(), 1);
}

#[test]
fn sends_to_unknown_nodes_are_ignored() {
    let (sim, _) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    a.send(&addr("ghost"), "hello?");
    sim.send(&addr("ghost"), &addr("a"), Bytes::from_static(b"boo"));

    assert_eq!(sim.pending_count(), 0);
    assert_eq!(sim.stats().messages_rejected, 2);
    assert_eq!(sim.distance(&addr("a"), &addr("ghost")), UNKNOWN_DISTANCE);
    assert!(sim.link_state(&addr("a"), &addr("ghost")).is_none());
}

#[test]
fn default_links_scale_with_distance() {
    let (sim, time) = simulator(SimulatorConfig {
        latency_per_distance: 0.01,
        ..quiet_config()
    });
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let mut b = sim.register("b", 30.0, 40.0, FAST).unwrap();
    assert_eq!(sim.distance(&addr("a"), &addr("b")), 50.0);
    assert!(sim.link_state(&addr("a"), &addr("b")).is_none());

    a.send(&addr("b"), "ping");
    let link = sim.link_state(&addr("a"), &addr("b")).unwrap();
    assert!((link.latency - 0.5).abs() < 1e-9);
    assert_eq!(link.bandwidth.refill_rate, sim.config().default_link_rate);
    // links are directed
    assert!(sim.link_state(&addr("b"), &addr("a")).is_none());

    time.advance(Duration::from_millis(400));
    assert_eq!(sim.deliver_due(), 0);
    time.advance(Duration::from_millis(200));
    assert_eq!(sim.deliver_due(), 1);
    assert!(b.try_recv().is_some());
}

#[test]
fn random_node_picks_registered_addresses() {
    let (sim, _) = simulator(quiet_config());
    assert!(sim.random_node().is_none());

    for name in ["c", "a", "b"] {
        sim.register(name, 0.0, 0.0, FAST).unwrap();
    }
    assert_eq!(sim.addresses(), vec![addr("a"), addr("b"), addr("c")]);
    for _ in 0..10 {
        let picked = sim.random_node().unwrap();
        assert!(sim.addresses().contains(&picked));
    }
}

#[test]
fn same_seed_replays_the_same_topology() {
    let config = SimulatorConfig {
        clock_desync: 0.5,
        ..Default::default()
    };
    let latencies = || {
        let (sim, _) = simulator(config.clone());
        let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
        sim.register("b", 10.0, 0.0, FAST).unwrap();
        a.send(&addr("b"), "x");
        (
            sim.link_state(&addr("a"), &addr("b")).unwrap().latency,
            sim.clock_offset(&addr("a")).unwrap(),
        )
    };
    assert_eq!(latencies(), latencies());
}

#[test]
fn node_clocks_are_skewed_by_their_offset() {
    let (sim, time) = simulator(SimulatorConfig {
        clock_desync: 0.5,
        ..quiet_config()
    });
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let offset = a.clock_offset();
    assert!((-0.5..0.5).contains(&offset));
    assert_eq!(sim.clock_offset(&addr("a")), Some(offset));

    time.advance(Duration::from_secs(3));
    assert_eq!(a.time(), sim.time() + offset);
}

#[test]
fn time_speed_scales_network_time() {
    let (sim, time) = simulator(SimulatorConfig {
        time_speed: 2.0,
        ..quiet_config()
    });
    time.advance(Duration::from_secs(1));
    assert_eq!(sim.time(), 2.0);

    sim.set_time_speed(0.0);
    time.advance(Duration::from_secs(5));
    assert_eq!(sim.time(), 2.0);
    assert_eq!(sim.time_speed(), 0.0);

    sim.set_time_speed(-3.0);
    assert_eq!(sim.time_speed(), 0.0);
    sim.set_time_speed(0.5);
    time.advance(Duration::from_secs(2));
    assert_eq!(sim.time(), 3.0);
}

#[test]
fn stopping_the_simulator_stops_every_node() {
    let (sim, _) = simulator(quiet_config());
    let a = sim.register("a", 0.0, 0.0, FAST).unwrap();
    let b = sim.register("b", 0.0, 0.0, FAST).unwrap();
    sim.stop();
    sim.stop();
    assert!(sim.is_stopped());
    assert!(a.is_stopped() && b.is_stopped());
    a.send(&addr("b"), "late");
    assert_eq!(sim.pending_count(), 0);
}
