//! The overlay running as node tasks over the simulated network.
//!
//! Tests run on a paused tokio clock: whenever every task is idle, time jumps
//! to the next timer, so network latencies cost no wall-clock time.

use std::time::Duration;

use dhtsim::{
    config::{HashNodeConfig, SimulatorConfig, DEFAULT_NODE_RATE},
    dht::{HashNode, HashNodeHandle},
    node::{Address, ClientNode},
    ring::Position,
    simulation::Simulator,
};
use testresult::TestResult;
use tokio::{task::JoinHandle, time::timeout};

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Adds one node per position, each bootstrapping off the previous one once it is ready.
async fn build_overlay(
    simulator: &Simulator,
    positions: &[f32],
) -> (Vec<HashNodeHandle>, Vec<JoinHandle<()>>) {
    let mut handles: Vec<HashNodeHandle> = Vec::new();
    let mut tasks = Vec::new();
    for (index, position) in positions.iter().enumerate() {
        let bootstrap = handles.last().map(|handle| handle.address().clone());
        let node = HashNode::new(
            format!("n{index}"),
            Position::new(*position),
            bootstrap,
            HashNodeConfig::default(),
        );
        let mut handle = node.handle();
        let task = simulator
            .add_node(node, index as f32 * 10.0, 0.0, DEFAULT_NODE_RATE)
            .expect("fresh address");
        tasks.push(task);
        if index > 0 {
            let ready = timeout(JOIN_TIMEOUT, handle.ready())
                .await
                .expect("join timed out");
            assert!(ready, "n{index} went away");
        }
        handles.push(handle);
    }
    (handles, tasks)
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_nodes_join_one_after_another() -> TestResult {
    let simulator = Simulator::start(SimulatorConfig::default())?;
    let positions: [f32; 7] = [0.5, 0.2, 0.8, 0.35, 0.65, 0.05, 0.95];
    let (handles, tasks) = build_overlay(&simulator, &positions).await;

    for handle in &handles {
        assert!(handle.is_ready(), "{} has no peers", handle.address());
        assert!(handle
            .peer_list()
            .iter()
            .all(|peer| peer.address != *handle.address()));
    }
    assert_eq!(simulator.node_count(), positions.len());

    simulator.stop();
    for task in tasks {
        task.await?;
    }
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_values_stored_through_the_overlay_can_be_read_back() -> TestResult {
    let simulator = Simulator::start(SimulatorConfig::default())?;
    let (handles, _tasks) =
        build_overlay(&simulator, &[0.5, 0.25, 0.75, 0.125, 0.875, 0.375]).await;
    let entry = handles[3].address().clone();

    let mut first = ClientNode::join(&simulator, "client-1", 0.0, 50.0, DEFAULT_NODE_RATE)?;
    let mut second = ClientNode::join(&simulator, "client-2", 50.0, 50.0, DEFAULT_NODE_RATE)?;

    // garbage is logged and skipped by the node
    first.send(&entry, vec![42u8, 0, 0]);
    first.put(&entry, "x", "v1")?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    first.get(&entry, "x")?;
    second.get(&entry, "x")?;
    let expected = Some(("x".to_owned(), "v1".to_owned()));
    assert_eq!(timeout(Duration::from_secs(10), first.next_response()).await?, expected);
    assert_eq!(timeout(Duration::from_secs(10), second.next_response()).await?, expected);

    second.get(&entry, "never-stored")?;
    assert_eq!(
        timeout(Duration::from_secs(10), second.next_response()).await?,
        Some(("never-stored".to_owned(), String::new()))
    );

    simulator.stop();
    assert!(first.next_response().await.is_none());
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stopped_nodes_leave_their_task() -> TestResult {
    let simulator = Simulator::start(SimulatorConfig::default())?;
    let (handles, mut tasks) = build_overlay(&simulator, &[0.5, 0.25]).await;
    let leaving: Address = handles[1].address().clone();

    simulator.stop_node(&leaving);
    assert!(!simulator.is_active(&leaving));
    timeout(Duration::from_secs(1), tasks.remove(1)).await??;
    assert!(simulator.is_active(handles[0].address()));

    simulator.stop();
    Ok(())
}
