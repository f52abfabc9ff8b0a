use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dhtsim::{
    config::{Config, ConfigArgs, DEFAULT_NODE_RATE},
    dht::{HashNode, HashNodeHandle},
    node::{ClientCommand, ClientNode},
    ring::Position,
    simulation::{SimulationRng, Simulator},
};

/// Nodes are scattered over a square of this side.
const AREA: f64 = 500.0;
/// Wall-clock time a joining node gets to become ready.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after a PUT so the value is stored before later commands look for it.
const PUT_SETTLE: Duration = Duration::from_secs(1);

fn random_point(rng: &SimulationRng) -> (f32, f32) {
    (
        (rng.gen_f64() * AREA) as f32,
        (rng.gen_f64() * AREA) as f32,
    )
}

async fn build_overlay(
    simulator: &Simulator,
    config: &Config,
    rng: &SimulationRng,
) -> anyhow::Result<Vec<HashNodeHandle>> {
    let mut handles: Vec<HashNodeHandle> = Vec::with_capacity(config.nodes);
    for index in 0..config.nodes {
        let bootstrap = rng.choose(&handles).map(|handle| handle.address().clone());
        // narrowing to f32 can round up to 1.0, which lies outside the keyspace
        let position = Position::new((rng.gen_f64() as f32).min(1.0 - f32::EPSILON / 2.0));
        let node = HashNode::new(format!("node-{index}"), position, bootstrap, config.hash_node);
        let mut handle = node.handle();
        let (x, y) = random_point(rng);
        simulator.add_node(node, x, y, DEFAULT_NODE_RATE)?;

        // the very first node has nobody to hear from until the second one joins
        if index > 0 {
            match tokio::time::timeout(JOIN_TIMEOUT, handle.ready()).await {
                Ok(true) => {}
                Ok(false) => anyhow::bail!("node {} stopped while joining", handle.address()),
                Err(_) => {
                    tracing::warn!(node = %handle.address(), "Node did not become ready in time")
                }
            }
        }
        handles.push(handle);
    }
    tracing::info!(nodes = handles.len(), time = simulator.time(), "Overlay built");
    Ok(handles)
}

async fn run_commands(
    simulator: &Simulator,
    config: &Config,
    rng: &SimulationRng,
    overlay: &[HashNodeHandle],
) -> anyhow::Result<()> {
    if config.commands.is_empty() {
        return Ok(());
    }
    let (x, y) = random_point(rng);
    let mut client = ClientNode::join(simulator, "client", x, y, DEFAULT_NODE_RATE)?;

    for command in &config.commands {
        let server = rng
            .choose(overlay)
            .map(|handle| handle.address().clone())
            .context("no overlay node to submit to")?;
        client.submit(&server, command)?;
        match command {
            ClientCommand::Put { .. } => {
                tracing::info!(%command, %server, "Stored");
                tokio::time::sleep(PUT_SETTLE).await;
            }
            ClientCommand::Get { .. } => {
                match tokio::time::timeout(RESPONSE_TIMEOUT, client.next_response()).await {
                    Ok(Some((key, value))) => tracing::info!(%key, %value, %server, "Response"),
                    Ok(None) => anyhow::bail!("client stopped while waiting for {command}"),
                    Err(_) => tracing::warn!(%command, %server, "No response in time"),
                }
            }
        }
    }
    client.stop();
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let simulator = Simulator::start(config.simulator.clone())?;
    let rng = SimulationRng::new(config.simulator.seed.wrapping_add(1));

    let overlay = build_overlay(&simulator, &config, &rng).await?;
    let result = run_commands(&simulator, &config, &rng, &overlay).await;

    let stats = simulator.stats();
    tracing::info!(
        sent = stats.messages_sent,
        delivered = stats.messages_delivered,
        dropped = stats.messages_dropped,
        "Simulation finished"
    );
    simulator.stop();
    result
}

fn main() -> anyhow::Result<()> {
    let config = ConfigArgs::parse().build()?;
    dhtsim::tracing::init_tracer(Some(config.log_level))?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(config))
}
