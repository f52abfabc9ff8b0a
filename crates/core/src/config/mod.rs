use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::node::ClientCommand;

/// Default tree depth of a HashNode peer array.
pub const DEFAULT_PEER_DEPTH: usize = 3;
/// Deepest peer tree whose arrays still fit the wire format comfortably.
pub const MAX_PEER_DEPTH: usize = 64;
/// Default number of overlay nodes started by the driver.
pub const DEFAULT_NODE_COUNT: usize = 30;
/// Inbound bandwidth given to every node started by the driver (bytes per network second).
pub const DEFAULT_NODE_RATE: f64 = 9_999_999.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("packet drop chance must be within [0, 1], got {0}")]
    DropChance(f64),
    #[error("{name} must be non-negative and finite, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("{name} must be positive and finite, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("peer depth must be within [1, {max}], got {0}", max = MAX_PEER_DEPTH)]
    PeerDepth(usize),
}

/// Parameters of the simulated network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Rate in bytes per network second of links not configured explicitly.
    pub default_link_rate: f64,
    /// Latency added per unit of distance between two nodes.
    pub latency_per_distance: f64,
    /// Links get an additional latency drawn uniformly up to this amount.
    pub max_random_latency: f64,
    /// Probability for any transmission to be lost.
    pub packet_drop_chance: f64,
    /// Node clocks may be off the network clock by up to this amount, either way.
    pub clock_desync: f64,
    /// Seed of every random decision taken by the network.
    pub seed: u64,
    /// Network seconds elapsed per wall-clock second.
    pub time_speed: f64,
    /// Upper bound, in wall-clock milliseconds, of the delivery loop's idle wait.
    pub idle_wait_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            default_link_rate: 99_999_999.0,
            latency_per_distance: 0.001,
            max_random_latency: 0.1,
            packet_drop_chance: 0.0,
            clock_desync: 0.0,
            seed: 12345,
            time_speed: 1.0,
            idle_wait_ms: 2,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.packet_drop_chance) {
            return Err(ConfigError::DropChance(self.packet_drop_chance));
        }
        if !self.default_link_rate.is_finite() || self.default_link_rate <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "default_link_rate",
                value: self.default_link_rate,
            });
        }
        for (name, value) in [
            ("latency_per_distance", self.latency_per_distance),
            ("max_random_latency", self.max_random_latency),
            ("clock_desync", self.clock_desync),
            ("time_speed", self.time_speed),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { name, value });
            }
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Parameters of the DHT overlay nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HashNodeConfig {
    /// Depth of the peer tree; a node keeps `2 + 2 * peer_depth` peer slots.
    pub peer_depth: usize,
}

impl Default for HashNodeConfig {
    fn default() -> Self {
        Self {
            peer_depth: DEFAULT_PEER_DEPTH,
        }
    }
}

impl HashNodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (1..=MAX_PEER_DEPTH).contains(&self.peer_depth) {
            Ok(())
        } else {
            Err(ConfigError::PeerDepth(self.peer_depth))
        }
    }
}

#[derive(clap::Parser, Debug, Clone, Default)]
#[command(name = "dhtsim", about = "Simulate a self-organizing DHT over a lossy network")]
pub struct ConfigArgs {
    /// Number of overlay nodes to start.
    #[arg(long, env = "DHTSIM_NODES")]
    pub nodes: Option<usize>,

    /// Seed of every random decision taken by the network.
    #[arg(long, env = "DHTSIM_SEED")]
    pub seed: Option<u64>,

    /// Network seconds elapsed per wall-clock second.
    #[arg(long, env = "DHTSIM_TIME_SPEED")]
    pub time_speed: Option<f64>,

    /// Probability for any transmission to be lost.
    #[arg(long, env = "DHTSIM_DROP_CHANCE")]
    pub drop_chance: Option<f64>,

    /// Depth of every node's peer tree.
    #[arg(long, env = "DHTSIM_PEER_DEPTH")]
    pub peer_depth: Option<usize>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,

    /// TOML file with `[simulator]` and `[hash_node]` tables; flags take precedence.
    #[arg(long, short, env = "DHTSIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Requests submitted once the overlay is up: `key` reads a key, `key>value` stores it.
    pub commands: Vec<ClientCommand>,
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub nodes: Option<usize>,
    #[serde(with = "serde_log_level_filter")]
    pub log_level: Option<LevelFilter>,
    pub simulator: SimulatorConfig,
    pub hash_node: HashNodeConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Fully resolved driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub nodes: usize,
    pub log_level: LevelFilter,
    pub simulator: SimulatorConfig,
    pub hash_node: HashNodeConfig,
    pub commands: Vec<ClientCommand>,
}

impl ConfigArgs {
    /// Merges the optional config file under the command line flags and validates the result.
    pub fn build(self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let mut simulator = file.simulator;
        if let Some(seed) = self.seed {
            simulator.seed = seed;
        }
        if let Some(speed) = self.time_speed {
            simulator.time_speed = speed;
        }
        if let Some(chance) = self.drop_chance {
            simulator.packet_drop_chance = chance;
        }
        simulator.validate()?;

        let mut hash_node = file.hash_node;
        if let Some(depth) = self.peer_depth {
            hash_node.peer_depth = depth;
        }
        hash_node.validate()?;

        Ok(Config {
            nodes: self.nodes.or(file.nodes).unwrap_or(DEFAULT_NODE_COUNT),
            log_level: self
                .log_level
                .or(file.log_level)
                .unwrap_or(LevelFilter::INFO),
            simulator,
            hash_node,
            commands: self.commands,
        })
    }
}

mod serde_log_level_filter {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S>(level: &Option<LevelFilter>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match level {
            Some(level) => serializer.collect_str(level),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<LevelFilter>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(level) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        level
            .trim()
            .parse::<LevelFilter>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("unknown log level: {level}")))
    }
}
