//! Configuration for quorate nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Consensus settings
    #[serde(default)]
    pub raft: RaftSettings,

    /// Operator HTTP API settings
    #[serde(default)]
    pub http: HttpSettings,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raft: RaftSettings::default(),
            http: HttpSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then `QUORATE__*`
    /// environment overrides (e.g. `QUORATE__RAFT__BIND=10.0.0.1:10008`).
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("QUORATE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("raft.nodes")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.raft.validate()
    }
}

/// Consensus settings: who we are, who our peers are, where the log lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftSettings {
    /// Local bind address for the raft peer transport; also this node's identity
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Peer addresses (may include this node)
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Port appended to addresses that carry none (0 disables)
    #[serde(default = "default_raft_port")]
    pub default_port: u16,

    /// Directory holding the raft log and snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Engine tick period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Ticks without a heartbeat before an election starts
    #[serde(default = "default_election_tick")]
    pub election_tick: usize,

    /// Ticks between leader heartbeats
    #[serde(default = "default_heartbeat_tick")]
    pub heartbeat_tick: usize,

    /// Applied entries between log compactions
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,
}

fn default_bind() -> String {
    format!("127.0.0.1:{}", default_raft_port())
}
fn default_raft_port() -> u16 {
    10008
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./raft-data")
}
fn default_tick_interval() -> u64 {
    100
}
fn default_election_tick() -> usize {
    10
}
fn default_heartbeat_tick() -> usize {
    3
}
fn default_snapshot_threshold() -> u64 {
    10_000
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            nodes: Vec::new(),
            default_port: default_raft_port(),
            data_dir: default_data_dir(),
            tick_interval_ms: default_tick_interval(),
            election_tick: default_election_tick(),
            heartbeat_tick: default_heartbeat_tick(),
            snapshot_threshold: default_snapshot_threshold(),
        }
    }
}

impl RaftSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.bind.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("raft bind address is empty".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::InvalidConfig("raft data_dir is empty".into()));
        }
        if self.tick_interval_ms == 0 || self.heartbeat_tick == 0 {
            return Err(crate::Error::InvalidConfig(
                "tick_interval_ms and heartbeat_tick must be positive".into(),
            ));
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(crate::Error::InvalidConfig(format!(
                "election_tick ({}) must exceed heartbeat_tick ({})",
                self.election_tick, self.heartbeat_tick
            )));
        }
        Ok(())
    }
}

/// Operator HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Listen address for the operator API
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upper bound a write request waits for commit
    #[serde(default = "default_proposal_timeout")]
    pub proposal_timeout_ms: u64,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8111))
}
fn default_proposal_timeout() -> u64 {
    5_000
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            proposal_timeout_ms: default_proposal_timeout(),
        }
    }
}

impl HttpSettings {
    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }
}
