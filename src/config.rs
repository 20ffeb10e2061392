//! Configuration management for Floodgate.
//!
//! Values come from an optional configuration file, overridden by
//! `FLOODGATE__`-prefixed environment variables such as
//! `FLOODGATE__SERVER__LISTEN_ADDR=0.0.0.0:8080`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{FloodgateError, Result};

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission middleware configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Settings persistence configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Settings gossip configuration
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Guarded public listener
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Settings administration listener
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// How requests are identified and how stale client windows are reclaimed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Take the client identity from the first `X-Forwarded-For` entry
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Header set by a trusted upstream for authenticated requests
    #[serde(default)]
    pub principal_header: Option<String>,

    /// Interval of the expired-window sweep; 0 leaves eviction to traffic
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

/// Settings persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding saved settings; kept in memory when unset
    pub settings_path: Option<PathBuf>,

    /// YAML file used instead of the built-in rules on first start
    pub seed_path: Option<PathBuf>,
}

/// Settings gossip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Node identifier; a random UUID when unset
    #[serde(default)]
    pub node_id: Option<String>,

    #[serde(default = "default_gossip_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,

    #[serde(default)]
    pub seed_nodes: Vec<String>,

    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            listen_addr: default_gossip_addr(),
            advertise_addr: None,
            seed_nodes: Vec::new(),
            cluster_id: default_cluster_id(),
            gossip_interval_ms: default_gossip_interval(),
        }
    }
}

fn default_gossip_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_cluster_id() -> String {
    "floodgate".to_string()
}

fn default_gossip_interval() -> u64 {
    500
}

impl FloodgateConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("FLOODGATE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mesh.seed_nodes"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FloodgateError::Config(e.to_string()))
    }
}
