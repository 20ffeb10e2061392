//! Cluster management using Chitchat.
//!
//! This module wraps the chitchat library to provide cluster membership,
//! failure detection, and gossip of each node's current route settings.

use std::net::SocketAddr;
use std::time::Duration;

use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::MeshConfig;
use crate::ratelimit::Settings;

/// Key under which every node gossips its settings document.
pub const SETTINGS_KEY: &str = "settings";

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to start cluster: {0}")]
    StartError(String),
    #[error("Failed to shut down cluster: {0}")]
    ShutdownError(String),
    #[error("Failed to encode settings: {0}")]
    EncodeError(#[from] serde_json::Error),
}

/// Configuration for the cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Unique node identifier.
    pub node_id: String,
    /// The address to listen on for gossip.
    pub listen_addr: SocketAddr,
    /// The address to advertise to other nodes.
    pub advertise_addr: SocketAddr,
    /// Seed nodes to bootstrap cluster membership.
    pub seed_nodes: Vec<String>,
    /// Cluster identifier (nodes must have matching cluster IDs).
    pub cluster_id: String,
    /// How often to gossip with peers.
    pub gossip_interval: Duration,
    /// Grace period before considering a dead node's state deletable.
    pub dead_node_grace_period: Duration,
}

impl From<&MeshConfig> for ClusterConfig {
    fn from(mesh: &MeshConfig) -> Self {
        Self {
            node_id: mesh
                .node_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            listen_addr: mesh.listen_addr,
            advertise_addr: mesh.advertise_addr.unwrap_or(mesh.listen_addr),
            seed_nodes: mesh.seed_nodes.clone(),
            cluster_id: mesh.cluster_id.clone(),
            gossip_interval: Duration::from_millis(mesh.gossip_interval_ms),
            dead_node_grace_period: Duration::from_secs(3600),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::from(&MeshConfig::default())
    }
}

/// Settings document gossiped by one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSettings {
    pub node_id: String,
    pub raw: String,
}

/// The cluster handle used to share settings between instances.
pub struct Cluster {
    /// Our node ID.
    node_id: String,
    /// Chitchat handle.
    handle: ChitchatHandle,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Cluster {
    /// Create and start a new cluster node.
    pub async fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        info!(
            node_id = %config.node_id,
            listen_addr = %config.listen_addr,
            advertise_addr = %config.advertise_addr,
            seed_nodes = ?config.seed_nodes,
            cluster_id = %config.cluster_id,
            "Starting cluster node"
        );

        let chitchat_id = ChitchatId {
            node_id: config.node_id.clone(),
            generation_id: 0,
            gossip_advertise_addr: config.advertise_addr,
        };

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval,
            listen_addr: config.listen_addr,
            seed_nodes: config.seed_nodes.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: config.gossip_interval,
                ..Default::default()
            },
            marked_for_deletion_grace_period: config.dead_node_grace_period,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let transport = UdpTransport;
        let handle = spawn_chitchat(chitchat_config, Vec::new(), &transport)
            .await
            .map_err(|e| ClusterError::StartError(e.to_string()))?;

        info!("Cluster node started successfully");

        Ok(Self {
            node_id: config.node_id,
            handle,
        })
    }

    /// Get our node ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Advertise our settings to the rest of the cluster.
    pub async fn publish_settings(&self, settings: &Settings) -> Result<(), ClusterError> {
        let encoded = serde_json::to_string(settings)?;
        let chitchat_arc = self.handle.chitchat();
        let mut chitchat = chitchat_arc.lock().await;
        chitchat.self_node_state().set(SETTINGS_KEY, encoded);

        debug!(version = settings.version, "Advertised settings");
        Ok(())
    }

    /// Collect the settings documents advertised by other live nodes.
    pub async fn peer_settings(&self) -> Vec<PeerSettings> {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;

        chitchat
            .live_nodes()
            .filter(|id| id.node_id != self.node_id)
            .filter_map(|id| {
                let raw = chitchat.node_state(id)?.get(SETTINGS_KEY)?;
                Some(PeerSettings {
                    node_id: id.node_id.clone(),
                    raw: raw.to_string(),
                })
            })
            .collect()
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        chitchat.live_nodes().count()
    }

    /// Shutdown the cluster node gracefully.
    pub async fn shutdown(self) -> Result<(), ClusterError> {
        info!(node_id = %self.node_id, "Shutting down cluster node");
        self.handle
            .shutdown()
            .await
            .map_err(|e| ClusterError::ShutdownError(format!("{:?}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RouteConfig;

    fn test_config(port: u16) -> ClusterConfig {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        ClusterConfig {
            node_id: format!("test-node-{}", port),
            listen_addr: addr,
            advertise_addr: addr,
            seed_nodes: Vec::new(),
            cluster_id: "test-cluster".to_string(),
            gossip_interval: Duration::from_millis(50),
            dead_node_grace_period: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_config_from_mesh() {
        let mesh = MeshConfig {
            node_id: Some("a".to_string()),
            ..MeshConfig::default()
        };
        let config = ClusterConfig::from(&mesh);
        assert_eq!(config.node_id, "a");
        assert_eq!(config.advertise_addr, mesh.listen_addr);
        assert_eq!(config.gossip_interval, Duration::from_millis(mesh.gossip_interval_ms));
    }

    #[test]
    fn test_default_config_generates_node_id() {
        let a = ClusterConfig::default();
        let b = ClusterConfig::default();
        assert_ne!(a.node_id, b.node_id);
    }

    #[tokio::test]
    async fn test_cluster_start() {
        let cluster = Cluster::start(test_config(17946)).await.unwrap();

        assert_eq!(cluster.node_id(), "test-node-17946");
        assert_eq!(cluster.live_node_count().await, 1); // Just ourselves
        assert!(cluster.peer_settings().await.is_empty());

        cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_gossip_between_two_nodes() {
        let cluster1 = Cluster::start(test_config(17948)).await.unwrap();

        let mut config2 = test_config(17949);
        config2.seed_nodes = vec!["127.0.0.1:17948".to_string()];
        let cluster2 = Cluster::start(config2).await.unwrap();

        let settings = Settings {
            version: 4,
            guest_only: false,
            routes: vec![RouteConfig::new("^/login", 3, 10, "login")],
        };
        cluster1.publish_settings(&settings).await.unwrap();

        // Give them time to discover each other and gossip
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(cluster2.live_node_count().await, 2);
        let peers = cluster2.peer_settings().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id, "test-node-17948");

        let received: Settings = serde_json::from_str(&peers[0].raw).unwrap();
        assert_eq!(received, settings);

        cluster1.shutdown().await.unwrap();
        cluster2.shutdown().await.unwrap();
    }
}
