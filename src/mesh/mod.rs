//! Peer mesh networking module using Chitchat.
//!
//! Instances of the detector never share request counts. They only gossip
//! their route settings so that a save on one node replaces the rules on
//! every other node.

mod cluster;
mod relay;

pub use cluster::{Cluster, ClusterConfig, ClusterError, PeerSettings, SETTINGS_KEY};
pub use relay::SettingsRelay;
