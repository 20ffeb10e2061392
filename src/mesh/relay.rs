//! Bridges the local settings bus and cluster gossip.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::cluster::{Cluster, PeerSettings};
use crate::ratelimit::{EventOrigin, Settings, SettingsBus, SettingsEvent};

/// Forwards local saves into gossip and peers' newer settings onto the bus.
pub struct SettingsRelay {
    cluster: Arc<Cluster>,
    bus: SettingsBus,
    poll_interval: Duration,
    /// Highest settings version seen from any source
    known_version: u64,
}

impl SettingsRelay {
    pub fn new(cluster: Arc<Cluster>, bus: SettingsBus, poll_interval: Duration) -> Self {
        Self {
            cluster,
            bus,
            poll_interval,
            known_version: 0,
        }
    }

    /// Advertise `current` and relay changes.
    ///
    /// The relay holds its own bus handle, so the bus never closes under it;
    /// the loop runs until the spawned task is aborted or the runtime stops.
    pub async fn run(mut self, current: Settings, mut receiver: broadcast::Receiver<SettingsEvent>) {
        self.known_version = current.version;
        self.advertise(&current).await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(node_id = %self.cluster.node_id(), version = current.version, "Settings relay started");

        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Ok(SettingsEvent { origin: EventOrigin::Local, settings }) => {
                        self.known_version = self.known_version.max(settings.version);
                        self.advertise(&settings).await;
                    }
                    Ok(SettingsEvent { settings, .. }) => {
                        self.known_version = self.known_version.max(settings.version);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Settings relay lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    let peers = self.cluster.peer_settings().await;
                    if let Some(event) = self.newest_from(peers) {
                        self.bus.publish(event);
                    }
                }
            }
        }
        debug!("Settings relay stopped");
    }

    async fn advertise(&self, settings: &Settings) {
        if let Err(e) = self.cluster.publish_settings(settings).await {
            warn!(error = %e, "Failed to advertise settings");
        }
    }

    /// Pick the newest peer settings not yet seen, if any.
    fn newest_from(&mut self, peers: Vec<PeerSettings>) -> Option<SettingsEvent> {
        let mut newest: Option<(String, Settings)> = None;

        for peer in peers {
            let settings: Settings = match serde_json::from_str(&peer.raw) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(peer = %peer.node_id, error = %e, "Ignoring unreadable peer settings");
                    continue;
                }
            };

            let best = newest.as_ref().map_or(self.known_version, |(_, s)| s.version);
            if settings.version > best {
                newest = Some((peer.node_id, settings));
            }
        }

        let (node_id, settings) = newest?;
        info!(peer = %node_id, version = settings.version, "Received newer settings from peer");
        self.known_version = settings.version;
        Some(SettingsEvent {
            origin: EventOrigin::Peer(node_id),
            settings,
        })
    }
}
