//! Settings lifecycle: load, save, broadcast and apply.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::limiter::{FloodDetector, Snapshot};
use super::rules::Settings;
use crate::error::Result;
use crate::store::SettingsStore;

/// Where a settings change came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOrigin {
    /// Saved on this instance
    Local,
    /// Received from another instance
    Peer(String),
}

/// A settings change travelling over the bus.
#[derive(Debug, Clone)]
pub struct SettingsEvent {
    pub origin: EventOrigin,
    pub settings: Settings,
}

/// In-process channel carrying settings changes.
#[derive(Debug, Clone)]
pub struct SettingsBus {
    sender: broadcast::Sender<SettingsEvent>,
}

impl SettingsBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; returns the number of subscribers that will see it.
    pub fn publish(&self, event: SettingsEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.sender.subscribe()
    }
}

impl Default for SettingsBus {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Owns the settings store and keeps the detector's snapshot current.
pub struct SettingsManager {
    detector: Arc<FloodDetector>,
    store: Arc<dyn SettingsStore>,
    bus: SettingsBus,
}

impl SettingsManager {
    pub fn new(detector: Arc<FloodDetector>, store: Arc<dyn SettingsStore>, bus: SettingsBus) -> Self {
        Self {
            detector,
            store,
            bus,
        }
    }

    pub fn detector(&self) -> &Arc<FloodDetector> {
        &self.detector
    }

    pub fn bus(&self) -> &SettingsBus {
        &self.bus
    }

    /// The settings currently in effect.
    pub fn current(&self) -> Settings {
        self.detector.snapshot().settings().clone()
    }

    /// Replace the active rules. All tracked clients are discarded.
    pub fn apply(&self, settings: Settings) -> Result<()> {
        self.install(Snapshot::compile(settings)?);
        Ok(())
    }

    fn install(&self, snapshot: Snapshot) {
        let version = snapshot.settings().version;
        let routes = snapshot.rules().len();
        self.detector.swap(snapshot);
        info!(version = version, routes = routes, "Loaded route rules");
    }

    /// Apply the stored settings, or save `seed` if nothing is stored yet.
    pub async fn load_or_seed(&self, seed: Option<Settings>) -> Result<()> {
        match self.store.load().await? {
            Some(settings) => self.apply(settings),
            None => {
                info!("No stored settings, seeding defaults");
                self.save(seed.unwrap_or_default()).await.map(|_| ())
            }
        }
    }

    /// Validate, persist, apply and broadcast new settings.
    ///
    /// The version is bumped past both the submitted and the current one.
    pub async fn save(&self, mut settings: Settings) -> Result<Settings> {
        settings.version = settings.version.max(self.current().version) + 1;
        let snapshot = Snapshot::compile(settings.clone())?;

        self.store.save(&settings).await?;
        self.install(snapshot);

        let receivers = self.bus.publish(SettingsEvent {
            origin: EventOrigin::Local,
            settings: settings.clone(),
        });
        debug!(version = settings.version, receivers = receivers, "Published settings");

        Ok(settings)
    }

    /// Apply settings received from peers until the bus closes.
    pub async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<SettingsEvent>) {
        loop {
            match receiver.recv().await {
                Ok(SettingsEvent {
                    origin: EventOrigin::Peer(node_id),
                    settings,
                }) => {
                    let version = settings.version;
                    if let Err(e) = self.apply(settings) {
                        error!(peer = %node_id, version = version, error = %e, "Rejected settings from peer");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Settings subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Settings bus closed");
    }
}
