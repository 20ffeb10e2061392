//! Settings persistence.
//!
//! Settings are stored as a flat record of strings: the route list is kept
//! as an embedded JSON document and the numeric fields are stringified, so
//! loading coerces them back to integers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{parse_int, RouteConfig, Settings};

/// Trait for settings store implementations.
///
/// `load` returns `None` when nothing has been saved yet.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the stored settings, if any.
    async fn load(&self) -> Result<Option<Settings>>;

    /// Persist settings, replacing whatever was stored before.
    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// The persisted shape of [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "guestOnly", default)]
    pub guest_only: String,
    /// JSON-encoded route list
    #[serde(default)]
    pub routes: String,
}

impl StoredSettings {
    pub fn encode(settings: &Settings) -> Result<Self> {
        Ok(Self {
            version: settings.version.to_string(),
            guest_only: u64::from(settings.guest_only).to_string(),
            routes: serde_json::to_string(&settings.routes)?,
        })
    }

    pub fn decode(&self) -> Result<Settings> {
        let routes: Vec<RouteConfig> = if self.routes.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.routes)?
        };

        Ok(Settings {
            version: parse_int("version", &self.version)?,
            guest_only: parse_int("guestOnly", &self.guest_only)? != 0,
            routes,
        })
    }
}

/// Settings kept in a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn load(&self) -> Result<Option<Settings>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored settings");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSettings = serde_json::from_str(&contents).map_err(|e| {
            FloodgateError::Store(format!("{}: {}", self.path.display(), e))
        })?;
        stored.decode().map(Some)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(&StoredSettings::encode(settings)?)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        debug!(path = %self.path.display(), version = settings.version, "Stored settings");
        Ok(())
    }
}

/// Settings kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<Option<StoredSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a raw record.
    pub fn with_record(record: StoredSettings) -> Self {
        Self {
            stored: Mutex::new(Some(record)),
        }
    }

    pub fn record(&self) -> Option<StoredSettings> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Option<Settings>> {
        let stored = self.stored.lock().clone();
        stored.map(|record| record.decode()).transpose()
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let record = StoredSettings::encode(settings)?;
        *self.stored.lock() = Some(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_stringifies_fields() {
        let record = StoredSettings::encode(&Settings::default()).unwrap();
        assert_eq!(record.version, "0");
        assert_eq!(record.guest_only, "1");
        assert!(record.routes.starts_with('['));
        assert!(record.routes.contains("\"path\":\"^/assets/\""));
    }

    #[test]
    fn test_decode_coerces_integers() {
        let record = StoredSettings {
            version: "4".to_string(),
            guest_only: "".to_string(),
            routes: r#"[{"path":"^/x","max":"2","time":10,"comment":"x"}]"#.to_string(),
        };
        let settings = record.decode().unwrap();
        assert_eq!(settings.version, 4);
        assert!(!settings.guest_only);
        assert_eq!(settings.routes, vec![RouteConfig::new("^/x", 2, 10, "x")]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let record = StoredSettings {
            version: "1".to_string(),
            guest_only: "1".to_string(),
            routes: "not json".to_string(),
        };
        assert!(matches!(
            record.decode(),
            Err(FloodgateError::Serialization(_))
        ));

        let record = StoredSettings {
            version: "one".to_string(),
            guest_only: "1".to_string(),
            routes: "[]".to_string(),
        };
        assert!(matches!(record.decode(), Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            assert_eq!(store.load().await.unwrap(), None);

            let settings = Settings::default();
            store.save(&settings).await.unwrap();
            assert_eq!(store.load().await.unwrap(), Some(settings));
        });
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.version = 9;
        FileStore::new(&path).save(&settings).await.unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(settings));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{{{").unwrap();

        let err = FileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, FloodgateError::Store(_)));
    }
}
