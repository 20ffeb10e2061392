//! Route rule configuration.
//!
//! This module holds the serializable form of the guarded routes: an ordered
//! list of URL patterns with their thresholds, plus the guest-only switch.
//! Field names follow the stored settings format (`path`, `max`, `time`,
//! `comment`), and numeric fields accept numeric strings as well as numbers.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Pattern for every path that does not start with `/api/`.
///
/// Written without look-around, which the regex engine does not support.
pub const NON_API_PATTERN: &str = r"^/(?:$|[^a]|a(?:$|[^p])|ap(?:$|[^i])|api(?:$|[^/]))";

/// Longest window whose length in milliseconds still fits an `i64`.
pub const MAX_WINDOW_SECS: u64 = i64::MAX as u64 / 1000;

/// Configuration for one guarded URL pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Regular expression matched against the request path
    #[serde(rename = "path")]
    pub pattern: String,
    /// Requests allowed per window; 0 disables tracking
    #[serde(rename = "max", deserialize_with = "lenient_u64")]
    pub max_count: u64,
    /// Window length in seconds; 0 disables tracking
    #[serde(rename = "time", deserialize_with = "lenient_u64")]
    pub window_secs: u64,
    /// Free-text description used in diagnostics
    #[serde(rename = "comment", default)]
    pub label: String,
}

impl RouteConfig {
    pub fn new(pattern: &str, max_count: u64, window_secs: u64, label: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            max_count,
            window_secs,
            label: label.to_string(),
        }
    }

    /// Check the window length and compile the pattern.
    pub fn compile(&self) -> Result<Regex> {
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(FloodgateError::Config(format!(
                "window of route {:?} exceeds {} seconds: {}",
                self.pattern, MAX_WINDOW_SECS, self.window_secs
            )));
        }
        Regex::new(&self.pattern).map_err(|source| FloodgateError::InvalidPattern {
            pattern: self.pattern.clone(),
            source,
        })
    }
}

/// A complete settings snapshot as stored, edited and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Monotonic revision, bumped on every save
    #[serde(default, deserialize_with = "lenient_u64")]
    pub version: u64,
    /// When set, authenticated requests bypass flood detection
    #[serde(rename = "guestOnly", default, deserialize_with = "lenient_bool")]
    pub guest_only: bool,
    /// Guarded routes in match order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 0,
            guest_only: true,
            routes: vec![
                RouteConfig::new("^/assets/", 0, 0, "uploaded files"),
                RouteConfig::new("^/(?:api/)?user/", 5, 30, "user profiles"),
                RouteConfig::new(NON_API_PATTERN, 15, 60, "non-API (initial load)"),
            ],
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading seed route settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse route settings: {}", e)))
    }

    /// Check that every route pattern compiles.
    pub fn validate(&self) -> Result<()> {
        for route in &self.routes {
            route.compile()?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Bool(bool),
    Number(u64),
    Text(String),
}

/// Parse an integer the way form-encoded settings arrive: empty means 0.
pub(crate) fn parse_int(field: &str, raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| FloodgateError::Config(format!("{} is not an integer: {:?}", field, raw)))
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Bool(b) => Ok(u64::from(b)),
        Lenient::Text(s) => parse_int("value", &s).map_err(serde::de::Error::custom),
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Lenient::deserialize(deserializer)? {
        Lenient::Bool(b) => Ok(b),
        Lenient::Number(n) => Ok(n != 0),
        Lenient::Text(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => parse_int("flag", other)
                .map(|n| n != 0)
                .map_err(serde::de::Error::custom),
        },
    }
}
