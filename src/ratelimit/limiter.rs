//! Core flood detector implementation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, trace, warn};

use super::counter::ClientWindow;
use super::rules::{RouteConfig, Settings};
use crate::error::Result;

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request may proceed
    Allow,
    /// The client is flooding; it should retry after the given number of seconds
    Deny { retry_after_secs: u64 },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Cooldown hint, present only on denial.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// A compiled route rule together with the windows of the clients it tracks.
pub struct RouteRule {
    pattern: Regex,
    max_count: u64,
    window_secs: u64,
    label: String,
    /// Client windows indexed by client identity
    clients: Mutex<HashMap<String, ClientWindow>>,
}

impl RouteRule {
    /// Compile a rule with an empty client set.
    pub fn compile(config: &RouteConfig) -> Result<Self> {
        Ok(Self {
            pattern: config.compile()?,
            max_count: config.max_count,
            window_secs: config.window_secs,
            label: config.label.clone(),
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pass-through rules match but never count anything.
    pub fn is_tracked(&self) -> bool {
        self.window_secs != 0 && self.max_count != 0
    }

    fn cutoff(&self, now_ms: i64) -> i64 {
        let window_ms = i64::try_from(self.window_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .unwrap_or(i64::MAX);
        now_ms.saturating_sub(window_ms)
    }

    /// Count a request from `client_id` and decide whether it is flooding.
    fn evaluate(&self, path: &str, client_id: &str, now_ms: i64) -> Verdict {
        if !self.is_tracked() {
            return Verdict::Allow;
        }

        let cutoff = self.cutoff(now_ms);
        let mut clients = self.clients.lock();

        clients.retain(|_, window| !window.is_expired(cutoff));

        let window = clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientWindow::new(client_id, now_ms));
        let count = window.record();

        if count <= self.max_count {
            return Verdict::Allow;
        }

        if count == self.max_count + 1 {
            warn!(
                client = %client_id,
                route = %self.label,
                requests_per_minute = window.requests_per_minute(now_ms),
                path = %path,
                "Flooding detected"
            );
        }

        Verdict::Deny {
            retry_after_secs: self.window_secs,
        }
    }

    /// Drop windows that have expired by `now_ms`.
    fn sweep(&self, now_ms: i64) -> usize {
        if !self.is_tracked() {
            return 0;
        }
        let cutoff = self.cutoff(now_ms);
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, window| !window.is_expired(cutoff));
        before - clients.len()
    }

    fn window_of(&self, client_id: &str) -> Option<ClientWindow> {
        self.clients.lock().get(client_id).cloned()
    }

    fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl std::fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRule")
            .field("pattern", &self.pattern.as_str())
            .field("max_count", &self.max_count)
            .field("window_secs", &self.window_secs)
            .field("label", &self.label)
            .finish()
    }
}

/// One immutable generation of configuration.
///
/// Only the per-rule client maps change after compilation.
#[derive(Debug)]
pub struct Snapshot {
    settings: Settings,
    rules: Vec<RouteRule>,
}

impl Snapshot {
    /// Compile settings into a fresh snapshot with no tracked clients.
    pub fn compile(settings: Settings) -> Result<Self> {
        let rules = settings
            .routes
            .iter()
            .map(RouteRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { settings, rules })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn guest_only(&self) -> bool {
        self.settings.guest_only
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Evaluate a request at `now_ms` against the first matching rule.
    pub fn evaluate_at(&self, path: &str, client_id: &str, now_ms: i64) -> Verdict {
        let Some(rule) = self.rules.iter().find(|rule| rule.matches(path)) else {
            trace!(path = %path, "No route rule matched");
            return Verdict::Allow;
        };

        trace!(path = %path, client = %client_id, route = %rule.label, "Route rule matched");
        rule.evaluate(path, client_id, now_ms)
    }

    fn sweep_at(&self, now_ms: i64) -> usize {
        self.rules.iter().map(|rule| rule.sweep(now_ms)).sum()
    }

    fn tracked_clients(&self) -> usize {
        self.rules.iter().map(RouteRule::client_count).sum()
    }
}

/// The flood detector that evaluates requests against the current route rules.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Evaluations against the same rule are serialized by that rule's lock;
/// configuration changes replace the whole snapshot at once.
pub struct FloodDetector {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl FloodDetector {
    /// Create a detector with no route rules; every request is allowed.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot {
            settings: Settings {
                version: 0,
                guest_only: false,
                routes: Vec::new(),
            },
            rules: Vec::new(),
        })
    }

    /// Create a detector from compiled settings.
    pub fn with_settings(settings: Settings) -> Result<Self> {
        Ok(Self::with_snapshot(Snapshot::compile(settings)?))
    }

    fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Replace the current snapshot, discarding all tracked clients.
    pub fn swap(&self, snapshot: Snapshot) {
        debug!(
            version = snapshot.settings.version,
            routes = snapshot.rules.len(),
            "Swapping route snapshot"
        );
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Compile and install new settings.
    pub fn install(&self, settings: Settings) -> Result<()> {
        self.swap(Snapshot::compile(settings)?);
        Ok(())
    }

    /// Evaluate a request now.
    pub fn evaluate(&self, path: &str, client_id: &str) -> Verdict {
        self.evaluate_at(path, client_id, now_ms())
    }

    /// Evaluate a request at an explicit time in Unix milliseconds.
    pub fn evaluate_at(&self, path: &str, client_id: &str, now_ms: i64) -> Verdict {
        self.snapshot().evaluate_at(path, client_id, now_ms)
    }

    /// Evict expired client windows across all rules.
    ///
    /// Returns the number of windows removed.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        self.snapshot().sweep_at(now_ms)
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    /// Get the number of client windows held across all rules.
    pub fn tracked_clients(&self) -> usize {
        self.snapshot().tracked_clients()
    }

    /// Get the number of configured rules.
    pub fn rule_count(&self) -> usize {
        self.snapshot().rules.len()
    }

    /// Get a copy of a client's window under the rule at `rule_index`.
    pub fn client_window(&self, rule_index: usize, client_id: &str) -> Option<ClientWindow> {
        self.snapshot()
            .rules
            .get(rule_index)
            .and_then(|rule| rule.window_of(client_id))
    }
}

impl Default for FloodDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
