//! Per-client request window.

/// Requests observed from one client since the start of its current window.
///
/// A window is never slid forward. It lives until it is found expired, at
/// which point it is dropped and the next request opens a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
    /// Identity of the requester (usually an IP address)
    client_id: String,
    /// Unix timestamp in milliseconds at which this window opened
    window_start_ms: i64,
    /// Requests counted since `window_start_ms`
    count: u64,
}

impl ClientWindow {
    /// Open a new, empty window at `now_ms`.
    pub fn new(client_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            client_id: client_id.into(),
            window_start_ms: now_ms,
            count: 0,
        }
    }

    /// Count one more request and return the new total.
    pub fn record(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    /// Whether the window began strictly before `cutoff_ms`.
    pub fn is_expired(&self, cutoff_ms: i64) -> bool {
        self.window_start_ms < cutoff_ms
    }

    /// Observed request rate, extrapolated to one minute.
    pub fn requests_per_minute(&self, now_ms: i64) -> f64 {
        // Bursts inside a single millisecond would otherwise divide by zero.
        let elapsed = (now_ms - self.window_start_ms).max(1);
        self.count as f64 * 60_000.0 / elapsed as f64
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn window_start_ms(&self) -> i64 {
        self.window_start_ms
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
