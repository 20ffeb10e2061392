//! Transport-independent admission decision.

use std::sync::Arc;

use tracing::debug;

use crate::ratelimit::{now_ms, FloodDetector, Verdict};

/// The parts of an inbound request that admission looks at.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    /// Request path, including any query string
    pub path: &'a str,
    /// Client identity, usually an IP address
    pub client: &'a str,
    /// Whether the request carries an authenticated principal
    pub authenticated: bool,
}

/// What the transport should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Pass the request on unchanged
    Forward,
    /// Answer with "too many requests" and a retry-after hint
    Reject { retry_after_secs: u64 },
}

/// Bridges requests to the flood detector.
#[derive(Clone)]
pub struct AdmissionControl {
    detector: Arc<FloodDetector>,
}

impl AdmissionControl {
    pub fn new(detector: Arc<FloodDetector>) -> Self {
        Self { detector }
    }

    /// Decide on a request now.
    pub fn admit(&self, request: &AdmissionRequest<'_>) -> Admission {
        self.admit_at(request, now_ms())
    }

    /// Decide on a request at an explicit time in Unix milliseconds.
    ///
    /// The guest-only flag and the rules are read from the same snapshot.
    pub fn admit_at(&self, request: &AdmissionRequest<'_>, now_ms: i64) -> Admission {
        let snapshot = self.detector.snapshot();

        if request.authenticated && snapshot.guest_only() {
            return Admission::Forward;
        }

        match snapshot.evaluate_at(request.path, request.client, now_ms) {
            Verdict::Allow => Admission::Forward,
            Verdict::Deny { retry_after_secs } => {
                debug!(
                    client = %request.client,
                    path = %request.path,
                    retry_after_secs = retry_after_secs,
                    "Rejecting request"
                );
                Admission::Reject { retry_after_secs }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RouteConfig, Settings};

    fn control(guest_only: bool) -> AdmissionControl {
        let detector = FloodDetector::with_settings(Settings {
            version: 1,
            guest_only,
            routes: vec![RouteConfig::new("^/login", 1, 30, "login")],
        })
        .unwrap();
        AdmissionControl::new(Arc::new(detector))
    }

    fn request(authenticated: bool) -> AdmissionRequest<'static> {
        AdmissionRequest {
            path: "/login",
            client: "10.0.0.1",
            authenticated,
        }
    }

    #[test]
    fn test_guest_is_limited() {
        let control = control(true);
        assert_eq!(control.admit_at(&request(false), 0), Admission::Forward);
        assert_eq!(
            control.admit_at(&request(false), 1),
            Admission::Reject { retry_after_secs: 30 }
        );
    }

    #[test]
    fn test_authenticated_bypasses_in_guest_only_mode() {
        let control = control(true);
        for t in 0..10 {
            assert_eq!(control.admit_at(&request(true), t), Admission::Forward);
        }
        assert_eq!(control.detector.tracked_clients(), 0);
    }

    #[test]
    fn test_authenticated_is_limited_without_guest_only() {
        let control = control(false);
        assert_eq!(control.admit_at(&request(true), 0), Admission::Forward);
        assert_eq!(
            control.admit_at(&request(true), 1),
            Admission::Reject { retry_after_secs: 30 }
        );
    }
}
