//! axum middleware enforcing admission control.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use super::client;
use super::guard::{Admission, AdmissionControl, AdmissionRequest};
use crate::config::AdmissionConfig;
use crate::ratelimit::FloodDetector;

/// State shared by every invocation of [`enforce`].
#[derive(Clone)]
pub struct AdmissionState {
    control: AdmissionControl,
    trust_forwarded_for: bool,
    principal_header: Option<Arc<str>>,
}

impl AdmissionState {
    pub fn new(detector: Arc<FloodDetector>, config: &AdmissionConfig) -> Self {
        Self {
            control: AdmissionControl::new(detector),
            trust_forwarded_for: config.trust_forwarded_for,
            principal_header: config.principal_header.as_deref().map(Arc::from),
        }
    }
}

/// Reject flooding clients before the request reaches `next`.
pub async fn enforce(State(state): State<AdmissionState>, request: Request, next: Next) -> Response {
    let admission = {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| request.uri().path());
        let client = client::identify(request.headers(), request.extensions(), state.trust_forwarded_for);
        let authenticated = client::is_authenticated(
            request.headers(),
            request.extensions(),
            state.principal_header.as_deref(),
        );

        state.control.admit(&AdmissionRequest {
            path,
            client: &client,
            authenticated,
        })
    };

    match admission {
        Admission::Forward => next.run(request).await,
        Admission::Reject { retry_after_secs } => too_many_requests(retry_after_secs),
    }
}

/// A 429 response carrying the cooldown in `Retry-After`.
pub fn too_many_requests(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
    )
        .into_response()
}

/// Wrap every route of `router`, fallback included, in admission control.
pub fn protect<S>(router: Router<S>, state: AdmissionState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(state, enforce))
}
