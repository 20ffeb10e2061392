//! Settings administration endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::FloodgateError;
use crate::ratelimit::{Settings, SettingsManager};

/// Build the admin router.
pub fn router(manager: Arc<SettingsManager>) -> Router {
    Router::new()
        .route("/settings", get(get_settings).put(put_settings))
        .route("/health", get(health))
        .with_state(manager)
}

async fn get_settings(State(manager): State<Arc<SettingsManager>>) -> Json<Settings> {
    Json(manager.current())
}

async fn put_settings(
    State(manager): State<Arc<SettingsManager>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    let saved = manager.save(settings).await?;
    info!(version = saved.version, routes = saved.routes.len(), "Settings saved");
    Ok(Json(saved))
}

async fn health(State(manager): State<Arc<SettingsManager>>) -> Json<Value> {
    let detector = manager.detector();
    let snapshot = detector.snapshot();
    Json(json!({
        "status": "ok",
        "version": snapshot.settings().version,
        "routes": snapshot.rules().len(),
        "tracked_clients": detector.tracked_clients(),
    }))
}

/// Maps library errors onto HTTP responses.
struct ApiError(FloodgateError);

impl From<FloodgateError> for ApiError {
    fn from(err: FloodgateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            FloodgateError::InvalidPattern { .. } | FloodgateError::Config(_) => StatusCode::BAD_REQUEST,
            _ => {
                error!(error = %self.0, "Failed to save settings");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FloodDetector, RouteConfig, SettingsBus};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::extract::Request;
    use tower::ServiceExt;

    async fn seeded_manager() -> Arc<SettingsManager> {
        let manager = Arc::new(SettingsManager::new(
            Arc::new(FloodDetector::new()),
            Arc::new(MemoryStore::new()),
            SettingsBus::default(),
        ));
        manager.load_or_seed(None).await.unwrap();
        manager
    }

    fn put(body: String) -> Request {
        axum::http::Request::builder()
            .method("PUT")
            .uri("/settings")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_settings() {
        let app = router(seeded_manager().await);

        let response = app.oneshot(get_request("/settings")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["guestOnly"], true);
        assert_eq!(json["routes"].as_array().unwrap().len(), 3);
        assert_eq!(json["routes"][1]["path"], "^/(?:api/)?user/");
    }

    #[tokio::test]
    async fn test_put_settings_replaces_rules() {
        let manager = seeded_manager().await;
        let mut receiver = manager.bus().subscribe();
        let app = router(manager.clone());

        let body = json!({
            "guestOnly": "0",
            "routes": [{"path": "^/login", "max": "3", "time": "10", "comment": "login"}]
        });
        let response = app.oneshot(put(body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["version"], 2);
        assert_eq!(json["routes"][0]["max"], 3);

        assert_eq!(manager.detector().rule_count(), 1);
        assert_eq!(
            manager.current().routes,
            vec![RouteConfig::new("^/login", 3, 10, "login")]
        );
        assert_eq!(receiver.recv().await.unwrap().settings.version, 2);
    }

    #[tokio::test]
    async fn test_put_invalid_pattern_is_bad_request() {
        let manager = seeded_manager().await;
        let app = router(manager.clone());

        let body = json!({"routes": [{"path": "(", "max": 1, "time": 1}]});
        let response = app.oneshot(put(body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("Invalid route pattern"));
        assert_eq!(manager.detector().rule_count(), 3);
    }

    #[tokio::test]
    async fn test_health() {
        let manager = seeded_manager().await;
        manager.detector().evaluate("/home", "10.0.0.1");

        let response = router(manager).oneshot(get_request("/health")).await.unwrap();
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["routes"], 3);
        assert_eq!(json["tracked_clients"], 1);
    }
}
