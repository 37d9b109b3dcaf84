//! HTTP routes for the control plane.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::config_sync::{SyncSnapshot, SyncStatus};
use crate::observability::{health_router, HealthState};
use crate::registry::{ServiceEntry, ServiceRegistry};
use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across the debug handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: ServiceRegistry,
    pub sync_status: Arc<SyncStatus>,
}

/// Build the application routes.
///
/// - `/health` - Liveness probe
/// - `/ready` - Readiness probe (200 after the initial config sync)
/// - `/debug/configz` - Running configuration as JSON
/// - `/debug/registryz` - Services known to the configured registries
/// - `/debug/syncz` - Config sync counters
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, health_state: Arc<HealthState>) -> Router {
    let debug_routes = Router::new()
        .route("/debug/configz", get(configz))
        .route("/debug/registryz", get(registryz))
        .route("/debug/syncz", get(syncz))
        .with_state(state);

    health_router(health_state)
        .merge(debug_routes)
        .layer(TraceLayer::new_for_http())
}

async fn configz(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config.clone())
}

async fn registryz(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceEntry>> {
    Json(state.registry.services().to_vec())
}

async fn syncz(State(state): State<Arc<AppState>>) -> Json<SyncSnapshot> {
    Json(state.sync_status.snapshot())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tower::util::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let mut config = Config::from_vars(&HashMap::new()).unwrap();
        config.namespace = "testing".to_string();
        let registry = ServiceRegistry::from_names(&config.registries, &config.namespace).unwrap();
        Arc::new(AppState {
            config,
            registry,
            sync_status: Arc::new(SyncStatus::new()),
        })
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        let response = app.oneshot(request).await.expect("Request failed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_configz_reports_running_config() {
        let app = build_routes(test_state(), Arc::new(HealthState::new()));

        let body = get_json(app, "/debug/configz").await;
        assert_eq!(body["namespace"], "testing");
        assert_eq!(body["registries"][0], "Mock");
    }

    #[tokio::test]
    async fn test_registryz_lists_mock_services() {
        let app = build_routes(test_state(), Arc::new(HealthState::new()));

        let body = get_json(app, "/debug/registryz").await;
        let services = body.as_array().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0]["hostname"], "hello.testing.svc.cluster.local");
        assert_eq!(services[1]["registry"], "Mock");
    }

    #[tokio::test]
    async fn test_syncz_starts_at_zero() {
        let app = build_routes(test_state(), Arc::new(HealthState::new()));

        let body = get_json(app, "/debug/syncz").await;
        assert_eq!(body["syncs"], 0);
        assert_eq!(body["resources"], 0);
    }

    #[tokio::test]
    async fn test_health_routes_are_merged() {
        let health = Arc::new(HealthState::new());
        let app = build_routes(test_state(), Arc::clone(&health));

        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
