//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api", management_routes())
        .with_state(state)
}

fn management_routes() -> Router<AppState> {
    Router::new()
        // Ledger
        .route(
            "/proxies",
            get(handlers::proxy::list_proxies).post(handlers::proxy::create_proxy),
        )
        .route("/proxies/import", post(handlers::proxy::import_proxies))
        .route("/proxies/:address", get(handlers::proxy::get_proxy))
        .route("/proxies/:address/check", post(handlers::proxy::check_proxy))
        // Pool
        .route("/pool", get(handlers::pool::list_pool))
        .route("/pool/rebuild", post(handlers::pool::rebuild_pool))
        .route("/thresholds", get(handlers::pool::get_thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::proxy::context::PoolContext;
    use crate::proxy::health::{HealthChecker, HealthCheckerConfig};
    use crate::proxy::testing::{seed_working, ScriptedClient};

    fn app(client: Arc<ScriptedClient>) -> (Router, PoolContext) {
        let context = PoolContext::in_memory();
        let checker = Arc::new(HealthChecker::new(
            context.clone(),
            client,
            HealthCheckerConfig::default(),
        ));
        (create_router(AppState::new(checker, 10)), context)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(Arc::new(ScriptedClient::new()));

        let (status, body) = send(&app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reports_ledger_and_pool() {
        let (app, context) = app(Arc::new(ScriptedClient::new()));
        seed_working(&context, "1.1.1.1:80", 0.5, Utc::now()).await;
        context.ledger().register("2.2.2.2:80").await.unwrap();

        let (status, body) = send(&app, Method::GET, "/api/status", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ledger"]["total"], 2);
        assert_eq!(body["ledger"]["working"], 1);
        assert_eq!(body["pool_size"], 1);
        assert_eq!(body["thresholds"]["latency_ceiling"], 2.25);
    }

    #[tokio::test]
    async fn test_create_without_probe_registers_only() {
        let client = Arc::new(ScriptedClient::new());
        let (app, context) = app(client.clone());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/proxies",
            Body::from(r#"{"address": "1.2.3.4:8080"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["address"], "1.2.3.4:8080");
        assert_eq!(body["working"], false);
        assert!(client.calls().is_empty());
        assert!(context.pool().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_with_probe_enters_pool() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.2.3.4:8080", 300);
        let (app, context) = app(client);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/proxies",
            Body::from(r#"{"address": "1.2.3.4:8080", "probe": true}"#),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["working"], true);
        assert_eq!(context.pool().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_and_duplicate_addresses() {
        let (app, _) = app(Arc::new(ScriptedClient::new()));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/proxies",
            Body::from(r#"{"address": "256.0.0.1:80"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let create = || Body::from(r#"{"address": "1.2.3.4:8080"}"#);
        let (status, _) = send(&app, Method::POST, "/api/proxies", create()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, Method::POST, "/api/proxies", create()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_get_proxy() {
        let (app, context) = app(Arc::new(ScriptedClient::new()));
        context.ledger().register("1.2.3.4:8080").await.unwrap();

        let (status, body) =
            send(&app, Method::GET, "/api/proxies/1.2.3.4:8080", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retries"], 0);

        let (status, _) = send(&app, Method::GET, "/api/proxies/9.9.9.9:99", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_check_failure_is_recorded() {
        let client = Arc::new(ScriptedClient::new());
        let (app, context) = app(client.clone());
        seed_working(&context, "1.2.3.4:8080", 0.5, Utc::now()).await;
        client.refuse("1.2.3.4:8080");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/proxies/1.2.3.4:8080/check",
            Body::empty(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["working"], false);
        assert_eq!(body["retries"], 1);
        assert!(context.pool().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_import() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.2.3.4:8080", 100);
        let (app, context) = app(client);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/proxies/import",
            Body::from("1.2.3.4:8080\n5.6.7.8 3128\n"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["found"], 2);
        assert_eq!(body["added"], 2);
        assert_eq!(body["working"], 1);
        assert_eq!(context.pool().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pool_rebuild_and_thresholds() {
        let (app, context) = app(Arc::new(ScriptedClient::new()));
        seed_working(&context, "1.1.1.1:80", 0.5, Utc::now()).await;

        let (status, body) = send(&app, Method::POST, "/api/pool/rebuild", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pool_size"], 1);

        let (_, body) = send(&app, Method::GET, "/api/pool", Body::empty()).await;
        assert_eq!(body[0]["address"], "1.1.1.1:80");

        let (_, body) = send(&app, Method::GET, "/api/thresholds", Body::empty()).await;
        assert_eq!(body["reliability_floor"], 0.875);
    }
}
