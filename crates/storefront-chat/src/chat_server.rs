//! Server startup and router
//!
//! Builds the shared state (database, hub, turn orchestrator, LLM gateway),
//! starts the stale-connection sweeper and serves the HTTP/WebSocket router.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    api,
    config::Config,
    gateway::{LanguageModel, LlmGateway},
    metrics,
    shared_state::{SharedSystemState, UnifiedAppState},
    store::ChatDatabase,
};

pub async fn run_chat_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing("info");
    metrics::init_metrics();
    cfg.print_config();

    let database = match ChatDatabase::new(&cfg.database_path) {
        Ok(db) => {
            info!("Chat database initialized at: {}", cfg.database_path.display());
            Arc::new(db)
        }
        Err(e) => {
            warn!("Failed to initialize chat database: {}. Falling back to in-memory.", e);
            Arc::new(ChatDatabase::new_in_memory()?)
        }
    };

    let model: Arc<dyn LanguageModel> = Arc::new(LlmGateway::new(cfg.gateway_config()));
    let shared_state = Arc::new(SharedSystemState::with_liveness(
        database,
        model,
        cfg.turn_config(),
        cfg.liveness(),
    ));

    let sweeper = Arc::clone(&shared_state.hub).spawn_sweeper(cfg.sweep_interval());
    info!("Connection sweeper running every {}s", cfg.sweep_interval_seconds);

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let app = build_router(UnifiedAppState::new(shared_state), cfg.request_timeout());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub fn build_router(state: UnifiedAppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PUT])
        .allow_headers(Any);

    // Upgraded sockets outlive the request, so the timeout only wraps REST routes.
    let rest = Router::new()
        .route("/conversations", post(api::start_conversation))
        .route("/conversations/:id", get(api::get_conversation))
        .route("/conversations/:id/status", put(api::update_conversation_status))
        .route("/stores/:store_id/conversations", get(api::list_store_conversations))
        .route("/stores/:store_id/catalog", post(api::import_catalog))
        .route("/admin/stats", get(api::admin_stats))
        .route("/healthz", get(api::health))
        .route("/metrics", get(metrics::get_metrics))
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .route("/ws", get(api::ws_handler))
        .merge(rest)
        .route_layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Generation, GenerationFailed, GenerationRequest};
    use crate::chat::TurnConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    struct UnusedModel;

    #[async_trait]
    impl LanguageModel for UnusedModel {
        fn model_name(&self) -> &str {
            "unused"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<Generation, GenerationFailed> {
            Err(GenerationFailed::new("not used in router tests"))
        }
    }

    fn test_router() -> Router {
        let database = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let shared = Arc::new(SharedSystemState::new(database, Arc::new(UnusedModel), TurnConfig::default()));
        build_router(UnifiedAppState::new(shared), Duration::from_secs(5))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = test_router()
            .oneshot(HttpRequest::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_start_then_resume_conversation() {
        let router = test_router();
        let body = serde_json::json!({"storeId": "s1", "sessionToken": "tok", "customerName": "Ada"});

        let first = router.clone().oneshot(json_request("POST", "/conversations", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first = body_json(first).await;
        assert_eq!(first["conversation"]["status"], "active");

        let second = router.clone().oneshot(json_request("POST", "/conversations", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second = body_json(second).await;
        assert_eq!(first["conversation"]["id"], second["conversation"]["id"]);

        let id = first["conversation"]["id"].as_str().unwrap().to_string();
        let detail = router
            .clone()
            .oneshot(HttpRequest::builder().uri(format!("/conversations/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(detail.status(), StatusCode::OK);
        assert_eq!(body_json(detail).await["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_start_requires_store_and_token() {
        let response = test_router()
            .oneshot(json_request("POST", "/conversations", serde_json::json!({"storeId": "", "sessionToken": "t"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_update_and_filtered_listing() {
        let router = test_router();
        let created = router
            .clone()
            .oneshot(json_request("POST", "/conversations", serde_json::json!({"storeId": "s1", "sessionToken": "a"})))
            .await
            .unwrap();
        let id = body_json(created).await["conversation"]["id"].as_str().unwrap().to_string();

        let updated = router
            .clone()
            .oneshot(json_request("PUT", &format!("/conversations/{}/status", id), serde_json::json!({"status": "closed"})))
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::OK);

        let listed = router
            .clone()
            .oneshot(HttpRequest::builder().uri("/stores/s1/conversations?status=closed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(listed).await;
        assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);

        let bad = router
            .clone()
            .oneshot(HttpRequest::builder().uri("/stores/s1/conversations?status=deleted").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing = router
            .oneshot(json_request("PUT", "/conversations/nope/status", serde_json::json!({"status": "closed"})))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_catalog_import_and_admin_stats() {
        let router = test_router();
        let snapshot = serde_json::json!({
            "shopDomain": "acme.myshopify.com",
            "name": "Acme",
            "products": [{"id": "p1", "handle": "tee", "title": "Tee"}],
            "pages": [{"id": "pg1", "handle": "faq", "title": "FAQ", "body": "Answers"}]
        });
        let imported = router
            .clone()
            .oneshot(json_request("POST", "/stores/s1/catalog", snapshot))
            .await
            .unwrap();
        assert_eq!(imported.status(), StatusCode::OK);
        let stats = body_json(imported).await;
        assert_eq!(stats["products"], 1);
        assert_eq!(stats["pages"], 1);

        let admin = router
            .oneshot(HttpRequest::builder().uri("/admin/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let admin = body_json(admin).await;
        assert_eq!(admin["database"]["totalStores"], 1);
        assert_eq!(admin["database"]["totalProducts"], 1);
        assert_eq!(admin["registrations"], 0);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_404() {
        let response = test_router()
            .oneshot(HttpRequest::builder().uri("/conversations/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
