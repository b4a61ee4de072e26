//! geochat gateway — chat, welcome, and health endpoints plus the direct
//! OneMap data routes, served at one bind address with an embedded map UI.
//!
//! The conversational routes never return a hard error: the pipeline absorbs
//! every upstream or model failure. Only the direct data routes surface
//! errors (400 for a missing token, 502 for upstream faults).

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use geochat_core::{
    feature_collection, AzureOpenAi, ChatPipeline, ChatResult, HealthReport, LayerRegistry,
    ModelBackend, OneMapClient, OneMapError, Orchestrator,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct AppState {
    pipeline: ChatPipeline,
    onemap: Arc<OneMapClient>,
}

#[derive(Deserialize, Default)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct YearQuery {
    year: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let onemap = Arc::new(OneMapClient::from_env());
    if !onemap.has_token() {
        tracing::warn!("ONEMAP_TOKEN not set; data routes will 400 and grounding will be empty");
    }

    let backend: Option<Arc<dyn ModelBackend>> = match AzureOpenAi::from_env() {
        Some(bridge) => {
            tracing::info!("Azure OpenAI backend configured");
            Some(Arc::new(bridge))
        }
        None => {
            tracing::info!("Azure OpenAI backend not configured; rule-based replies only");
            None
        }
    };

    let registry = Arc::new(LayerRegistry::onemap(onemap.clone()));
    let state = Arc::new(AppState {
        pipeline: ChatPipeline::new(registry, Orchestrator::new(backend)),
        onemap,
    });

    let bind = std::env::var("GEOCHAT_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".into());
    let addr: SocketAddr = bind.parse().expect("GEOCHAT_BIND_ADDR must be host:port");
    tracing::info!("geochat gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind gateway address");
    axum::serve(listener, app(state)).await.expect("serve gateway");
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_map_ui))
        .route("/api/chat", post(chat_handler))
        .route("/api/welcome", get(welcome_handler))
        .route("/api/azure-health", get(health_handler))
        .route("/api/planning-areas", get(planning_areas_handler))
        .route("/api/dengue-clusters", get(dengue_clusters_handler))
        .route("/api/themes-info", get(themes_info_handler))
        .with_state(state)
}

/// Embedded Leaflet map + chat console.
async fn serve_map_ui() -> Html<&'static str> {
    const INDEX: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/static/index.html"));
    Html(INDEX)
}

/// Tolerates a missing or non-JSON body; the pipeline turns an empty message
/// into its fixed prompt-for-input reply.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ChatRequest>>,
) -> Json<ChatResult> {
    let message = body.map(|Json(b)| b.message).unwrap_or_default();
    Json(state.pipeline.chat(&message).await)
}

async fn welcome_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let reply = state.pipeline.welcome().await;
    Json(serde_json::json!({ "reply": reply }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.pipeline.health().await)
}

fn data_route_error(e: OneMapError) -> (StatusCode, String) {
    match e {
        OneMapError::MissingToken => (StatusCode::BAD_REQUEST, e.to_string()),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

async fn planning_areas_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<YearQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let features = state
        .onemap
        .planning_features(query.year.as_deref())
        .await
        .map_err(data_route_error)?;
    Ok(Json(feature_collection(features)))
}

async fn dengue_clusters_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let features = state
        .onemap
        .dengue_features()
        .await
        .map_err(data_route_error)?;
    Ok(Json(feature_collection(features)))
}

async fn themes_info_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.onemap.themes_info().await {
        Ok(info) => Ok(Json(info)),
        Err(OneMapError::MissingToken) => Err((
            StatusCode::BAD_REQUEST,
            OneMapError::MissingToken.to_string(),
        )),
        Err(e) => {
            tracing::warn!("themes info fetch failed: {e}");
            Ok(Json(serde_json::json!({ "error": "Failed to fetch." })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let onemap = Arc::new(OneMapClient::new(None));
        let registry = Arc::new(LayerRegistry::onemap(onemap.clone()));
        app(Arc::new(AppState {
            pipeline: ChatPipeline::new(registry, Orchestrator::new(None)),
            onemap,
        }))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_chat(message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "message": message }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_show_clusters_without_model() {
        let response = test_app().oneshot(post_chat("show clusters")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reply"], "Showing dengue hotspots on the map.");
        assert_eq!(
            body["intents"],
            serde_json::json!([{ "type": "show_layer", "layer": "dengue" }])
        );
    }

    #[tokio::test]
    async fn chat_clear_returns_fixed_phrase() {
        let response = test_app().oneshot(post_chat("clear")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["reply"], "Clearing map overlays.");
        assert_eq!(body["intents"], serde_json::json!([{ "type": "clear_all" }]));
    }

    #[tokio::test]
    async fn chat_without_body_prompts_for_input() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reply"], "Please type a question.");
        assert_eq!(body["intents"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn data_routes_require_onemap_token() {
        for uri in ["/api/planning-areas", "/api/dengue-clusters", "/api/themes-info"] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = test_app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn welcome_is_never_empty() {
        let request = Request::builder()
            .uri("/api/welcome")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        let body = json_body(response).await;
        assert!(!body["reply"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_missing_configuration() {
        let request = Request::builder()
            .uri("/api/azure-health")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["configured"], false);
        assert_eq!(body["tool_detail"], "Missing AZURE_OPENAI_* env vars");
    }
}
