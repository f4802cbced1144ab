//! HTTP surface
//!
//! Router for the WebSocket endpoint, health, metrics, the post-call
//! scoring endpoint, and the static browser client.

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pitchcall_core::{ChatTurn, PersonaId};
use pitchcall_llm::{evaluate_call, LlmConfig, Scorecard};

use crate::state::AppState;
use crate::websocket::ws_agent;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.config.server.cors_origins,
        state.config.server.cors_enabled,
    );
    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        .route("/ws/agent", get(ws_agent))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/feedback", post(feedback))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins
///
/// - Disabled: permissive (development only)
/// - No origins configured: localhost:3000 for safety
/// - Otherwise the configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// Liveness check
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus exposition
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Post-call scoring request
#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    transcript: Vec<ChatTurn>,
    #[serde(default)]
    persona: PersonaId,
}

/// Score a finished call transcript
async fn feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Scorecard>, StatusCode> {
    let config = LlmConfig::from_settings(&state.config.llm);
    match evaluate_call(&state.http, &config, &request.transcript, request.persona).await {
        Ok(scorecard) => Ok(Json(scorecard)),
        Err(e) => {
            tracing::error!("call scoring failed: {}", e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use pitchcall_config::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(Settings::default(), init_metrics());
        let _ = create_router(state);
    }

    #[test]
    fn test_feedback_request_parsing() {
        let request: FeedbackRequest = serde_json::from_str(
            r#"{
                "transcript": [
                    {"role": "user", "content": "hi, quick question"},
                    {"role": "assistant", "content": "make it fast"}
                ],
                "persona": "B"
            }"#,
        )
        .unwrap();
        assert_eq!(request.transcript.len(), 2);
        assert_eq!(request.persona, PersonaId::B);
    }

    #[test]
    fn test_feedback_request_default_persona() {
        let request: FeedbackRequest =
            serde_json::from_str(r#"{"transcript": []}"#).unwrap();
        assert_eq!(request.persona, PersonaId::A);
    }
}
