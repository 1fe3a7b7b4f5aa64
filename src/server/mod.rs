//! Credential-minting backend (`GET /api/session?voice=<voice>`).
//!
//! Posts model, voice and instructions to the upstream
//! `/realtime/sessions` endpoint and relays its JSON response, which carries
//! the `client_secret.value` consumed by
//! [`EphemeralCredentialClient`](crate::session::EphemeralCredentialClient).

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::CallError;
use crate::http::{shared_client, truncate_body};
use crate::types::VoiceSelection;

#[derive(Clone)]
pub struct ServerState {
    config: Arc<ServerConfig>,
    client: reqwest::Client,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: shared_client().clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    voice: Option<String>,
}

/// Build the application router.
pub fn app(config: ServerConfig) -> Router {
    Router::new()
        .route("/api/session", get(create_session))
        .route("/session", get(create_session))
        .route("/health", get(health))
        .with_state(ServerState::new(config))
}

/// Bind `config.bind_addr` and serve until Ctrl+C.
pub async fn serve(config: ServerConfig) -> Result<(), CallError> {
    let addr = config.bind_addr;
    let upstream = config.sessions_url();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, upstream = %upstream, "Credential server listening");

    axum::serve(listener, app(config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Credential server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, shutting down");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn create_session(
    State(state): State<ServerState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let voice = match query.voice.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => VoiceSelection::default(),
        Some(raw) => match VoiceSelection::from_str(raw) {
            Ok(voice) => voice,
            Err(_) => {
                debug!(voice = raw, "Rejecting unknown voice");
                return error_response(StatusCode::BAD_REQUEST, format!("Unknown voice: {raw}"));
            }
        },
    };

    let payload = json!({
        "model": state.config.model,
        "voice": voice.as_str(),
        "instructions": state.config.instructions,
    });
    let mut request = state
        .client
        .post(state.config.sessions_url())
        .timeout(state.config.upstream_timeout)
        .json(&payload);
    if let Some(key) = &state.config.api_key {
        request = request.bearer_auth(key);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "Upstream session request failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Upstream session request failed: {error}"),
            );
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(error) => {
            warn!(error = %error, "Failed to read upstream session response");
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to read upstream response: {error}"),
            );
        }
    };

    if status.is_success() {
        info!(voice = %voice, "Session minted");
    } else {
        warn!(
            status = status.as_u16(),
            body = %truncate_body(&String::from_utf8_lossy(&body)),
            "Upstream rejected session request"
        );
    }
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let response = app(ServerConfig::default())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_voice_is_a_bad_request() {
        let response = app(ServerConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/api/session?voice=robot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Unknown voice: robot");
    }
}
