//! Local realtime gateway for running calls without the hosted API.
//!
//! - `POST /api/realtime/sessions` mints a session and its bearer secret.
//!   The credential server can use this as its upstream.
//! - `POST /api/realtime` takes a raw SDP offer authenticated by that secret
//!   and answers it as `application/sdp`.
//!
//! What happens on the negotiated connection is up to the [`OfferAnswerer`].
//! [`WebRtcAnswerer`] sends keepalive pings and acknowledges every text
//! message on the control channel.
//!
//! For an offline call, point `QUICKCALL_UPSTREAM_URL` at
//! `http://<gateway>/api` and `QUICKCALL_GATEWAY_URL` at
//! `http://<gateway>/api/realtime`.

mod answerer;

pub use answerer::{WebRtcAnswerer, ACKNOWLEDGEMENT, KEEPALIVE};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::Display;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GatewayConfig, DEFAULT_MODEL};
use crate::error::CallError;
use crate::types::VoiceSelection;

/// Answers SDP offers for minted sessions.
#[async_trait]
pub trait OfferAnswerer: Send + Sync {
    /// Negotiate a connection for `session` and return the SDP answer.
    async fn answer(&self, session: &GatewaySession, offer_sdp: &str) -> Result<String, CallError>;

    /// Close every connection this answerer opened.
    async fn close_all(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Connected,
}

/// A minted session, looked up by its client secret.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySession {
    pub id: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub process_audio: bool,
    pub process_video: bool,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// Sessions keyed by client secret.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, GatewaySession>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, GatewaySession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new session and return its client secret.
    pub fn insert(&self, session: GatewaySession) -> String {
        let secret = Uuid::new_v4().to_string();
        self.lock().insert(secret.clone(), session);
        secret
    }

    pub fn find(&self, secret: &str) -> Option<GatewaySession> {
        self.lock().get(secret).cloned()
    }

    fn set_status(&self, secret: &str, status: SessionStatus) {
        if let Some(session) = self.lock().get_mut(secret) {
            session.status = status;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct GatewayState {
    sessions: Arc<SessionRegistry>,
    answerer: Arc<dyn OfferAnswerer>,
}

impl GatewayState {
    pub fn new(answerer: Arc<dyn OfferAnswerer>) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::default()),
            answerer,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid authorization")]
    Unauthorized,
    #[error("Session not found")]
    SessionNotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::SessionNotFound => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    model: Option<String>,
    voice: Option<String>,
    instructions: Option<String>,
    process_audio: Option<bool>,
    process_video: Option<bool>,
}

/// Build the gateway router around `state`.
pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/api/realtime/sessions", post(create_session))
        .route("/api/realtime", post(answer_offer))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind `config.bind_addr` and serve until Ctrl+C, then close every peer.
pub async fn serve(config: GatewayConfig) -> Result<(), CallError> {
    let answerer = Arc::new(WebRtcAnswerer::new(&config)?);
    let state = GatewayState::new(answerer.clone());
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Realtime gateway listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    answerer.close_all().await;
    info!("Realtime gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, shutting down");
}

async fn health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "sessions": state.sessions.len() }))
}

async fn create_session(
    State(state): State<GatewayState>,
    Json(request): Json<CreateSessionRequest>,
) -> Json<serde_json::Value> {
    let session = GatewaySession {
        id: Uuid::new_v4().to_string(),
        model: request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        voice: request
            .voice
            .unwrap_or_else(|| VoiceSelection::default().as_str().to_string()),
        instructions: request.instructions.unwrap_or_default(),
        process_audio: request.process_audio.unwrap_or(true),
        process_video: request.process_video.unwrap_or(true),
        status: SessionStatus::Created,
        created_at: Utc::now(),
    };
    let session_id = session.id.clone();
    info!(session = %session_id, model = %session.model, voice = %session.voice, "Session created");
    let secret = state.sessions.insert(session);

    Json(json!({
        "session_id": session_id,
        "client_secret": { "value": secret },
    }))
}

async fn answer_offer(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    offer: String,
) -> Result<Response, GatewayError> {
    let secret = bearer_token(&headers).ok_or(GatewayError::Unauthorized)?;
    let session = state
        .sessions
        .find(secret)
        .ok_or(GatewayError::SessionNotFound)?;
    if offer.trim().is_empty() {
        return Err(GatewayError::BadRequest("Missing SDP offer".into()));
    }

    debug!(session = %session.id, offer_len = offer.len(), "SDP offer received");
    let answer = state
        .answerer
        .answer(&session, &offer)
        .await
        .map_err(|error| {
            warn!(session = %session.id, error = %error, "Failed to answer offer");
            match error {
                CallError::Parse(message) => GatewayError::BadRequest(message),
                other => GatewayError::Internal(other.to_string()),
            }
        })?;
    state.sessions.set_status(secret, SessionStatus::Connected);
    info!(session = %session.id, "Session connected");

    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/sdp")], answer).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}
