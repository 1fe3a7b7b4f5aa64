//! SDP offer/answer exchange with the realtime gateway.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::credential::Credential;
use crate::error::CallError;
use crate::http::{bearer_headers, shared_client, truncate_body};
use crate::util::timeout::with_timeout;

const SDP_CONTENT_TYPE: &str = "application/sdp";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Exchanges a local SDP offer for the gateway's answer.
#[async_trait]
pub trait SignalingProvider: Send + Sync {
    async fn exchange_session_description(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> Result<String, CallError>;
}

/// HTTP signaling against `POST /realtime[?model=<id>]`.
///
/// The answer body is returned verbatim; SDP syntax is checked by the
/// transport when the answer is applied.
#[derive(Debug, Clone)]
pub struct SignalingExchange {
    endpoint: String,
    model: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SignalingExchange {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: None,
            timeout: DEFAULT_TIMEOUT,
            client: shared_client().clone(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Gateway URL including the `model` query parameter when configured.
    pub fn url(&self) -> String {
        build_gateway_url(&self.endpoint, self.model.as_deref())
    }

    async fn exchange_once(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> Result<String, CallError> {
        let headers = bearer_headers(credential.expose(), SDP_CONTENT_TYPE)?;
        let response = self
            .client
            .post(self.url())
            .headers(headers)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| CallError::signaling(format!("SDP exchange request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::signaling(format!("Failed to read SDP answer: {e}")))?;

        if !status.is_success() {
            return Err(CallError::signaling_status(
                status.as_u16(),
                truncate_body(&body),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl SignalingProvider for SignalingExchange {
    async fn exchange_session_description(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> Result<String, CallError> {
        debug!(url = %self.url(), offer_len = offer_sdp.len(), "Posting SDP offer");
        with_timeout(
            "SDP exchange",
            self.timeout,
            self.exchange_once(credential, offer_sdp),
        )
        .await
    }
}

fn build_gateway_url(endpoint: &str, model: Option<&str>) -> String {
    let trimmed = endpoint.trim();
    match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => {
            let separator = if trimmed.contains('?') { "&" } else { "?" };
            format!("{trimmed}{separator}model={model}")
        }
        None => trimmed.to_string(),
    }
}
