//! Ephemeral credential bootstrap.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::CallError;
use crate::http::{shared_client, truncate_body};
use crate::types::VoiceSelection;
use crate::util::timeout::with_timeout;

/// JSON pointer of the bearer token inside the bootstrap response.
const CLIENT_SECRET_POINTER: &str = "/client_secret/value";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Short-lived bearer token scoping gateway access to one call.
///
/// Expiry is enforced by the gateway; the token is never cached or persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token, for building an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of per-call credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_credential(&self, voice: VoiceSelection) -> Result<Credential, CallError>;
}

/// Fetches credentials from the backend session endpoint (`GET ?voice=`).
///
/// No retry is performed; the caller decides whether to try again.
#[derive(Debug, Clone)]
pub struct EphemeralCredentialClient {
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl EphemeralCredentialClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            client: shared_client().clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn fetch_once(&self, voice: VoiceSelection) -> Result<Credential, CallError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("voice", voice.as_str())])
            .send()
            .await
            .map_err(|e| CallError::Credential(format!("Session request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Credential(format!("Failed to read session response: {e}")))?;

        if !status.is_success() {
            return Err(CallError::Credential(format!(
                "Session endpoint returned status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            )));
        }

        extract_credential(&body)
    }
}

#[async_trait]
impl CredentialProvider for EphemeralCredentialClient {
    async fn fetch_credential(&self, voice: VoiceSelection) -> Result<Credential, CallError> {
        debug!(voice = %voice, endpoint = %self.endpoint, "Fetching ephemeral credential");
        with_timeout("Credential fetch", self.timeout, self.fetch_once(voice)).await
    }
}

/// Pull `client_secret.value` out of a bootstrap response body.
pub fn extract_credential(body: &str) -> Result<Credential, CallError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| CallError::Credential(format!("Session response is not JSON: {e}")))?;

    payload
        .pointer(CLIENT_SECRET_POINTER)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Credential::new)
        .ok_or_else(|| {
            CallError::Credential("Session response is missing client_secret.value".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_client_secret() {
        let credential =
            extract_credential(r#"{"session_id":"s1","client_secret":{"value":"tok123"}}"#)
                .expect("credential should parse");
        assert_eq!(credential.expose(), "tok123");
    }

    #[test]
    fn missing_or_empty_secret_is_an_error() {
        for body in [
            "{}",
            r#"{"client_secret":{}}"#,
            r#"{"client_secret":{"value":""}}"#,
            r#"{"client_secret":{"value":42}}"#,
        ] {
            let err = extract_credential(body).expect_err(body);
            assert!(matches!(err, CallError::Credential(msg) if msg.contains("client_secret")));
        }
    }

    #[test]
    fn non_json_body_is_an_error() {
        let err = extract_credential("<html>bad gateway</html>").expect_err("should fail");
        assert!(matches!(err, CallError::Credential(msg) if msg.contains("not JSON")));
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    }
}
