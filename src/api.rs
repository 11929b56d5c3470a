//! Minimal REST client for the Mastodon endpoints the streaming layer needs.
//!
//! Only server metadata (to find the streaming base URL) and the streaming
//! health check are covered here; the wider REST surface lives elsewhere.

use std::fmt;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::stream::client::StreamingClient;
use crate::stream::error::StreamError;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const INSTANCE_PATH: &str = "/api/v2/instance";
const STREAMING_HEALTH_PATH: &str = "/api/v1/streaming/health";

/// User agent sent on REST and websocket requests unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("mastodon-stream-sdk/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    /// TCP/TLS connect timeout for REST calls.
    pub connect_timeout: Duration,
    /// Total timeout for one REST request.
    pub request_timeout: Duration,
    /// User agent for REST and websocket requests.
    pub user_agent: String,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: ApiDefaults::REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// OAuth access token used for REST calls and stream subscriptions.
#[derive(Clone)]
pub struct AccessToken {
    access_token: SecretString,
    token_type: String,
    scope: Option<String>,
}

impl AccessToken {
    /// Wraps a bearer token string.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Raw token value, as sent in the `access_token` field of subscriptions.
    pub fn secret(&self) -> &SecretString {
        &self.access_token
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.expose_secret())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone)]
pub struct MastodonClient {
    http: Client,
    base_url: String,
    token: AccessToken,
    user_agent: String,
    request_timeout: Duration,
}

impl MastodonClient {
    pub fn new(base_url: impl Into<String>, token: AccessToken) -> Result<Self, ApiError> {
        Self::with_options(base_url, token, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        token: AccessToken,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&base_url.into()),
            token,
            user_agent: options.user_agent,
            request_timeout: options.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.token
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fetches general server information (`GET /api/v2/instance`).
    pub async fn instance(&self) -> Result<Instance, ApiError> {
        let body = self.get_text(INSTANCE_PATH).await?;
        serde_json::from_str(&body).map_err(|err| ApiError::Parse(err.to_string()))
    }

    /// Calls the streaming liveness endpoint and returns the raw body.
    pub async fn streaming_health(&self) -> Result<String, ApiError> {
        self.get_text(STREAMING_HEALTH_PATH).await
    }

    /// Resolves the streaming endpoint and returns a connector for it.
    pub async fn streaming(&self) -> Result<StreamingClient, StreamError> {
        StreamingClient::discover(self.clone()).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let endpoint = self.endpoint(path);
        debug!(event = "rest_request", method = "GET", endpoint = %endpoint);

        let response = self
            .http
            .get(&endpoint)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, self.token.authorization())
            .send()
            .await
            .map_err(ApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ApiError::Transport)?;

        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(body)
    }
}

impl fmt::Debug for MastodonClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MastodonClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Subset of the v2 instance entity.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Instance {
    /// Domain name of the server.
    pub domain: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Mastodon version string.
    #[serde(default)]
    pub version: String,
    /// Where the server's source code is published.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Server configuration, including advertised URLs.
    #[serde(default)]
    pub configuration: Option<InstanceConfiguration>,
}

impl Instance {
    /// Streaming base URL advertised by the server, if any.
    pub fn streaming_url(&self) -> Option<&str> {
        self.configuration
            .as_ref()?
            .urls
            .as_ref()?
            .streaming
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InstanceConfiguration {
    /// URLs advertised by the server.
    #[serde(default)]
    pub urls: Option<InstanceUrls>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InstanceUrls {
    /// Streaming base URL.
    #[serde(default)]
    pub streaming: Option<String>,
    /// Status page URL.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_description: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error_description.or(parsed.error) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_base_url, summarize_error_body, AccessToken, Instance, MastodonClient,
        DEFAULT_USER_AGENT,
    };

    #[test]
    fn bearer_token_builds_authorization_header() {
        let token = AccessToken::bearer("abc123");
        assert_eq!(token.authorization(), "Bearer abc123");
        assert_eq!(token.token_type(), "Bearer");
    }

    #[test]
    fn access_token_debug_redacts_secret() {
        let token = AccessToken::bearer("very-secret").with_scope("read");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("read"));
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(
            normalize_base_url(" https://mastodon.social/ \n"),
            "https://mastodon.social"
        );
        let client = MastodonClient::new("https://mastodon.social/", AccessToken::bearer("t"))
            .expect("build client");
        assert_eq!(client.base_url(), "https://mastodon.social");
        assert_eq!(client.user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn instance_exposes_streaming_url() {
        let payload = r#"{
            "domain": "mastodon.social",
            "title": "Mastodon",
            "version": "4.2.0",
            "usage": {"users": {"active_month": 1}},
            "configuration": {
                "urls": {"streaming": "wss://streaming.mastodon.social"},
                "statuses": {"max_characters": 500}
            }
        }"#;
        let instance: Instance = serde_json::from_str(payload).expect("parse instance");
        assert_eq!(instance.domain, "mastodon.social");
        assert_eq!(
            instance.streaming_url(),
            Some("wss://streaming.mastodon.social")
        );
    }

    #[test]
    fn instance_without_urls_has_no_streaming_url() {
        let instance: Instance =
            serde_json::from_str(r#"{"domain":"example.org","configuration":{"urls":{"streaming":" "}}}"#)
                .expect("parse instance");
        assert_eq!(instance.streaming_url(), None);

        let bare: Instance =
            serde_json::from_str(r#"{"domain":"example.org"}"#).expect("parse instance");
        assert_eq!(bare.streaming_url(), None);
    }

    #[test]
    fn error_body_prefers_mastodon_envelope() {
        assert_eq!(
            summarize_error_body(r#"{"error":"The access token is invalid"}"#),
            "The access token is invalid"
        );
        let long = "x".repeat(500);
        assert_eq!(summarize_error_body(&long).len(), 220);
    }
}
