//! Streaming connector: endpoint resolution, health check and session setup.
//!
//! Every call to [`StreamingClient::stream`] opens its own websocket and
//! returns an independent [`EventStream`]; sessions are never pooled.

use std::time::Duration;

use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tracing::debug;

use crate::api::{normalize_base_url, MastodonClient};
use crate::stream::error::StreamError;
use crate::stream::session::EventStream;
use crate::stream::transport;
use crate::timeout::within;

/// Path of the websocket endpoint below the streaming base URL.
pub const STREAMING_PATH: &str = "/api/v1/streaming";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamingDefaults;

impl StreamingDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Bounds for waits on the server.
///
/// `None` waits without limit.
#[derive(Clone, Debug)]
pub struct StreamingOptions {
    /// Limit for the websocket handshake.
    pub connect_timeout: Option<Duration>,
    /// Limit for flushing one outbound frame.
    pub send_timeout: Option<Duration>,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(StreamingDefaults::CONNECT_TIMEOUT),
            send_timeout: Some(StreamingDefaults::SEND_TIMEOUT),
        }
    }
}

/// Entry point for opening event streams against one server.
#[derive(Clone, Debug)]
pub struct StreamingClient {
    api: MastodonClient,
    streaming_url: String,
    options: StreamingOptions,
}

impl StreamingClient {
    /// Creates a connector for an already known streaming base URL.
    pub fn new(api: MastodonClient, streaming_url: impl Into<String>) -> Self {
        Self {
            api,
            streaming_url: normalize_base_url(&streaming_url.into()),
            options: StreamingOptions::default(),
        }
    }

    /// Looks up the streaming base URL from the server's instance metadata.
    ///
    /// Servers that do not advertise one are assumed to serve streaming from
    /// the REST base URL.
    pub async fn discover(api: MastodonClient) -> Result<Self, StreamError> {
        let instance = api.instance().await?;
        let streaming_url = match instance.streaming_url() {
            Some(url) => url.to_string(),
            None => {
                debug!(
                    event = "streaming_url_fallback",
                    domain = %instance.domain,
                    base_url = %api.base_url()
                );
                api.base_url().to_string()
            }
        };
        Ok(Self::new(api, streaming_url))
    }

    pub fn with_options(mut self, options: StreamingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &StreamingOptions {
        &self.options
    }

    pub fn streaming_url(&self) -> &str {
        &self.streaming_url
    }

    /// Websocket URL used by [`stream`](Self::stream).
    pub fn endpoint(&self) -> String {
        streaming_endpoint(&self.streaming_url)
    }

    /// Calls the streaming health endpoint and returns the raw body.
    pub async fn health(&self) -> Result<String, StreamError> {
        Ok(self.api.streaming_health().await?)
    }

    /// Opens a new websocket and returns a session bound to it.
    ///
    /// Resolves only once the handshake has completed.
    pub async fn stream(&self) -> Result<EventStream, StreamError> {
        let endpoint = self.endpoint();
        let request = self.streaming_request(&endpoint)?;
        debug!(event = "stream_connect", endpoint = %endpoint);

        let (socket, _) = match within(self.options.connect_timeout, connect_async(request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(source)) => return Err(StreamError::Connection { endpoint, source }),
            Err(timeout) => return Err(StreamError::ConnectTimeout { endpoint, timeout }),
        };
        debug!(event = "stream_open", endpoint = %endpoint);

        let (sink, source) = transport::websocket(socket);
        Ok(EventStream::from_transport(
            sink,
            source,
            self.options.send_timeout,
        ))
    }

    fn streaming_request(&self, endpoint: &str) -> Result<Request, StreamError> {
        let mut request =
            endpoint
                .into_client_request()
                .map_err(|source| StreamError::Connection {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, self.api.user_agent().parse()?);
        headers.insert(
            AUTHORIZATION,
            self.api.access_token().authorization().parse()?,
        );
        Ok(request)
    }
}

/// Builds the websocket URL, mapping `http(s)` schemes to `ws(s)`.
fn streaming_endpoint(streaming_url: &str) -> String {
    let base = normalize_base_url(streaming_url);
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base
    };
    format!("{base}{STREAMING_PATH}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};

    use super::{streaming_endpoint, StreamingClient, StreamingDefaults, StreamingOptions};
    use crate::api::{AccessToken, MastodonClient, DEFAULT_USER_AGENT};
    use crate::stream::error::ErrorKind;

    fn client(streaming_url: &str) -> StreamingClient {
        let api = MastodonClient::new("https://mastodon.social", AccessToken::bearer("abc"))
            .expect("build api client");
        StreamingClient::new(api, streaming_url)
    }

    #[test]
    fn endpoint_keeps_websocket_scheme() {
        assert_eq!(
            streaming_endpoint("wss://streaming.mastodon.social"),
            "wss://streaming.mastodon.social/api/v1/streaming"
        );
    }

    #[test]
    fn endpoint_maps_http_schemes_and_trims() {
        assert_eq!(
            streaming_endpoint("https://mastodon.social/ \n"),
            "wss://mastodon.social/api/v1/streaming"
        );
        assert_eq!(
            streaming_endpoint("http://localhost:4000"),
            "ws://localhost:4000/api/v1/streaming"
        );
    }

    #[test]
    fn request_carries_agent_and_authorization() {
        let client = client("wss://streaming.mastodon.social");
        let endpoint = client.endpoint();
        let request = client.streaming_request(&endpoint).expect("request");

        assert_eq!(request.uri().to_string(), endpoint);
        assert_eq!(
            request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(
            request
                .headers()
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok()),
            Some(DEFAULT_USER_AGENT)
        );
    }

    #[test]
    fn invalid_endpoint_is_a_connection_error() {
        let client = client("not a url");
        let error = client
            .streaming_request(&client.endpoint())
            .expect_err("invalid url");
        assert_eq!(error.kind(), ErrorKind::Connection);
    }

    #[test]
    fn default_options_bound_waits() {
        let options = StreamingOptions::default();
        assert_eq!(options.connect_timeout, Some(StreamingDefaults::CONNECT_TIMEOUT));
        assert_eq!(options.send_timeout, Some(StreamingDefaults::SEND_TIMEOUT));

        let client = client("wss://example.org").with_options(StreamingOptions {
            connect_timeout: None,
            send_timeout: Some(Duration::from_millis(250)),
        });
        assert_eq!(client.options().connect_timeout, None);
    }
}
