use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::api::ApiError;
use crate::stream::session::SessionState;

/// Coarse classification of [`StreamError`] values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Handshake/open failure; no session was produced.
    Connection,
    /// Send failure, socket failure or REST transport failure.
    Transport,
    /// A completed inbound message was not a valid event.
    Decode,
    /// Operation invoked while the session is not open.
    IllegalState,
    /// Caller supplied an unusable argument.
    InvalidArgument,
}

/// Errors produced by the streaming connector and sessions.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open stream at {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: WsError,
    },

    #[error("stream handshake with {endpoint} did not complete within {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("websocket error: {0}")]
    Transport(#[from] WsError),

    #[error("outbound frame was not flushed within {0:?}")]
    SendTimeout(Duration),

    #[error("rest call failed: {0}")]
    Http(#[from] ApiError),

    /// `message` holds the start of the offending text.
    #[error("failed to decode event: {source} (message: {message})")]
    Decode {
        #[source]
        source: serde_json::Error,
        message: String,
    },

    #[error("failed to encode subscription: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session is {0}")]
    IllegalState(SessionState),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::ConnectTimeout { .. } | Self::InvalidHeader(_) => {
                ErrorKind::Connection
            }
            Self::Transport(_) | Self::SendTimeout(_) | Self::Http(_) => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Encode(_) | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}
