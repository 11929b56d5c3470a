//! Frame-level view of a websocket used by [`EventStream`].
//!
//! The session only needs outbound text/close frames and inbound text chunks,
//! so any transport can be plugged in by providing a [`FrameSink`] and a
//! [`FrameSource`].
//!
//! [`EventStream`]: crate::stream::session::EventStream

use std::pin::Pin;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

/// Frame written by the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// One complete text message.
    Text(String),
    /// Normal-closure close frame.
    Close,
}

impl OutboundFrame {
    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Close => Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })),
        }
    }
}

/// Frame delivered to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A piece of a text message; `last` marks the final piece.
    Text { text: String, last: bool },
    /// The peer started the closing handshake.
    Close,
}

impl InboundFrame {
    pub fn text(text: impl Into<String>, last: bool) -> Self {
        Self::Text {
            text: text.into(),
            last,
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<OutboundFrame, Error = WsError> + Send>>;
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<InboundFrame, WsError>> + Send>>;

/// Splits a connected websocket into session frame halves.
///
/// tungstenite already joins continuation frames, so every text message
/// arrives as a single final chunk. Ping/pong and binary frames are dropped.
pub fn websocket<S>(socket: WebSocketStream<S>) -> (FrameSink, FrameSource)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = socket.split();
    let sink = sink.with(|frame: OutboundFrame| {
        future::ready(Ok::<Message, WsError>(frame.into_message()))
    });
    let source = source.filter_map(|item| future::ready(inbound_frame(item)));
    (Box::pin(sink), Box::pin(source))
}

fn inbound_frame(item: Result<Message, WsError>) -> Option<Result<InboundFrame, WsError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(InboundFrame::text(text.to_string(), true))),
        Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
        Ok(other) => {
            trace!(event = "frame_ignored", len = other.len());
            None
        }
        Err(err) => Some(Err(err)),
    }
}
