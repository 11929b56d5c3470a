//! Realtime streaming modules.
//!
//! - `client`: endpoint resolution, health check and websocket setup.
//! - `session`: per-connection engine that joins chunks, decodes events and
//!   fans them out to consumers.
//! - `proto`: subscription messages and the event envelope.
//! - `transport`: frame-level adapter over `tokio-tungstenite`.

/// Streaming connector.
pub mod client;
/// Error type shared by the streaming modules.
pub mod error;
/// Subscription and event wire types.
pub mod proto;
/// Event stream session.
pub mod session;
/// Websocket frame adapter.
pub mod transport;

pub use client::{StreamingClient, StreamingOptions};
pub use error::{ErrorKind, StreamError};
pub use proto::{Event, EventKind, Subscription, SubscriptionAction, Topic};
pub use session::{ConsumerRegistrar, EventStream, SessionState};
