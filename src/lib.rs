//! Async Rust client for the Mastodon real-time streaming API.
//!
//! The crate is organized by transport surface:
//! - `api`: minimal REST client used to discover the streaming endpoint and
//!   check its health.
//! - `stream`: websocket connector, event stream sessions and wire types.

/// REST client, credentials and server metadata.
pub mod api;
/// Realtime stream connector, sessions and protocol types.
pub mod stream;

mod timeout;
