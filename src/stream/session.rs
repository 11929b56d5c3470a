//! Event stream session bound to one websocket.
//!
//! `EventStream` owns the outbound half of the socket and a background
//! receive task that owns the inbound half. The task pulls one chunk at a
//! time, joins chunks into complete messages, decodes each message into an
//! [`Event`] and hands it synchronously to every registered consumer.
//!
//! Consumers live in a copy-on-write registry: dispatch iterates over a
//! snapshot, so registering a consumer from inside another consumer never
//! disturbs the event currently being delivered and takes effect from the
//! next event.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::stream::error::StreamError;
use crate::stream::proto::{decode_event, Event, Subscription};
use crate::stream::transport::{FrameSink, FrameSource, InboundFrame, OutboundFrame};
use crate::timeout::within;

/// Lifecycle of a session. Connecting happens before a session exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Connected; events flow and subscriptions can change.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// No further frames are read or written.
    Closed,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closing => f.write_str("closing"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

type Consumer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Append-only consumer list iterated through snapshots.
struct Registry<T> {
    entries: RwLock<Arc<Vec<Consumer<T>>>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn push(&self, consumer: Consumer<T>) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(consumer);
        *guard = Arc::new(next);
    }

    fn snapshot(&self) -> Arc<Vec<Consumer<T>>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        self.snapshot().len()
    }
}

/// Joins text chunks into complete messages.
#[derive(Debug, Default)]
struct FrameAssembler {
    buffer: String,
}

impl FrameAssembler {
    /// Appends a chunk; returns the whole message once the final chunk lands.
    fn push(&mut self, chunk: &str, last: bool) -> Option<String> {
        self.buffer.push_str(chunk);
        last.then(|| std::mem::take(&mut self.buffer))
    }

    fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

struct Shared {
    sink: Mutex<FrameSink>,
    state: watch::Sender<SessionState>,
    consumers: Registry<Event>,
    error_consumers: Registry<StreamError>,
    send_timeout: Option<Duration>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        match self.state() {
            SessionState::Open => Ok(()),
            other => Err(StreamError::IllegalState(other)),
        }
    }

    /// Moves `Open` to `Closing`; false when already closing or closed.
    fn begin_close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != SessionState::Open {
                return false;
            }
            *state = SessionState::Closing;
            true
        })
    }

    fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = SessionState::Closed;
            true
        });
    }

    fn register(&self, consumer: Consumer<Event>) -> Result<(), StreamError> {
        self.ensure_open()?;
        self.consumers.push(consumer);
        Ok(())
    }

    /// Writes one frame and waits until the sink has flushed it.
    ///
    /// The sink lock serialises concurrent writers so frames never interleave.
    async fn send(&self, frame: OutboundFrame, require_open: bool) -> Result<(), StreamError> {
        let mut sink = self.sink.lock().await;
        if require_open {
            self.ensure_open()?;
        }
        match within(self.send_timeout, sink.send(frame)).await {
            Ok(result) => result.map_err(StreamError::Transport),
            Err(limit) => Err(StreamError::SendTimeout(limit)),
        }
    }

    fn dispatch(&self, message: &str) {
        match decode_event(message) {
            Ok(event) => {
                let consumers = self.consumers.snapshot();
                trace!(
                    event = "event_dispatch",
                    kind = %event.kind,
                    consumers = consumers.len()
                );
                for consumer in consumers.iter() {
                    consumer(&event);
                }
            }
            Err(err) => {
                warn!(event = "event_decode_failed", error = %err);
                self.report(err);
            }
        }
    }

    fn report(&self, error: StreamError) {
        for consumer in self.error_consumers.snapshot().iter() {
            consumer(&error);
        }
    }
}

/// One open streaming connection plus its dispatch state.
///
/// Share it across tasks behind an `Arc` to subscribe from several places;
/// dropping the last handle closes the socket.
pub struct EventStream {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl EventStream {
    /// Starts a session over an already opened transport.
    ///
    /// Must be called from within a tokio runtime; the receive task is
    /// spawned immediately.
    pub fn from_transport(
        sink: FrameSink,
        source: FrameSource,
        send_timeout: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Open);
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            state,
            consumers: Registry::new(),
            error_consumers: Registry::new(),
            send_timeout,
        });
        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared), source));
        Self { shared, receiver }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Adds a consumer that receives every event decoded from now on.
    pub fn register_consumer<F>(&self, consumer: F) -> Result<(), StreamError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.register(Arc::new(consumer))
    }

    /// Adds a consumer for errors raised while receiving, such as messages
    /// that could not be decoded.
    pub fn register_error_consumer<F>(&self, consumer: F) -> Result<(), StreamError>
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.shared.ensure_open()?;
        self.shared.error_consumers.push(Arc::new(consumer));
        Ok(())
    }

    /// Returns a handle for registering consumers from inside consumers.
    pub fn registrar(&self) -> ConsumerRegistrar {
        ConsumerRegistrar {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.consumers.len()
    }

    /// Sends a subscription change and waits until it has been written.
    pub async fn change_subscription(&self, subscription: &Subscription) -> Result<(), StreamError> {
        self.shared.ensure_open()?;
        let text = subscription.to_text()?;
        debug!(
            event = "subscription_change",
            action = %subscription.action(),
            stream = subscription.topic().stream_name()
        );
        self.shared.send(OutboundFrame::Text(text), true).await
    }

    /// Sends a normal-closure frame and waits until it has been written.
    ///
    /// Closing an already closing or closed session is a no-op.
    pub async fn close(&self) -> Result<(), StreamError> {
        if !self.shared.begin_close() {
            return Ok(());
        }
        debug!(event = "stream_close_requested");
        let result = self.shared.send(OutboundFrame::Close, false).await;
        self.shared.mark_closed();
        result
    }

    /// Resolves once the session is closed by either side.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            if current.is_closed() {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.mark_closed();
        self.receiver.abort();
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state())
            .field("consumers", &self.consumer_count())
            .finish_non_exhaustive()
    }
}

/// Weak handle that can register consumers without keeping the session alive.
#[derive(Clone)]
pub struct ConsumerRegistrar {
    shared: Weak<Shared>,
}

impl ConsumerRegistrar {
    pub fn register_consumer<F>(&self, consumer: F) -> Result<(), StreamError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let shared = self
            .shared
            .upgrade()
            .ok_or(StreamError::IllegalState(SessionState::Closed))?;
        shared.register(Arc::new(consumer))
    }
}

impl fmt::Debug for ConsumerRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistrar").finish_non_exhaustive()
    }
}

/// Pulls chunks one at a time until the socket or the session closes.
///
/// The next chunk is only requested after the previous one has been fully
/// dispatched, which keeps at most one message in memory.
async fn receive_loop(shared: Arc<Shared>, mut source: FrameSource) {
    let mut state = shared.state.subscribe();
    let mut assembler = FrameAssembler::default();

    loop {
        let current = *state.borrow_and_update();
        if current.is_closed() {
            break;
        }

        let next = tokio::select! {
            next = source.next() => next,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        if shared.state().is_closed() {
            break;
        }

        match next {
            Some(Ok(InboundFrame::Text { text, last })) => {
                trace!(
                    event = "chunk_received",
                    len = text.len(),
                    last,
                    pending = assembler.pending_len()
                );
                if let Some(message) = assembler.push(&text, last) {
                    shared.dispatch(&message);
                }
            }
            Some(Ok(InboundFrame::Close)) => {
                debug!(event = "stream_close_received");
                shared.begin_close();
            }
            Some(Err(err)) => {
                warn!(event = "stream_receive_failed", error = %err);
                shared.mark_closed();
                shared.report(StreamError::Transport(err));
                break;
            }
            None => break,
        }
    }

    shared.mark_closed();
    debug!(event = "stream_closed");
}
