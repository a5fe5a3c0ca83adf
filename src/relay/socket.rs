//! Channel-bound relay socket.
//!
//! [`Relay`] binds one [`Connection`] to one broadcast channel (read) and
//! one control channel (write), decodes every inbound frame and hands it to
//! a [`Dispatch`] implementation on a dedicated task. [`PubSubSocket`] is
//! the variant with a [`Registry`] behind it, so independent components
//! can subscribe by message type.
//!
//! # Usage
//!
//! ```ignore
//! let settings = RelaySettings::new(
//!     "http://localhost:5000",
//!     ChannelBinding::new("memoryexpt3", "memoryexpt3_ctrl"),
//! );
//! let socket = PubSubSocket::connect(&settings);
//! socket.subscribe("change_of_turn", |msg| log::info!("{msg:?}"));
//! socket.open().await?;
//! socket.send(&Connect { player_id: "7".into() })?;
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::codec::{ChannelBinding, FrameError};
use super::connection::{preview, BackoffPolicy, Connection, ConnectionState};
use super::dispatch::{Dispatch, DispatchOutcome};
use super::message::Message;
use super::registry::{Registry, SubscriptionId};

/// Where and how a relay connects.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    /// Experiment server root (`http(s)://` or `ws(s)://`).
    pub server_url: String,
    /// Websocket endpoint path on the server.
    pub endpoint: String,
    /// Channels this relay is bound to.
    pub binding: ChannelBinding,
    /// Reconnect timing.
    pub backoff: BackoffPolicy,
}

impl RelaySettings {
    /// Settings for the default `chat` endpoint and backoff.
    pub fn new(server_url: impl Into<String>, binding: ChannelBinding) -> Self {
        Self {
            server_url: server_url.into(),
            endpoint: String::from("chat"),
            binding,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Full websocket URL including the subscription query string.
    pub fn url(&self) -> String {
        crate::ws::endpoint_url(
            &self.server_url,
            &self.endpoint,
            self.binding.broadcast(),
            self.binding.lag_tolerance(),
        )
    }
}

/// Errors surfaced to relay callers.
///
/// Dropped inbound frames are never reported here; they are logged where
/// they are dropped.
#[derive(Debug)]
pub enum RelayError {
    /// Outbound message could not be serialized.
    Encode(FrameError),
    /// The relay has shut down.
    Closed,
    /// The first open did not happen in time.
    OpenTimeout(Duration),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Encode failed: {e}"),
            Self::Closed => write!(f, "Relay closed"),
            Self::OpenTimeout(after) => {
                write!(f, "Relay did not open within {:.1}s", after.as_secs_f32())
            }
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for RelayError {
    fn from(e: FrameError) -> Self {
        Self::Encode(e)
    }
}

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Decoded and handed to this many handlers.
    Delivered(usize),
    /// Decoded, but nobody handles its type.
    Unhandled,
    /// Not decoded; dropped.
    Dropped(FrameError),
    /// Decoded, but the handler panicked.
    Panicked,
}

/// Decode one raw frame for `binding` and dispatch it.
///
/// Never fails: wrong-channel and malformed frames are logged and dropped,
/// and a panicking handler is logged so the next frame still gets through.
pub fn deliver_frame<D: Dispatch + ?Sized>(
    binding: &ChannelBinding,
    raw: &str,
    dispatcher: &mut D,
) -> FrameOutcome {
    let message = match binding.decode(raw) {
        Ok(message) => message,
        Err(e @ FrameError::WrongChannel { .. }) => {
            log::debug!("[Relay] {e}. Ignoring.");
            return FrameOutcome::Dropped(e);
        }
        Err(e) => {
            log::warn!("[Relay] {e}; dropping frame: {}", preview(raw));
            return FrameOutcome::Dropped(e);
        }
    };

    match catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(&message))) {
        Ok(DispatchOutcome::Delivered(n)) => FrameOutcome::Delivered(n),
        Ok(DispatchOutcome::Unhandled) => FrameOutcome::Unhandled,
        Err(_) => {
            log::error!("[Relay] Handler panicked handling '{}'", message.kind);
            FrameOutcome::Panicked
        }
    }
}

/// Single consumer of raw frames: decode and dispatch in arrival order.
async fn run_inbound_loop<D: Dispatch>(
    binding: ChannelBinding,
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    mut dispatcher: D,
) {
    while let Some(raw) = inbound_rx.recv().await {
        deliver_frame(&binding, &raw, &mut dispatcher);
    }
    log::debug!("[Relay] Inbound loop for {} finished", binding.broadcast());
}

/// A connection bound to one broadcast and one control channel.
#[derive(Debug)]
pub struct Relay {
    binding: ChannelBinding,
    connection: Connection,
}

impl Relay {
    /// Connect in the background and dispatch inbound messages to
    /// `dispatcher`. Must be called from within a tokio runtime.
    pub fn connect<D: Dispatch + 'static>(settings: &RelaySettings, dispatcher: D) -> Self {
        let url = settings.url();
        log::info!(
            "[Relay] Starting relay on {} (broadcast={}, control={})",
            url,
            settings.binding.broadcast(),
            settings.binding.control()
        );
        let (connection, inbound_rx) = Connection::start(url, settings.backoff);
        tokio::spawn(run_inbound_loop(
            settings.binding.clone(),
            inbound_rx,
            dispatcher,
        ));
        Self {
            binding: settings.binding.clone(),
            connection,
        }
    }

    /// Channels this relay is bound to.
    pub fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    /// Resolve once the connection has opened for the first time.
    ///
    /// Never resolves while the server stays unreachable; use
    /// [`Self::open_timeout`] to bound the wait.
    pub async fn open(&self) -> Result<(), RelayError> {
        self.connection.opened().await.map_err(|_| RelayError::Closed)
    }

    /// Like [`Self::open`], failing with [`RelayError::OpenTimeout`] after
    /// `timeout`.
    pub async fn open_timeout(&self, timeout: Duration) -> Result<(), RelayError> {
        tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| RelayError::OpenTimeout(timeout))?
    }

    /// Send a message on the control channel (client to server).
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RelayError> {
        let frame = self.binding.encode_control(message)?;
        log::info!(
            "[Relay] Sending message to the {} channel: {}",
            self.binding.control(),
            preview(&frame[self.binding.control().len() + 1..])
        );
        self.push(frame)
    }

    /// Send a message on the broadcast channel, for fan-out to every peer.
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RelayError> {
        let frame = self.binding.encode_broadcast(message)?;
        log::info!(
            "[Relay] Broadcasting message to the {} channel: {}",
            self.binding.broadcast(),
            preview(&frame[self.binding.broadcast().len() + 1..])
        );
        self.push(frame)
    }

    fn push(&self, frame: String) -> Result<(), RelayError> {
        if self.connection.send(frame) {
            Ok(())
        } else {
            Err(RelayError::Closed)
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes (including reconnects).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Number of times the connection re-opened after the first open.
    pub fn reconnects(&self) -> u64 {
        self.connection.reconnects()
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.connection.shutdown();
    }

    /// Close, flushing frames already sent, and wait for the socket to go.
    pub async fn close_gracefully(&self) {
        self.connection.shutdown();
        self.connection.closed().await;
    }
}

/// A relay whose inbound messages feed a subscription registry.
#[derive(Debug)]
pub struct PubSubSocket {
    relay: Relay,
    registry: Registry,
}

impl PubSubSocket {
    /// Connect with a fresh registry.
    pub fn connect(settings: &RelaySettings) -> Self {
        Self::with_registry(settings, Registry::new())
    }

    /// Connect, dispatching into an existing registry.
    pub fn with_registry(settings: &RelaySettings, registry: Registry) -> Self {
        let relay = Relay::connect(settings, registry.clone());
        Self { relay, registry }
    }

    /// The underlying relay.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// The registry inbound messages are published to.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// See [`Registry::subscribe`].
    pub fn subscribe<F>(&self, kind: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.registry.subscribe(kind, callback)
    }

    /// See [`Registry::subscribe_with`].
    pub fn subscribe_with<C, F>(
        &self,
        kind: &str,
        context: &std::sync::Arc<C>,
        callback: F,
    ) -> SubscriptionId
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &Message) + Send + Sync + 'static,
    {
        self.registry.subscribe_with(kind, context, callback)
    }

    /// See [`Registry::unsubscribe`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// See [`Relay::open`].
    pub async fn open(&self) -> Result<(), RelayError> {
        self.relay.open().await
    }

    /// See [`Relay::open_timeout`].
    pub async fn open_timeout(&self, timeout: Duration) -> Result<(), RelayError> {
        self.relay.open_timeout(timeout).await
    }

    /// See [`Relay::send`].
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RelayError> {
        self.relay.send(message)
    }

    /// See [`Relay::broadcast`].
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RelayError> {
        self.relay.broadcast(message)
    }

    /// See [`Relay::close`].
    pub fn close(&self) {
        self.relay.close();
    }

    /// See [`Relay::close_gracefully`].
    pub async fn close_gracefully(&self) {
        self.relay.close_gracefully().await;
    }
}
