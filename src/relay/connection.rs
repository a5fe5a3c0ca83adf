//! Reconnecting framed connection.
//!
//! Owns one websocket to a fixed endpoint and hides drops behind a
//! background task that reconnects with exponential backoff and jitter.
//!
//! # Architecture
//!
//! ```text
//!   Connection (handle)                 Background task
//!         │                                   │
//!         │  send(text) ─── outbound mpsc ──► │ ──► WsWriter
//!         │                                   │
//!         │  ◄── inbound mpsc (raw frames) ── │ ◄── WsReader
//!         │                                   │
//!         │  opened() / state() ◄── watch ─── │ (Connecting/Open/Reconnecting/Closed)
//! ```
//!
//! # Delivery
//!
//! - Fire-and-forget: no acknowledgement, no backpressure.
//! - Frames queued while the socket is down are dropped and logged, never
//!   replayed after a reconnect.
//! - Inbound text frames are forwarded in arrival order to a single
//!   receiver.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Lifecycle of the underlying socket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    #[default]
    Connecting,
    /// Socket is open and frames flow.
    Open,
    /// Socket dropped; waiting before the next attempt.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Milliseconds until the next attempt.
        next_retry_ms: u64,
    },
    /// Shut down for good.
    Closed,
}

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for the doubling delay.
    pub max: Duration,
    /// Per-attempt handshake timeout.
    pub handshake_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Handle to a reconnecting connection.
///
/// Dropping the handle shuts the background task down.
#[derive(Debug)]
pub struct Connection {
    url: String,
    outbound_tx: mpsc::UnboundedSender<String>,
    state_rx: watch::Receiver<ConnectionState>,
    opens_rx: watch::Receiver<u64>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The background task has exited and the connection will never open again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed;

impl std::fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection closed")
    }
}

impl std::error::Error for ConnectionClosed {}

impl Connection {
    /// Start connecting to `url` in the background.
    ///
    /// Returns the handle and the receiver for raw inbound text frames.
    /// Must be called from within a tokio runtime.
    pub fn start(
        url: impl Into<String>,
        policy: BackoffPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (opens_tx, opens_rx) = watch::channel(0u64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection_loop(
            LoopConfig {
                url: url.clone(),
                policy,
            },
            LoopChannels {
                outbound_rx,
                inbound_tx,
                state_tx,
                opens_tx,
                shutdown_rx,
            },
        ));

        (
            Self {
                url,
                outbound_tx,
                state_rx,
                opens_rx,
                shutdown_tx,
                task,
            },
            inbound_rx,
        )
    }

    /// Endpoint this connection targets.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve once the socket has opened for the first time.
    ///
    /// Resolves immediately if that already happened. Later reconnects do
    /// not re-trigger it; watch [`Self::state`] or [`Self::reconnects`] for
    /// those.
    pub async fn opened(&self) -> Result<(), ConnectionClosed> {
        let mut opens = self.opens_rx.clone();
        opens
            .wait_for(|count| *count > 0)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionClosed)
    }

    /// Queue a text frame. Returns `false` if the connection is shut down.
    pub fn send(&self, text: String) -> bool {
        self.outbound_tx.send(text).is_ok()
    }

    /// Current socket state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Number of successful re-opens after the first one.
    pub fn reconnects(&self) -> u64 {
        self.opens_rx.borrow().saturating_sub(1)
    }

    /// Ask the background task to close the socket and stop reconnecting.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Resolve once the background task has closed the socket for good.
    pub async fn closed(&self) {
        let mut state = self.state_rx.clone();
        let _ = state
            .wait_for(|s| matches!(s, ConnectionState::Closed))
            .await;
    }

    /// Whether the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoopConfig {
    url: String,
    policy: BackoffPolicy,
}

struct LoopChannels {
    outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
    state_tx: watch::Sender<ConnectionState>,
    opens_tx: watch::Sender<u64>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Result of the inner message loop.
enum ConnectionLoopExit {
    /// Shutdown was requested (or every handle is gone).
    Shutdown,
    /// Connection was lost; reconnect.
    Disconnected,
}

/// Connect, run, and reconnect until shutdown.
async fn run_connection_loop(config: LoopConfig, mut channels: LoopChannels) {
    let mut attempt: u32 = 0;

    loop {
        if *channels.shutdown_rx.borrow() {
            break;
        }

        log::info!("[Connection] Connecting to {}", config.url);
        let connected =
            tokio::time::timeout(config.policy.handshake_timeout, ws::connect(&config.url)).await;

        match connected {
            Ok(Ok((mut writer, mut reader))) => {
                attempt = 0;
                drop_stale_frames(&mut channels.outbound_rx);
                channels.opens_tx.send_modify(|count| *count += 1);
                let _ = channels.state_tx.send(ConnectionState::Open);
                log::info!("[Connection] Open ({})", config.url);

                let exit = run_message_loop(&mut writer, &mut reader, &mut channels).await;
                if let ConnectionLoopExit::Shutdown = exit {
                    let _ = writer.close().await;
                    break;
                }
                log::warn!("[Connection] Disconnected from {}", config.url);
            }
            Ok(Err(e)) => {
                log::warn!("[Connection] Connection failed: {e:#}");
            }
            Err(_) => {
                log::warn!(
                    "[Connection] Handshake timed out after {}s",
                    config.policy.handshake_timeout.as_secs_f32()
                );
            }
        }

        attempt = attempt.saturating_add(1);
        let jitter_ms = rand::random::<u64>() % 250;
        let wait = config.policy.delay(attempt) + Duration::from_millis(jitter_ms);
        let _ = channels.state_tx.send(ConnectionState::Reconnecting {
            attempt,
            next_retry_ms: wait.as_millis() as u64,
        });
        log::info!(
            "[Connection] Reconnecting in {:.1}s (attempt {})",
            wait.as_secs_f32(),
            attempt
        );

        if wait_backoff(wait, &mut channels).await {
            break;
        }
    }

    let _ = channels.state_tx.send(ConnectionState::Closed);
    log::info!("[Connection] Closed ({})", config.url);
}

/// Frames queued while the socket was down are not replayed.
fn drop_stale_frames(outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    let mut dropped = 0usize;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        log::warn!("[Connection] Dropped {dropped} frame(s) queued while disconnected");
    }
}

/// Sleep out the backoff while discarding outbound frames.
///
/// Returns `true` if shutdown was requested meanwhile.
async fn wait_backoff(wait: Duration, channels: &mut LoopChannels) -> bool {
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return false,
            changed = channels.shutdown_rx.changed() => {
                if changed.is_err() || *channels.shutdown_rx.borrow() {
                    return true;
                }
            }
            frame = channels.outbound_rx.recv() => match frame {
                Some(text) => {
                    log::warn!("[Connection] Not connected, dropping frame: {}", preview(&text));
                }
                None => return true,
            }
        }
    }
}

/// Pump frames both ways until the socket drops or shutdown is requested.
async fn run_message_loop(
    writer: &mut WsWriter,
    reader: &mut WsReader,
    channels: &mut LoopChannels,
) -> ConnectionLoopExit {
    loop {
        tokio::select! {
            changed = channels.shutdown_rx.changed() => {
                if changed.is_err() || *channels.shutdown_rx.borrow() {
                    log::info!("[Connection] Shutdown requested, closing socket");
                    flush_pending(writer, &mut channels.outbound_rx).await;
                    return ConnectionLoopExit::Shutdown;
                }
            }

            frame = channels.outbound_rx.recv() => {
                let Some(text) = frame else {
                    return ConnectionLoopExit::Shutdown;
                };
                log::debug!("[Connection] Sending frame: {}", preview(&text));
                if let Err(e) = writer.send_text(text).await {
                    log::warn!("[Connection] Send failed, frame lost: {e:#}");
                    return ConnectionLoopExit::Disconnected;
                }
            }

            msg = reader.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    log::trace!("[Connection] Received frame: {}", preview(&text));
                    if channels.inbound_tx.send(text).is_err() {
                        log::trace!("[Connection] No inbound consumer, frame discarded");
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(WsMessage::Close(why))) => {
                    log::info!("[Connection] Closed by server ({why})");
                    return ConnectionLoopExit::Disconnected;
                }
                Some(Err(e)) => {
                    log::warn!("[Connection] Read error: {e:#}");
                    return ConnectionLoopExit::Disconnected;
                }
                None => {
                    log::info!("[Connection] Stream ended");
                    return ConnectionLoopExit::Disconnected;
                }
            }
        }
    }
}

/// Write frames that were queued before shutdown was requested.
async fn flush_pending(writer: &mut WsWriter, outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    while let Ok(text) = outbound_rx.try_recv() {
        log::debug!("[Connection] Flushing frame: {}", preview(&text));
        if let Err(e) = writer.send_text(text).await {
            log::warn!("[Connection] Flush failed, frame lost: {e:#}");
            return;
        }
    }
}

/// Log-safe prefix of a frame.
pub(crate) fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(3));
        assert_eq!(policy.delay(40), Duration::from_secs(3));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_reconnecting() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            handshake_timeout: Duration::from_millis(500),
        };
        let (conn, _inbound) = Connection::start("ws://127.0.0.1:1/chat", policy);
        let mut state = conn.watch_state();
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })),
        )
        .await;
        assert!(reached.is_ok());
        assert_eq!(conn.reconnects(), 0);
        assert!(conn.send("lost:{}".into()));
    }

    #[tokio::test]
    async fn test_shutdown_before_open_fails_opened() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(10),
            handshake_timeout: Duration::from_millis(200),
        };
        let (conn, _inbound) = Connection::start("ws://127.0.0.1:1/chat", policy);
        conn.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), conn.opened()).await;
        assert_eq!(result.ok(), Some(Err(ConnectionClosed)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
