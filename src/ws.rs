//! Websocket transport for the relay.
//!
//! [`connect`] performs the handshake and splits the socket into a
//! [`WsWriter`] for outbound text and a [`WsReader`] that yields only what
//! the relay connection acts on: text frames, pings and the close. Pongs,
//! binary and raw frames never leave this module.
//!
//! [`endpoint_url`] builds the subscription URL,
//! `ws(s)://host/<endpoint>?channel=<broadcast>&tolerance=<lag>`.

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Inbound traffic the relay connection acts on.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// Text frame, one relay frame each.
    Text(String),
    /// Ping; answer with [`WsWriter::send_pong`].
    Ping(Vec<u8>),
    /// Server closed the socket. Holds `"<code>: <reason>"`, or `"no status"`.
    Close(String),
}

/// Sending half.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<Socket, Frame>,
}

impl WsWriter {
    /// Write one text frame.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Frame::Text(text))
            .await
            .context("Failed to write text frame")
    }

    /// Answer a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(Frame::Pong(data))
            .await
            .context("Failed to write pong")
    }

    /// Send the close handshake.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("Failed to close socket")
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<Socket>,
}

impl WsReader {
    /// Next frame the relay cares about; `None` once the stream is gone.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        while let Some(frame) = self.stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e).context("Failed to read frame")),
            };
            match frame {
                Frame::Text(text) => return Some(Ok(WsMessage::Text(text))),
                Frame::Ping(data) => return Some(Ok(WsMessage::Ping(data))),
                Frame::Close(close) => {
                    let why = close.map_or_else(
                        || String::from("no status"),
                        |c| format!("{}: {}", u16::from(c.code), c.reason),
                    );
                    return Some(Ok(WsMessage::Close(why)));
                }
                Frame::Binary(data) => {
                    log::debug!("[Connection] Ignoring {}-byte binary frame", data.len());
                }
                Frame::Pong(_) | Frame::Frame(_) => {}
            }
        }
        None
    }
}

/// Open a websocket to `url` and split it.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("Websocket handshake with {url} failed"))?;
    let (sink, stream) = socket.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Subscription URL for `channel` on `endpoint` of `server_url`.
///
/// `http://` becomes `ws://` and `https://` becomes `wss://`; websocket
/// schemes are kept.
#[must_use]
pub fn endpoint_url(server_url: &str, endpoint: &str, channel: &str, tolerance: f64) -> String {
    let root = server_url.trim_end_matches('/');
    let root = if let Some(rest) = root.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = root.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        root.to_string()
    };
    format!(
        "{root}/{}?channel={channel}&tolerance={tolerance}",
        endpoint.trim_start_matches('/')
    )
}
