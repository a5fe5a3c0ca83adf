//! Integration tests for the relay against a local websocket server.
//!
//! Each test binds a tokio-tungstenite server on 127.0.0.1:0 and drives the
//! client end to end: handshake query, framing, dispatch and reconnects.

use futures_util::{SinkExt, StreamExt};
use recall_relay::participant::{
    MessageSink, RecallDisplay, SubmitsWords, TurnBasedSubmission, WordOrigin, WordSender,
};
use recall_relay::relay::{
    kind, BackoffPolicy, ChannelBinding, Connect, ConnectionState, DispatchTable, PubSubSocket,
    Relay, RelaySettings,
};
use recall_relay::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

/// One accepted client connection.
struct ServerConn {
    /// Request path including the query string.
    path: String,
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn send(&mut self, frame: &str) {
        self.ws.send(WsFrame::Text(frame.to_string())).await.unwrap();
    }

    /// Next text frame from the client, skipping control frames.
    async fn next_text(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(WsFrame::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended before a text frame: {:?}", other),
                }
            }
        })
        .await
        .expect("timed out waiting for a client frame")
    }
}

/// Start a server; returns its http URL and the stream of accepted connections.
async fn start_server() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let accepted = tokio_tungstenite::accept_hdr_async(
                    stream,
                    |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        path = req.uri().to_string();
                        Ok(resp)
                    },
                )
                .await;
                if let Ok(ws) = accepted {
                    let _ = tx.send(ServerConn { path, ws });
                }
            });
        }
    });

    (format!("http://{}", addr), rx)
}

async fn accept(conns: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(WAIT, conns.recv())
        .await
        .expect("timed out waiting for a client")
        .expect("server stopped")
}

fn settings(server_url: &str) -> RelaySettings {
    let mut settings = RelaySettings::new(
        server_url,
        ChannelBinding::new("memoryexpt2", "memoryexpt2_ctrl"),
    );
    settings.backoff = BackoffPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(2),
    };
    settings
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let polled = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
async fn test_handshake_query_and_control_frame() {
    let (url, mut conns) = start_server().await;
    let socket = PubSubSocket::connect(&settings(&url));
    let mut server = accept(&mut conns).await;

    assert_eq!(server.path, "/chat?channel=memoryexpt2&tolerance=0.1");
    socket.open_timeout(WAIT).await.unwrap();

    socket
        .send(&Connect {
            player_id: "7".to_string(),
        })
        .unwrap();
    assert_eq!(
        server.next_text().await,
        r#"memoryexpt2_ctrl:{"type":"connect","player_id":"7"}"#
    );
}

#[tokio::test]
async fn test_broadcast_reaches_subscribers_in_order() {
    let (url, mut conns) = start_server().await;
    let socket = PubSubSocket::connect(&settings(&url));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let first = seen_tx.clone();
    socket.subscribe(kind::CHANGE_OF_TURN, move |m| {
        let _ = first.send(format!("first:{}", m.get_str("player_id").unwrap_or("?")));
    });
    let second = seen_tx;
    socket.subscribe(kind::CHANGE_OF_TURN, move |_| {
        let _ = second.send("second".to_string());
    });

    let mut server = accept(&mut conns).await;
    socket.open_timeout(WAIT).await.unwrap();

    server
        .send(r#"otherexpt:{"type":"change_of_turn","player_id":"9","turn_seconds":5}"#)
        .await;
    server.send("memoryexpt2:{not json").await;
    server.send(r#"memoryexpt2:{"type":"unknown_kind"}"#).await;
    server
        .send(r#"memoryexpt2:{"type":"change_of_turn","player_id":"3","turn_seconds":10}"#)
        .await;

    let mut seen = Vec::new();
    for _ in 0..2 {
        let next = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap();
        seen.push(next.unwrap());
    }
    assert_eq!(seen, vec!["first:3", "second"]);

    // Nothing from the foreign channel trails in behind.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_handler_panic_keeps_relay_dispatching() {
    let (url, mut conns) = start_server().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let table = DispatchTable::new()
        .on("boom", |_| panic!("handler failure"))
        .on("ok", move |m| {
            let _ = seen_tx.send(m.kind.clone());
        });
    let relay = Relay::connect(&settings(&url), table);

    let mut server = accept(&mut conns).await;
    relay.open_timeout(WAIT).await.unwrap();
    server.send(r#"memoryexpt2:{"type":"boom"}"#).await;
    server.send(r#"memoryexpt2:{"type":"ok"}"#).await;

    let delivered = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap();
    assert_eq!(delivered.as_deref(), Some("ok"));
    assert_eq!(relay.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let (url, mut conns) = start_server().await;
    let socket = PubSubSocket::connect(&settings(&url));

    let first = accept(&mut conns).await;
    socket.open_timeout(WAIT).await.unwrap();
    assert_eq!(socket.relay().reconnects(), 0);
    drop(first);

    let mut second = accept(&mut conns).await;
    eventually("reconnect", || socket.relay().reconnects() == 1).await;
    assert_eq!(socket.relay().state(), ConnectionState::Open);

    // The first-open notification stays resolved.
    socket.open().await.unwrap();

    socket
        .send(&Connect {
            player_id: "7".to_string(),
        })
        .unwrap();
    assert_eq!(
        second.next_text().await,
        r#"memoryexpt2_ctrl:{"type":"connect","player_id":"7"}"#
    );
}

#[tokio::test]
async fn test_turn_based_participant_round() {
    let (url, mut conns) = start_server().await;
    let socket = Arc::new(PubSubSocket::connect(&settings(&url)));
    let session = Session::new("7").shared();

    let display = Arc::new(RecallDisplay::new(session.clone(), |_| {}));
    display.bind_events(socket.registry());
    let sender = WordSender::new(session.clone(), Arc::clone(&socket) as Arc<dyn MessageSink>);
    let submission = Arc::new(TurnBasedSubmission::new(sender));
    Arc::clone(&submission).bind_events(socket.registry());

    let mut server = accept(&mut conns).await;
    socket.open_timeout(WAIT).await.unwrap();

    assert!(submission.submit("early").is_none());
    server
        .send(r#"memoryexpt2:{"type":"change_of_turn","player_id":7,"turn_seconds":10}"#)
        .await;
    eventually("our turn", || submission.is_enabled()).await;

    assert_eq!(submission.submit(" Apple "), Some("apple".to_string()));
    assert_eq!(
        server.next_text().await,
        r#"memoryexpt2_ctrl:{"type":"word_added","word":"apple","author":"7"}"#
    );

    server
        .send(r#"memoryexpt2:{"type":"word_transmitted","word":"pear","author":3,"recipients":"[3, 7]"}"#)
        .await;
    server
        .send(r#"memoryexpt2:{"type":"word_transmitted","word":"plum","author":3,"recipients":"[3, 5]"}"#)
        .await;
    eventually("pear listed", || !display.entries().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let entries = display.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].word, "pear");
    assert_eq!(entries[0].origin, WordOrigin::Peer("3".to_string()));

    submission.leave();
    socket.close_gracefully().await;
    assert_eq!(
        server.next_text().await,
        r#"memoryexpt2_ctrl:{"type":"disconnect","player_id":"7","words":["apple","pear"]}"#
    );
}
