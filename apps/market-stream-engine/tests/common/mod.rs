//! Local WebSocket venue used by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use market_stream_engine::ReconnectionPolicy;

/// How long a test waits for anything to happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// A retry schedule short enough for tests.
pub fn fast_reconnection(max_attempts: u32) -> ReconnectionPolicy {
    ReconnectionPolicy::new(
        max_attempts,
        Duration::from_millis(20),
        2.0,
        Duration::from_millis(100),
    )
}

/// Accepts WebSocket upgrades on an ephemeral port.
pub struct TestServer {
    addr: SocketAddr,
    peers: mpsc::Receiver<Peer>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if tx.send(Peer { ws }).await.is_err() {
                    break;
                }
            }
        });

        Self { addr, peers, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next client connection.
    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no client connected in time")
            .expect("listener stopped")
    }

    /// Assert no further connection arrives within `window`.
    pub async fn assert_no_connection(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.peers.recv()).await;
        assert!(next.is_err(), "unexpected reconnect");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server side of one client connection. Dropping it resets the socket.
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    /// Next text or binary frame as a string, skipping control frames.
    pub async fn next_text(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => {
                        return String::from_utf8(bytes.to_vec()).unwrap();
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => panic!("client closed the socket"),
                    Some(Err(e)) => panic!("socket error: {e}"),
                }
            }
        })
        .await
        .expect("no frame from client in time")
    }

    /// Next data frame within `window`, or `None` if the window passes or
    /// the client closes first.
    pub async fn try_next_text(&mut self, window: Duration) -> Option<String> {
        tokio::time::timeout(window, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => {
                        return Some(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    /// Send without asserting the client is still there.
    pub async fn try_send_text(&mut self, text: &str) -> bool {
        self.ws.send(Message::text(text)).await.is_ok()
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.ws.send(Message::binary(bytes.to_vec())).await.unwrap();
    }

    /// Close with a status code and wait for the client to answer.
    pub async fn close(mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.ws.close(Some(frame)).await;
        let _ = tokio::time::timeout(WAIT, async { while self.ws.next().await.is_some() {} }).await;
    }
}

/// Poll `condition` until it holds or the wait expires.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
