//! Mock sensor source for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and count them
//! - Push text frames to every connected client
//! - Drop every open connection on demand

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Command fanned out to every open connection.
#[derive(Debug, Clone)]
enum Command {
    Frame(String),
    Drop,
}

/// A mock upstream source.
pub struct MockSource {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    connections: Arc<AtomicU32>,
}

impl MockSource {
    /// Start a new mock source on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel::<Command>(64);
        let connections = Arc::new(AtomicU32::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let commands_clone = commands.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let commands = commands_clone.subscribe();
                        let connections = connections_clone.clone();
                        tokio::spawn(handle_connection(stream, commands, connections));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            connections,
        }
    }

    /// Get the source's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}/feed", self.addr)
    }

    /// Number of completed handshakes.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` handshakes have completed.
    pub async fn wait_for_connections(&self, n: u32, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while self.connection_count() < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Send a text frame to every open connection.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.commands.send(Command::Frame(frame.into()));
    }

    /// Close every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Shutdown the listener. Open connections stay up until dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Sensor frame with one player entry.
pub fn sensor_frame(tag: i64, speed_mps: f64, hr: f64) -> String {
    json!({
        "kind": "sensors",
        "payload": [{
            "tag": tag,
            "team_name": "Home",
            "player_info": {"jersey": 10, "f_name": "Lee", "l_name": "Park"},
            "online_data": {
                "max_speed_60_s": speed_mps,
                "hr": hr,
                "distance": 2500.0,
                "speed_z_4_dist": 120.0,
                "speed_z_5_dist": 30.5,
                "load": 41.26
            }
        }]
    })
    .to_string()
}

async fn handle_connection(
    stream: TcpStream,
    mut commands: broadcast::Receiver<Command>,
    connections: Arc<AtomicU32>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Frame(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_source_starts() {
        let source = MockSource::start().await;
        assert!(source.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(source.connection_count(), 0);
        source.shutdown().await;
    }
}
