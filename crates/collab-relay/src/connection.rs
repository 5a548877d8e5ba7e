//! Individual client connection management.
//!
//! Each accepted connection wraps a WebSocket stream split into read and
//! write halves. A spawned read task forwards frames to the server's event
//! channel; frames over the size cap close the socket with 1009 before any
//! processing.

use anyhow::{anyhow, Result};
use collab_core::protocol::MAX_MESSAGE_SIZE;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, warn};

type WriteHalf = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Message received from a client connection.
#[derive(Debug)]
pub struct IncomingMessage {
    pub connection_id: u64,
    pub data: Vec<u8>,
}

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Received a message from the client
    Message(IncomingMessage),
    /// Connection was closed (by the peer, an error, or a policy close)
    Closed { connection_id: u64 },
}

/// A single accepted WebSocket connection.
pub struct ClientConnection {
    pub connection_id: u64,
    write: Arc<Mutex<WriteHalf>>,
    read_task: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Wrap an accepted WebSocket stream. Spawns the read task, which
    /// forwards frames to the event channel.
    pub fn new(
        connection_id: u64,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));

        let read_write = Arc::clone(&write);
        let read_task = tokio::spawn(async move {
            Self::read_loop(connection_id, read, read_write, event_tx).await;
        });

        Self {
            connection_id,
            write,
            read_task: Some(read_task),
        }
    }

    async fn read_loop(
        connection_id: u64,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        write: Arc<Mutex<WriteHalf>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data,
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from conn-{}", connection_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from conn-{} exceeds max size ({} > {}), closing",
                            connection_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        let mut w = write.lock().await;
                        let _ = w
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Size,
                                reason: "message too large".into(),
                            })))
                            .await;
                        break;
                    }

                    let _ = event_tx.send(ConnectionEvent::Message(IncomingMessage {
                        connection_id,
                        data,
                    }));
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection conn-{} closed", connection_id);
                        }
                        _ => {
                            error!("WebSocket error on conn-{}: {}", connection_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection conn-{} stream ended", connection_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { connection_id });
    }

    /// Send binary data to the client.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Close the connection with a specific close code and drop the read
    /// task.
    pub async fn close_with(&mut self, code: CloseCode, reason: &'static str) {
        {
            let mut write = self.write.lock().await;
            let _ = write
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
        }
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }

    /// Close with 1008 (policy violation).
    pub async fn close_policy_violation(&mut self, reason: &'static str) {
        self.close_with(CloseCode::Policy, reason).await;
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
