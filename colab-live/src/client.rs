//! WebSocket client for the list editor endpoint.
//!
//! Used by tests and tooling to drive a server the way a browser does:
//! connect with an identity, send actions, and receive the rendered
//! fragments as [`ClientEvent`]s.

use std::sync::Arc;

use colab_core::{ListId, User};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    /// A rendered fragment pushed by the server.
    Fragment(String),
    /// The connection ended; `reason` carries the close frame text or the
    /// transport error, if any.
    Disconnected { reason: Option<String> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    ChannelClosed,
}

pub struct ListClient {
    list_id: ListId,
    user: User,
    /// Endpoint URL without query, e.g. `ws://127.0.0.1:8080/ws/list-editor`
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl ListClient {
    pub fn new(list_id: ListId, user: User, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            list_id,
            user,
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Full handshake URL including the identity query.
    pub fn url(&self) -> String {
        format!(
            "{}?listId={}&userId={}&name={}",
            self.server_url,
            self.list_id,
            self.user.id,
            urlencoding::encode(&self.user.name)
        )
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.url()).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Connect(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing frames; close once the sender is dropped
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = event_tx.send(ClientEvent::Fragment(text.to_string())).await;
                    }
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Err(e) => {
                        reason = Some(e.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
        });

        Ok(())
    }

    pub async fn send_action(&self, action: &Action) -> Result<(), ClientError> {
        self.send_text(action.encode()).await
    }

    /// Send a raw text frame, valid action or not.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(text.into())
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Close the connection. The server detaches this client.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn list_id(&self) -> ListId {
        self.list_id
    }

    pub fn user(&self) -> &User {
        &self.user
    }
}
