//! WebSocket endpoint for the list editor.
//!
//! Architecture:
//! ```text
//! Browser A ──┐                      ┌── Session (list 1) ── Fanout ──┬─► A
//!             ├── ListServer ── Coordinator                           └─► B
//! Browser B ──┘        │             └── Session (list 2) ── Fanout ────► C
//!                      │
//!                      └── ListRepository (RocksDB or in-memory)
//! ```
//!
//! A client connects to `{editor_path}?listId=..&userId=..&name=..`.
//! Authentication happens before this endpoint; the query is trusted.
//! Each connection runs one task that reads frames, drains the session's
//! fan-out receiver and sends heartbeat pings, all in one `select!` loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colab_core::{InMemoryListRepository, ListId, ListRepository, User, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::Payload;
use crate::coordinator::{Attachment, Coordinator, CoordinatorConfig, CoordinatorError};
use crate::render::{HtmlRenderer, ViewRenderer};
use crate::storage::{ListStore, StoreConfig, StoreError};

/// Display name used when the query carries none.
const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Payloads buffered per connection before it lags
    pub fanout_capacity: usize,
    /// Heartbeat ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Drop idle sessions that have nothing unsaved
    pub evict_idle_sessions: bool,
    /// Request path of the editor endpoint
    pub editor_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            fanout_capacity: 256,
            heartbeat_interval_secs: 30,
            storage_path: None,
            evict_idle_sessions: true,
            editor_path: "/ws/list-editor".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            fanout_capacity: self.fanout_capacity,
            evict_idle_sessions: self.evict_idle_sessions,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub failed_attaches: u64,
    pub total_messages: u64,
    pub decode_failures: u64,
    pub active_sessions: usize,
}

/// Who is connecting to which list, taken from the handshake query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorQuery {
    pub list_id: ListId,
    pub user: User,
}

impl EditorQuery {
    /// Parse `path?listId=..&userId=..&name=..`. `name` is optional.
    pub fn from_uri(editor_path: &str, uri: &Uri) -> Result<Self, String> {
        if uri.path() != editor_path {
            return Err(format!("Unknown path {}", uri.path()));
        }
        let mut list_id: Option<ListId> = None;
        let mut user_id: Option<UserId> = None;
        let mut name: Option<String> = None;

        for pair in uri.query().unwrap_or_default().split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.replace('+', " ");
            let value = urlencoding::decode(&value)
                .map_err(|e| format!("Bad encoding for {key}: {e}"))?;
            match key {
                "listId" => {
                    list_id = Some(value.parse().map_err(|_| format!("Invalid listId {value:?}"))?);
                }
                "userId" => {
                    user_id = Some(value.parse().map_err(|_| format!("Invalid userId {value:?}"))?);
                }
                "name" => name = Some(value.into_owned()),
                _ => {}
            }
        }

        let list_id = list_id.ok_or("Missing listId")?;
        let user_id = user_id.ok_or("Missing userId")?;
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());
        Ok(Self {
            list_id,
            user: User::new(user_id, name),
        })
    }
}

/// What a connection does with the next item from its fan-out receiver.
#[derive(Debug, PartialEq)]
enum Outbound {
    Deliver(Message),
    /// Fragments were skipped. They are deltas, so the page can no longer
    /// match the list; close and let the editor reload.
    Resync { skipped: u64, frame: CloseFrame },
    Stop,
}

fn outbound_frame(received: Result<Payload, RecvError>) -> Outbound {
    match received {
        Ok(payload) => Outbound::Deliver(Message::text(payload.to_string())),
        Err(RecvError::Lagged(skipped)) => Outbound::Resync {
            skipped,
            frame: CloseFrame {
                code: CloseCode::Again,
                reason: format!("Missed {skipped} updates, reload the list").into(),
            },
        },
        Err(RecvError::Closed) => Outbound::Stop,
    }
}

fn bad_request(reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

pub struct ListServer {
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
    stats: Arc<RwLock<ServerStats>>,
}

impl ListServer {
    pub fn new(
        config: ServerConfig,
        repository: Arc<dyn ListRepository>,
        renderer: Arc<dyn ViewRenderer>,
    ) -> Self {
        let coordinator = Arc::new(Coordinator::new(
            config.coordinator_config(),
            repository,
            renderer,
        ));
        Self {
            config,
            coordinator,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Build a server with the stock HTML renderer, backed by RocksDB at
    /// `storage_path` or by memory when none is configured.
    pub fn open(config: ServerConfig) -> Result<Self, StoreError> {
        let repository: Arc<dyn ListRepository> = match &config.storage_path {
            Some(path) => Arc::new(ListStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => {
                log::info!("No storage path configured, lists live in memory");
                Arc::new(InMemoryListRepository::new())
            }
        };
        Ok(Self::new(config, repository, Arc::new(HtmlRenderer)))
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "List editor listening on ws://{}{}",
            self.config.bind_addr,
            self.config.editor_path
        );
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = self.coordinator.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, coordinator, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        coordinator: Arc<Coordinator>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut query: Option<EditorQuery> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
            match EditorQuery::from_uri(&config.editor_path, request.uri()) {
                Ok(parsed) => {
                    query = Some(parsed);
                    Ok(response)
                }
                Err(reason) => {
                    log::warn!("Rejecting handshake from {addr}: {reason}");
                    Err(bad_request(reason))
                }
            }
        })
        .await;

        let ws_stream = match handshake {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                stats.write().await.rejected_handshakes += 1;
                return Err(e.into());
            }
        };
        let Some(query) = query else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let transport = Uuid::new_v4();
        let attachment = match coordinator.attach(query.list_id, &query.user, transport).await {
            Ok(attachment) => attachment,
            Err(e) => {
                log::warn!(
                    "Attach of user {} to list {} from {addr} failed: {e}",
                    query.user.id,
                    query.list_id
                );
                let code = match e {
                    CoordinatorError::NotFound(_) => CloseCode::Policy,
                    _ => CloseCode::Error,
                };
                let frame = CloseFrame {
                    code,
                    reason: e.to_string().into(),
                };
                let _ = ws_sender.send(Message::Close(Some(frame))).await;
                let mut s = stats.write().await;
                s.failed_attaches += 1;
                s.active_connections -= 1;
                return Ok(());
            }
        };
        let Attachment {
            connection,
            mut outbound,
            session,
        } = attachment;

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(config.heartbeat_interval_secs.max(1)));
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let valid = coordinator.dispatch_text(&connection, text.as_str()).await;
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            if !valid {
                                s.decode_failures += 1;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            log::debug!("Ignoring {} byte binary frame from {addr}", data.len());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                payload = outbound.recv() => {
                    match outbound_frame(payload) {
                        Outbound::Deliver(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        Outbound::Resync { skipped, frame } => {
                            log::warn!(
                                "Connection {} on list {} lagged by {skipped} payloads, closing for reload",
                                connection.id,
                                connection.list_id
                            );
                            session.record_lag(skipped);
                            let _ = ws_sender.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        Outbound::Stop => break,
                    }
                }

                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        coordinator.detach(&connection).await;
        stats.write().await.active_connections -= 1;
        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_sessions = self.coordinator.session_count().await;
        stats
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
