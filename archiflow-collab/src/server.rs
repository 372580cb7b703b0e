//! WebSocket front end for the collaboration hub.
//!
//! Architecture:
//! ```text
//! Client A ──ws──► connection task ──┐                 ┌──► outbox A ──► Client A
//!                                    ├─ HubCommand ──► hub task
//! Client B ──ws──► connection task ──┘   (mpsc)        └──► outbox B ──► Client B
//!                                                           │
//!                                                           └── DiagramStore (blocking pool)
//! ```
//!
//! The hub lives on a single task and sees commands in arrival order, so
//! membership changes and routing never interleave. Connection tasks only
//! move frames between the socket and the hub.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::hub::{CollabHub, HubStats};
use crate::protocol::{ConnectionId, Frame, ProtocolError};
use crate::registry::Outbox;
use crate::storage::{open_store, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames queued per connection before it counts as lagging
    pub outbound_buffer: usize,
    /// Largest accepted inbound text frame
    pub max_message_bytes: usize,
    /// Commands queued for the hub task
    pub hub_queue: usize,
    /// RocksDB path (None = in-memory store)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3333".to_string(),
            outbound_buffer: 256,
            max_message_bytes: 4 * 1024 * 1024,
            hub_queue: 1024,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub hub: HubStats,
}

#[derive(Debug, Default)]
struct TransportStats {
    total_connections: u64,
    active_connections: u64,
    total_messages: u64,
    total_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("hub task is no longer running")]
    HubClosed,
}

enum HubCommand {
    Connect {
        outbox: Outbox,
        reply: oneshot::Sender<ConnectionId>,
    },
    Message {
        from: ConnectionId,
        text: String,
    },
    /// A frame the transport refused before decoding.
    Rejected {
        from: ConnectionId,
        error: ProtocolError,
    },
    Disconnect {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable handle to the task that owns a [`CollabHub`].
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Move `hub` onto its own task. Must be called within a Tokio runtime.
    pub fn spawn(mut hub: CollabHub, queue: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<HubCommand>(queue.max(1));

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    HubCommand::Connect { outbox, reply } => {
                        let id = hub.connect(outbox);
                        if reply.send(id).is_err() {
                            // Connection task went away while waiting.
                            hub.disconnect(&id);
                        }
                    }
                    HubCommand::Message { from, text } => {
                        // Already logged and counted by the hub.
                        let _ = hub.handle_text(&from, &text);
                    }
                    HubCommand::Rejected { from, error } => {
                        hub.record_protocol_error(&from, &error);
                    }
                    HubCommand::Disconnect { id } => {
                        hub.disconnect(&id);
                    }
                    HubCommand::Stats { reply } => {
                        let _ = reply.send(hub.stats());
                    }
                }
            }
            log::debug!("Hub task stopped");
        });

        Self { tx }
    }

    pub async fn connect(&self, outbox: Outbox) -> Option<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::Connect { outbox, reply }).await.ok()?;
        rx.await.ok()
    }

    /// Forward one inbound text frame. `false` once the hub is gone.
    pub async fn message(&self, from: ConnectionId, text: String) -> bool {
        self.tx.send(HubCommand::Message { from, text }).await.is_ok()
    }

    pub async fn reject(&self, from: ConnectionId, error: ProtocolError) -> bool {
        self.tx.send(HubCommand::Rejected { from, error }).await.is_ok()
    }

    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        self.tx.send(HubCommand::Disconnect { id }).await.is_ok()
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::Stats { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Stats view that outlives [`CollabServer::run`] taking the server.
#[derive(Clone)]
pub struct ServerHandle {
    hub: HubHandle,
    stats: Arc<RwLock<TransportStats>>,
}

impl ServerHandle {
    pub async fn stats(&self) -> ServerStats {
        let hub = self.hub.stats().await.unwrap_or_default();
        let s = self.stats.read().await;
        ServerStats {
            total_connections: s.total_connections,
            active_connections: s.active_connections,
            total_messages: s.total_messages,
            total_bytes: s.total_bytes,
            hub,
        }
    }
}

/// The collaboration server.
pub struct CollabServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    hub: HubHandle,
    stats: Arc<RwLock<TransportStats>>,
}

impl CollabServer {
    /// Open the store, bind the listener and start the hub task.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let store = open_store(config.storage_path.as_deref())?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let hub = HubHandle::spawn(CollabHub::new(store), config.hub_queue);

        Ok(Self {
            config: Arc::new(config),
            listener,
            hub,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }

    /// Bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            hub: self.hub.clone(),
            stats: self.stats.clone(),
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.handle().stats().await
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        log::info!("Collaboration server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::error!("Accept failed: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let hub = self.hub.clone();
                    let config = self.config.clone();
                    let stats = self.stats.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, hub, config, stats).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: HubHandle,
        config: Arc<ServerConfig>,
        stats: Arc<RwLock<TransportStats>>,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (outbox, mut outbox_rx) = mpsc::channel::<Frame>(config.outbound_buffer.max(1));
        let id = hub.connect(outbox).await.ok_or(ServerError::HubClosed)?;

        log::info!("Connection {id} established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(id, ws_stream, &mut outbox_rx, &hub, &config, &stats).await;

        hub.disconnect(id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection {id} from {addr} closed");
        result
    }

    /// Shuttle frames until the socket closes or the hub drops the outbox.
    async fn pump(
        id: ConnectionId,
        ws_stream: WebSocketStream<TcpStream>,
        outbox_rx: &mut mpsc::Receiver<Frame>,
        hub: &HubHandle,
        config: &ServerConfig,
        stats: &RwLock<TransportStats>,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            if text.len() > config.max_message_bytes {
                                let error = ProtocolError::TooLarge {
                                    size: text.len(),
                                    limit: config.max_message_bytes,
                                };
                                hub.reject(id, error).await;
                                continue;
                            }
                            if !hub.message(id, text.as_str().to_owned()).await {
                                return Err(ServerError::HubClosed);
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            hub.reject(id, ProtocolError::BinaryFrame).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error on {id}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }
                frame = outbox_rx.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                        None => break,
                    }
                }
            }
        }

        let _ = ws_sender.close().await;
        Ok(())
    }
}
