//! Relay server core: shared state, WebSocket handler, broadcast fan-out,
//! and listener startup.
//!
//! Each accepted WebSocket gets one dispatcher loop ([`handle_socket`]) that
//! registers the connection, reads its inbound frames, and broadcasts every
//! text or binary frame to all other registered connections. Outbound frames
//! go through a per-connection queue drained by a dedicated writer task, so a
//! slow client only delays itself.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, close_code};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionState, Payload};
use crate::registry::Registry;

/// Default maximum inbound message size in bytes (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Default time to wait for clients to disconnect during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client that sent a close frame gets to take the reply.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared relay server state.
pub struct RelayState {
    /// Live connections.
    registry: Arc<Registry>,
    /// Maximum allowed inbound message size in bytes.
    max_payload_size: usize,
    /// How long shutdown waits for connections to drain.
    drain_timeout: Duration,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Creates a relay state with a custom payload limit and drain timeout.
    #[must_use]
    pub fn with_config(max_payload_size: usize, drain_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            max_payload_size,
            drain_timeout,
        }
    }

    /// The registry of live connections.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Maximum allowed inbound message size in bytes.
    #[must_use]
    pub const fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Closes every connection and waits for them to deregister.
    ///
    /// Returns `true` if all connections were gone before the drain timeout.
    pub async fn drain(&self) -> bool {
        let asked = self
            .registry
            .close_all(close_code::AWAY, "relay shutting down");
        tracing::info!(connections = asked, "draining connections");

        let drained = self.registry.wait_until_empty(self.drain_timeout).await;
        if !drained {
            tracing::warn!(
                remaining = self.registry.len(),
                timeout_ms = u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
                "connections still open after drain timeout"
            );
        }
        drained
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose outbound queue accepted the message.
    pub delivered: usize,
    /// Recipients skipped because they were already seen as not open.
    pub skipped: usize,
    /// Recipients that closed between the snapshot and the send.
    pub failed: usize,
}

/// Sends `payload` to every registered connection except `sender`.
///
/// Iterates over a snapshot, so concurrent connects and disconnects are
/// safe. A recipient that is closed, or closes mid-broadcast, is counted and
/// skipped; it never stops delivery to the others. The liveness check is
/// only a shortcut: a recipient can still close after it, which the send
/// error path covers.
pub fn broadcast(registry: &Registry, sender: ConnectionId, payload: &Payload) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for target in registry.snapshot() {
        if target.id() == sender {
            continue;
        }
        if !target.is_open() {
            report.skipped += 1;
            continue;
        }
        match target.send(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::debug!(
                    from = %sender,
                    to = %target.id(),
                    error = %e,
                    "recipient closed during broadcast"
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Spawn the writer task and register the connection.
/// 2. Broadcast every inbound text or binary frame to all other clients.
/// 3. Stop on a close frame, end of stream, or read error.
/// 4. Deregister, answer the client's close frame if it sent one, then stop
///    the writer.
pub async fn handle_socket(socket: WebSocket, peer_addr: Option<SocketAddr>, state: Arc<RelayState>) {
    let (ws_sender, mut ws_receiver) = socket.split();

    // Channel feeding this client's WebSocket writer.
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let conn = ConnectionHandle::new(peer_addr, tx);
    let conn_id = conn.id();

    let mut write_task = tokio::spawn(write_loop(ws_sender, rx, conn.clone()));

    let registration = state.registry().register(conn.clone());
    tracing::info!(
        conn_id = %conn_id,
        peer = ?peer_addr,
        connections = state.registry().len(),
        "client connected"
    );

    let read_end = tokio::select! {
        end = read_loop(&mut ws_receiver, &conn, state.registry()) => end,
        _ = &mut write_task => {
            tracing::debug!(conn_id = %conn_id, "writer stopped before reader");
            ReadEnd::Disconnected
        }
    };

    drop(registration);
    if read_end == ReadEnd::PeerClosed {
        finish_close_handshake(&mut ws_receiver, conn_id).await;
    }
    write_task.abort();
    conn.advance(ConnectionState::Closed);

    tracing::info!(
        conn_id = %conn_id,
        connections = state.registry().len(),
        "client disconnected"
    );
}

/// How the inbound side of a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// The client sent a close frame; its reply is still pending.
    PeerClosed,
    /// The stream ended or failed without a close frame.
    Disconnected,
}

/// Reads inbound frames until the client goes away.
///
/// Closure and read errors both end the loop normally; neither is reported
/// beyond a debug log.
async fn read_loop(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    conn: &ConnectionHandle,
    registry: &Registry,
) -> ReadEnd {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                tracing::debug!(conn_id = %conn.id(), ?frame, "received close frame");
                return ReadEnd::PeerClosed;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Pings are answered by the WebSocket layer.
            }
            Ok(msg) => {
                let Some(payload) = Payload::from_message(msg) else {
                    continue;
                };
                let report = broadcast(registry, conn.id(), &payload);
                tracing::trace!(
                    conn_id = %conn.id(),
                    len = payload.len(),
                    binary = payload.is_binary(),
                    delivered = report.delivered,
                    skipped = report.skipped,
                    failed = report.failed,
                    "broadcast"
                );
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "read failed, closing connection");
                break;
            }
        }
    }
    ReadEnd::Disconnected
}

/// Keeps reading after a client's close frame until the stream ends.
///
/// The WebSocket layer queues the close reply when the close frame arrives
/// and writes it out on the next read, so the socket must be polled once more
/// before it is dropped.
async fn finish_close_handshake(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    conn_id: ConnectionId,
) {
    let drain = async { while let Some(Ok(_)) = receiver.next().await {} };
    if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, drain)
        .await
        .is_err()
    {
        tracing::debug!(conn_id = %conn_id, "close handshake timed out");
    }
}

/// Writes queued frames to the socket in order.
///
/// Once a close frame has been written, data frames still arriving in the
/// queue are dropped: a broadcast may pass the liveness check just before
/// [`ConnectionHandle::close`] runs.
async fn write_loop(
    mut sender: impl SinkExt<Message, Error = axum::Error> + Unpin,
    mut rx: mpsc::UnboundedReceiver<Message>,
    conn: ConnectionHandle,
) {
    let mut close_sent = false;
    while let Some(msg) = rx.recv().await {
        if close_sent {
            tracing::trace!(conn_id = %conn.id(), "dropping frame queued after close");
            continue;
        }
        close_sent = matches!(msg, Message::Close(_));
        if let Err(e) = sender.send(msg).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "WebSocket write failed");
            conn.advance(ConnectionState::Closing);
            break;
        }
    }
}

/// Errors that can occur while starting the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind to the requested address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound listener did not report its local address.
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// The server runs until the task is aborted. This is the entry point used by
/// test code.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind to `addr`.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind to `addr`.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_shutdown(addr, state, std::future::pending::<()>()).await
}

/// Starts the relay server and stops it gracefully when `shutdown` resolves.
///
/// On shutdown the listener stops accepting, every client is sent a close
/// frame, and the returned task finishes once all connections have
/// deregistered or the drain timeout has passed.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind to `addr`.
pub async fn start_server_with_shutdown<F>(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new()
        .route("/", axum::routing::get(ws_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("relay server no longer accepting connections");
        });

        if let Err(e) = serve.await {
            tracing::error!(error = %e, "relay server error");
        }
        state.drain().await;
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_payload_size)
        .max_frame_size(state.max_payload_size)
        .on_upgrade(move |socket| handle_socket(socket, Some(peer_addr), state))
}
