//! WebSocket lobby client.
//!
//! A [`LobbyClient`] connects to a relay, announces the local player with a
//! `join` message, and then sends and receives [`LobbyMessage`]s. The relay
//! broadcasts every frame to all other clients, so whatever this client sends
//! reaches every other player in the lobby.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lobbycast_proto::lobby::{self, LobbyMessage, ProtoError};
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the relay server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the queue between the reader task and [`LobbyClient::recv`].
const INCOMING_CAPACITY: usize = 256;

/// Identifier a player announces in its `join` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create a player identifier from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier of the form `user_<n>`, `n < 100000`.
    #[must_use]
    pub fn random() -> Self {
        let n: u32 = rand::rng().random_range(0..100_000);
        Self(format!("user_{n}"))
    }

    /// Return the string representation of this player ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay address could not be turned into a WebSocket URL.
    #[error("invalid relay address {address:?}: {reason}")]
    InvalidAddress {
        /// Address as given by the caller.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Connecting took longer than the connect timeout.
    #[error("connection to relay timed out")]
    Timeout,

    /// Nothing accepted the connection at the relay address.
    #[error("relay at {0} is unreachable")]
    Unreachable(String),

    /// The connection to the relay has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A lobby message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtoError),

    /// The WebSocket layer failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

/// Turns a relay address into a WebSocket URL.
///
/// Accepts `host:port` (browser-style, `ws://` is implied) or a full `ws://`
/// or `wss://` URL.
///
/// # Errors
///
/// Returns [`ClientError::InvalidAddress`] for unparseable input, other
/// schemes, or a missing host.
pub fn relay_url(address: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("address is empty".to_string()));
    }
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("ws://{address}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// A player's connection to a lobby relay.
///
/// Created via [`LobbyClient::connect`], which establishes the WebSocket
/// connection, announces the player, and spawns a background reader task.
pub struct LobbyClient {
    /// This client's player identity.
    player_id: PlayerId,
    /// Whether this player hosts the lobby.
    is_host: bool,
    /// The relay URL (ws:// or wss://).
    relay_url: Url,
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Mutex<WsSender>,
    /// Messages decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<LobbyMessage>>,
    /// Whether the WebSocket connection to the relay is active.
    connected: Arc<AtomicBool>,
    /// Handle to the background reader task (kept alive for the client's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl LobbyClient {
    /// Connect to a relay as a freshly generated player.
    ///
    /// # Errors
    ///
    /// See [`LobbyClient::connect_as`].
    pub async fn connect(address: &str, as_host: bool) -> Result<Self, ClientError> {
        Self::connect_as(address, PlayerId::random(), as_host).await
    }

    /// Connect to a relay and announce `player_id` to the lobby.
    ///
    /// Performs the following steps:
    /// 1. Establishes a WebSocket connection to the relay (10s timeout)
    /// 2. Sends `join` with the player id and host flag
    /// 3. Spawns a background task to read incoming messages
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidAddress`] if `address` is not a relay address.
    /// - [`ClientError::Timeout`] if the connection times out.
    /// - [`ClientError::Unreachable`] if the relay refuses the connection.
    /// - [`ClientError::WebSocket`] for handshake or send failures.
    pub async fn connect_as(
        address: &str,
        player_id: PlayerId,
        as_host: bool,
    ) -> Result<Self, ClientError> {
        let relay_url = relay_url(address)?;

        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(relay_url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %relay_url, "relay connect timed out");
                    ClientError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %relay_url, error = %e, "relay connect failed");
                    map_ws_connect_error(&relay_url, e)
                })?;
        tracing::info!(url = %relay_url, player_id = %player_id, "connected to relay");

        let (mut ws_sender, ws_reader) = ws_stream.split();

        let join = LobbyMessage::Join {
            id: player_id.as_str().to_string(),
            is_host: as_host,
        };
        ws_sender
            .send(Message::text(lobby::encode(&join)?))
            .await
            .map_err(Box::new)?;

        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        Ok(Self {
            player_id,
            is_host: as_host,
            relay_url,
            ws_sender: Mutex::new(ws_sender),
            incoming: Mutex::new(rx),
            connected,
            _reader_handle: reader_handle,
        })
    }

    /// Broadcast a lobby message to every other player.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionClosed`] if the relay connection is down.
    /// - [`ClientError::Protocol`] if the message cannot be encoded.
    pub async fn send(&self, msg: &LobbyMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }
        let text = lobby::encode(msg)?;

        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::text(text)).await.map_err(|e| {
            tracing::warn!(error = %e, "relay send failed");
            self.connected.store(false, Ordering::Relaxed);
            ClientError::ConnectionClosed
        })
    }

    /// Receive the next lobby message from another player.
    ///
    /// Waits until a message arrives. Binary frames and text that is not a
    /// lobby message are skipped by the reader.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] once the connection has
    /// closed and every message received before that has been returned.
    pub async fn recv(&self) -> Result<LobbyMessage, ClientError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(ClientError::ConnectionClosed)
    }

    /// Close the connection to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WebSocket`] if the close frame cannot be sent.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::Relaxed);
        let mut sender = self.ws_sender.lock().await;
        sender.close().await.map_err(Box::new)?;
        Ok(())
    }

    /// Whether the connection to the relay is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The local player's identity.
    #[must_use]
    pub const fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Whether the local player hosts the lobby.
    #[must_use]
    pub const fn is_host(&self) -> bool {
        self.is_host
    }

    /// The relay URL this client is connected to.
    #[must_use]
    pub const fn relay_url(&self) -> &Url {
        &self.relay_url
    }
}

/// Background task that reads WebSocket frames and queues lobby messages.
///
/// Only text frames carry lobby messages. Binary frames and undecodable text
/// are logged and skipped; they never disconnect the client.
///
/// Sets `connected` to `false` when the relay closes the connection or the
/// read fails.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<LobbyMessage>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match lobby::decode(text.as_str()) {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        // Receiver dropped, the client is gone.
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping text frame that is not a lobby message");
                }
            },
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "skipping binary frame");
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "relay closed the connection");
                connected.store(false, Ordering::Relaxed);
                // Keep reading so the close reply is flushed; the stream ends next.
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("lobby reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`ClientError`].
fn map_ws_connect_error(url: &Url, err: tokio_tungstenite::tungstenite::Error) -> ClientError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            ClientError::Unreachable(url.to_string())
        }
        other => ClientError::WebSocket(Box::new(other)),
    }
}
