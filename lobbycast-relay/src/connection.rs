//! Connection handles shared between the registry and the dispatcher.
//!
//! A [`ConnectionHandle`] is a cheap, clonable reference to one live client
//! socket. It carries the connection's identity, its lifecycle state, and the
//! sending half of its outbound queue. The socket itself is owned by the
//! reader loop and writer task in [`crate::relay`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identity of one accepted connection.
///
/// Generated fresh for every accepted socket and never reused, so two
/// connections from the same remote address are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new, unique connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection.
///
/// Transitions only move forward: `Connecting → Open → Closing → Closed`.
/// Only `Open` connections are registered and eligible as broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, writer spawned, not yet registered.
    Connecting = 0,
    /// Registered; sends and receives messages.
    Open = 1,
    /// Shutting down; no new messages are accepted for it.
    Closing = 2,
    /// Deregistered. Terminal.
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A relayed message body.
///
/// The relay never looks inside a payload. Text stays text and binary stays
/// binary; cloning shares the underlying buffer instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A UTF-8 text frame.
    Text(Utf8Bytes),
    /// A binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Extracts the payload from a data frame.
    ///
    /// Returns `None` for control frames (ping, pong, close), which are never
    /// relayed.
    #[must_use]
    pub fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    /// Converts the payload back into a frame of the same kind.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(data) => Message::Binary(data),
        }
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.as_str().len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a binary payload.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

/// Errors returned when handing a message to a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The target connection is closing or already gone.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

struct Inner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Shared handle to one client connection.
///
/// Equality is identity: two handles are equal iff they refer to the same
/// accepted connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    /// Creates a handle in the `Connecting` state.
    ///
    /// `outbound` feeds the connection's writer task; everything sent through
    /// [`ConnectionHandle::send`] is written to the socket in FIFO order.
    #[must_use]
    pub fn new(peer_addr: Option<SocketAddr>, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                peer_addr,
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                outbound,
            }),
        }
    }

    /// Returns this connection's identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address of the client, if known. Only used for logging.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Liveness flag. A snapshot of the state; it may change right after.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Advances the lifecycle state. Attempts to move backwards are ignored.
    pub fn advance(&self, state: ConnectionState) {
        self.inner.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    /// Queues a payload for delivery to this client.
    ///
    /// Never waits: the payload is appended to the connection's outbound
    /// queue and written by its own writer task.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is closing, closed, or
    /// its writer has already exited.
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        if self.state() >= ConnectionState::Closing {
            return Err(SendError::Closed(self.id()));
        }
        self.inner
            .outbound
            .send(payload.into_message())
            .map_err(|_| SendError::Closed(self.id()))
    }

    /// Asks the client to close by queueing a close frame.
    ///
    /// The connection moves to `Closing`, so later sends are refused. A send
    /// that checked the state just before this call may still land behind
    /// the close frame; the writer task discards it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection was already closing or
    /// its writer has exited.
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), SendError> {
        let previous = ConnectionState::from_u8(
            self.inner
                .state
                .fetch_max(ConnectionState::Closing as u8, Ordering::AcqRel),
        );
        if previous >= ConnectionState::Closing {
            return Err(SendError::Closed(self.id()));
        }
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        };
        self.inner
            .outbound
            .send(Message::Close(Some(frame)))
            .map_err(|_| SendError::Closed(self.id()))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
