//! Registry of live connections.
//!
//! The [`Registry`] is the only shared mutable state in the relay. Every
//! connection's dispatcher adds itself on accept and removes itself on close;
//! broadcasts iterate over a [`Registry::snapshot`], never over the live set.
//! The lock is synchronous and is never held across an `.await` or while
//! sending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionState};

/// Concurrent set of open connections, keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct Registry {
    members: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    drained: Notify,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection. Callers register each connection exactly once.
    pub fn add(&self, conn: ConnectionHandle) {
        let id = conn.id();
        let replaced = self.members.write().insert(id, conn);
        if replaced.is_some() {
            tracing::warn!(conn_id = %id, "connection registered twice");
        }
    }

    /// Removes a connection, returning it if it was present.
    ///
    /// Removing an absent connection is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut members = self.members.write();
        let removed = members.remove(&id);
        let now_empty = members.is_empty();
        drop(members);

        if removed.is_some() && now_empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Returns a point-in-time copy of the membership.
    ///
    /// The copy is independent of the live set: connections added or removed
    /// afterwards do not affect it.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.members.read().values().cloned().collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Whether the given connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    /// Registers a connection and returns a guard that deregisters it when
    /// dropped.
    ///
    /// The connection is marked `Open` before it becomes visible to
    /// broadcasts. Dropping the guard (normal return, early return, or
    /// unwinding) marks it `Closing` and removes it.
    #[must_use = "dropping the registration deregisters the connection immediately"]
    pub fn register(self: &Arc<Self>, conn: ConnectionHandle) -> Registration {
        conn.advance(ConnectionState::Open);
        self.add(conn.clone());
        Registration {
            registry: Arc::clone(self),
            conn,
        }
    }

    /// Asks every registered connection to close.
    ///
    /// Returns how many close frames were queued. Connections deregister
    /// themselves once their dispatcher loop observes the close.
    pub fn close_all(&self, code: u16, reason: &'static str) -> usize {
        let mut queued = 0;
        for conn in self.snapshot() {
            match conn.close(code, reason) {
                Ok(()) => {
                    tracing::info!(conn_id = %conn.id(), "sending close frame to client");
                    queued += 1;
                }
                Err(e) => {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "client already closing");
                }
            }
        }
        queued
    }

    /// Waits until every connection has deregistered.
    ///
    /// Returns `false` if connections are still registered when `timeout`
    /// elapses.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                // Enable before checking so a removal in between is not missed.
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Membership of one connection in a [`Registry`].
///
/// Deregisters the connection exactly once, when dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    conn: ConnectionHandle,
}

impl Registration {
    /// The registered connection.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.conn.advance(ConnectionState::Closing);
        self.registry.remove(self.conn.id());
    }
}
