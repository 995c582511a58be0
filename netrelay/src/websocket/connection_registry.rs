use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use tokio::sync::{mpsc::UnboundedSender, RwLock};

use crate::error::{Error, Result};

/// Outbound queue of one peer, drained into its socket by a writer task
pub type PeerSender = UnboundedSender<Message>;

/// Identity of one open peer connection.
///
/// Identities are minted by [`ConnectionRegistry::register`] and never reused,
/// so a peer that reconnects always shows up as a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry of every open relay connection.
///
/// All registered peers share one broadcast domain. The registry only enqueues
/// onto each peer's outbound queue, so a peer that stops reading never holds
/// the lock. A queue keeps its order, so messages from one sender reach each
/// receiver in the order they were broadcast.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, PeerSender>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Create a new empty connection registry
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register the outbound queue of a freshly accepted connection
    pub async fn register(&self, sender: PeerSender) -> ConnectionId {
        let connection_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.write().await.insert(connection_id, sender);
        tracing::info!(connection_id = %connection_id, "Peer connected");
        connection_id
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        if self
            .connections
            .write()
            .await
            .remove(&connection_id)
            .is_some()
        {
            tracing::info!(connection_id = %connection_id, "Peer removed from registry");
        }
    }

    /// Whether the connection is currently registered
    pub async fn is_open(&self, connection_id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&connection_id)
    }

    /// Get the count of currently connected peers
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a message to a specific peer.
    ///
    /// A failed send removes the peer before the error is returned. Sending to
    /// an absent peer does nothing.
    pub async fn send_to(&self, connection_id: ConnectionId, message: Message) -> Result<()> {
        let sent = match self.connections.read().await.get(&connection_id) {
            Some(peer) => peer.send(message),
            None => return Ok(()),
        };
        if let Err(e) = sent {
            self.unregister(connection_id).await;
            return Err(Error::Delivery {
                connection_id,
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Relay a text message to every open peer except `sender`.
    ///
    /// Peers whose queue is closed are dropped from the registry once the pass
    /// is over. Nothing is relayed if `sender` itself is no longer registered.
    pub async fn broadcast(&self, message: Utf8Bytes, sender: ConnectionId) {
        let failed = {
            let connections = self.connections.read().await;
            if !connections.contains_key(&sender) {
                tracing::debug!(
                    connection_id = %sender,
                    "Dropping message from a connection that is no longer open"
                );
                return;
            }

            let mut failed = Vec::new();
            for (connection_id, peer) in connections.iter() {
                if *connection_id == sender {
                    continue;
                }
                if let Err(e) = peer.send(Message::Text(message.clone())) {
                    tracing::warn!(
                        connection_id = %connection_id,
                        sender = %sender,
                        error = %e,
                        "Failed to relay message"
                    );
                    failed.push(*connection_id);
                }
            }
            failed
        };

        for connection_id in failed {
            self.unregister(connection_id).await;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
