use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use relaychat_shared::protocol::ServerEvent;
use relaychat_shared::types::ConnectionId;

/// Outbound queues of every live connection.
///
/// Each connection gets a bounded queue drained by its socket writer task.
/// Fan-out never waits: an event for a connection whose queue is full is
/// dropped for that connection alone. Only a download, feeding its own
/// requester, waits for room.
#[derive(Clone, Default)]
pub struct Outbox {
    peers: Arc<Mutex<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: ConnectionId, capacity: usize) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel::<ServerEvent>(capacity);
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, tx);
        rx
    }

    pub fn unregister(&self, conn: ConnectionId) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&conn)
    }

    fn sender(&self, conn: ConnectionId) -> Option<mpsc::Sender<ServerEvent>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conn)
            .cloned()
    }

    /// Queue `event` for `conn` without waiting. Returns `false` if the
    /// connection is gone or its queue is full.
    pub fn send(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.sender(conn) else {
            debug!(conn = %conn, event = event.name(), "Dropping event for closed connection");
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(conn = %conn, event = event.name(), "Dropping event for slow connection");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn = %conn, "Outbound queue closed");
                false
            }
        }
    }

    /// Queue `event` for `conn`, waiting for room if the queue is full.
    /// Only the task that owns a stream to `conn` should call this.
    pub async fn send_paced(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.sender(conn) else {
            debug!(conn = %conn, event = event.name(), "Dropping event for closed connection");
            return false;
        };

        if tx.send(event).await.is_err() {
            debug!(conn = %conn, "Outbound queue closed");
            return false;
        }
        true
    }

    /// Send a copy of `event` to each connection. Returns how many accepted it.
    pub fn broadcast<I>(&self, conns: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        conns
            .into_iter()
            .filter(|conn| self.send(*conn, event.clone()))
            .count()
    }
}
