//! Session registry: per-connection handshake state and the roster.
//!
//! A connection moves through `Connected -> KeyExchanged -> Joined` and
//! leaves again on an explicit leave or a transport disconnect. The AES key
//! for a connection lives in exactly one place at a time: the pending-key
//! map while the connection has not declared a username, the roster entry
//! afterwards.
//!
//! The server runs on a multi-threaded runtime, so all session state sits
//! behind one mutex and every multi-step operation (move pending key into
//! the roster, remove and report) is a single critical section. No lock is
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use relaychat_shared::constants::UNKNOWN_USERNAME;
use relaychat_shared::crypto::SymmetricKey;
use relaychat_shared::types::ConnectionId;

use crate::error::ServerError;

/// A joined connection, addressable by username.
#[derive(Clone)]
pub struct RosterEntry {
    pub conn: ConnectionId,
    pub username: String,
    pub key: SymmetricKey,
}

impl std::fmt::Debug for RosterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterEntry")
            .field("conn", &self.conn)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    KeyExchanged,
    Joined,
}

/// What a leave or disconnect removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Roster name, or `"Unknown"` if the connection never joined.
    pub username: String,
    /// Usernames still joined afterwards, in join order.
    pub usernames: Vec<String>,
    pub was_joined: bool,
}

/// Capability interface over the shared session state, so routing and
/// transfer logic can be exercised without a live transport.
pub trait Registry: Send + Sync {
    /// Store (or overwrite) the pending key of a connection that has not
    /// joined yet.
    fn exchange_key(&self, conn: ConnectionId, key: SymmetricKey) -> Result<(), ServerError>;

    /// Move the pending key into a new roster entry. Returns the roster's
    /// usernames after the join.
    fn join(&self, conn: ConnectionId, username: &str) -> Result<Vec<String>, ServerError>;

    /// Drop every trace of `conn` (roster entry and/or pending key).
    fn depart(&self, conn: ConnectionId) -> Departure;

    fn state(&self, conn: ConnectionId) -> SessionState;

    fn member(&self, conn: ConnectionId) -> Option<RosterEntry>;

    /// First joined connection using `username`.
    fn member_by_name(&self, username: &str) -> Option<RosterEntry>;

    /// Snapshot of the roster in join order.
    fn members(&self) -> Vec<RosterEntry>;

    fn current_usernames(&self) -> Vec<String>;
}

#[derive(Default)]
struct Sessions {
    pending: HashMap<ConnectionId, SymmetricKey>,
    roster: HashMap<ConnectionId, RosterEntry>,
    /// Join order. Usernames are not unique, so lookups by name scan this
    /// (rosters are small).
    order: Vec<ConnectionId>,
}

impl Sessions {
    fn usernames(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|conn| self.roster.get(conn))
            .map(|entry| entry.username.clone())
            .collect()
    }
}

/// In-memory [`Registry`] guarded by a single mutex.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        // No critical section can leave `Sessions` half-updated, so a
        // poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Registry for SessionRegistry {
    fn exchange_key(&self, conn: ConnectionId, key: SymmetricKey) -> Result<(), ServerError> {
        let mut sessions = self.lock();
        if sessions.roster.contains_key(&conn) {
            return Err(ServerError::ProtocolViolation(
                "exchange_key after join".to_string(),
            ));
        }

        let replaced = sessions.pending.insert(conn, key).is_some();
        debug!(conn = %conn, replaced, "Stored pending key");
        Ok(())
    }

    fn join(&self, conn: ConnectionId, username: &str) -> Result<Vec<String>, ServerError> {
        let mut sessions = self.lock();
        let Some(key) = sessions.pending.remove(&conn) else {
            let reason = if sessions.roster.contains_key(&conn) {
                "user_joined on an already joined connection"
            } else {
                "user_joined before exchange_key"
            };
            return Err(ServerError::ProtocolViolation(reason.to_string()));
        };

        sessions.roster.insert(
            conn,
            RosterEntry {
                conn,
                username: username.to_string(),
                key,
            },
        );
        sessions.order.push(conn);

        let usernames = sessions.usernames();
        info!(conn = %conn, username = %username, online = usernames.len(), "User joined");
        Ok(usernames)
    }

    fn depart(&self, conn: ConnectionId) -> Departure {
        let mut sessions = self.lock();
        sessions.pending.remove(&conn);

        let removed = sessions.roster.remove(&conn);
        if removed.is_some() {
            sessions.order.retain(|c| *c != conn);
        }

        let usernames = sessions.usernames();
        match removed {
            Some(entry) => {
                info!(conn = %conn, username = %entry.username, online = usernames.len(), "User left");
                Departure {
                    username: entry.username,
                    usernames,
                    was_joined: true,
                }
            }
            None => Departure {
                username: UNKNOWN_USERNAME.to_string(),
                usernames,
                was_joined: false,
            },
        }
    }

    fn state(&self, conn: ConnectionId) -> SessionState {
        let sessions = self.lock();
        if sessions.roster.contains_key(&conn) {
            SessionState::Joined
        } else if sessions.pending.contains_key(&conn) {
            SessionState::KeyExchanged
        } else {
            SessionState::Connected
        }
    }

    fn member(&self, conn: ConnectionId) -> Option<RosterEntry> {
        self.lock().roster.get(&conn).cloned()
    }

    fn member_by_name(&self, username: &str) -> Option<RosterEntry> {
        let sessions = self.lock();
        sessions
            .order
            .iter()
            .filter_map(|conn| sessions.roster.get(conn))
            .find(|entry| entry.username == username)
            .cloned()
    }

    fn members(&self) -> Vec<RosterEntry> {
        let sessions = self.lock();
        sessions
            .order
            .iter()
            .filter_map(|conn| sessions.roster.get(conn))
            .cloned()
            .collect()
    }

    fn current_usernames(&self) -> Vec<String> {
        self.lock().usernames()
    }
}
