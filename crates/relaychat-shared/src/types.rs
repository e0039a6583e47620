use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::GLOBAL_RECIPIENT;

// Opaque id for one live WebSocket connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressee of a file transfer. On the wire this is a plain string where
/// `"Global"` means every joined connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Global,
    User(String),
}

impl Recipient {
    pub fn from_wire(s: &str) -> Self {
        if s == GLOBAL_RECIPIENT {
            Self::Global
        } else {
            Self::User(s.to_string())
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Global => GLOBAL_RECIPIENT,
            Self::User(name) => name,
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}
