use thiserror::Error;

use relaychat_shared::types::ConnectionId;
use relaychat_shared::{CryptoError, ProtocolError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Key exchange failed")]
    KeyExchangeFailure,

    #[error("Decryption failed: bad encoding, wrong key or invalid padding")]
    DecryptionFailure,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unknown sender: connection {0} has not joined")]
    UnknownSender(ConnectionId),

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Hash mismatch for {filename}: client sent {claimed}, server computed {computed}")]
    HashMismatch {
        filename: String,
        claimed: String,
        computed: String,
    },

    #[error("Transport disconnected: {0}")]
    TransportDisconnect(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("File storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for ServerError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyExchangeFailure => ServerError::KeyExchangeFailure,
            CryptoError::DecryptionFailure => ServerError::DecryptionFailure,
            other => ServerError::Crypto(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::ProtocolViolation(err.to_string())
    }
}
