use thiserror::Error;

use relaychat_shared::{CryptoError, ProtocolError};

/// Errors produced by the client library.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket failure.
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed")]
    Disconnected,

    /// Could not obtain the server's public key.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid username: {0}")]
    InvalidUsername(&'static str),

    #[error("File rejected: {0}")]
    RejectedFile(String),

    /// Sending chat requires a declared username.
    #[error("Not joined")]
    NotJoined,

    #[error("Download of {filename} failed verification: server sent {expected}, received data hashes to {computed}")]
    DigestMismatch {
        filename: String,
        expected: String,
        computed: String,
    },

    /// The download stream ended without `finish_download`.
    #[error("Download of {0} was interrupted")]
    DownloadInterrupted(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
