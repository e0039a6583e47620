use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key exchange failed: malformed ciphertext or mismatched key")]
    KeyExchangeFailure,

    #[error("Decryption failed: bad encoding, wrong key or invalid padding")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("Malformed message body: missing '{}' delimiter", crate::constants::BODY_DELIMITER)]
    MalformedBody,
}
