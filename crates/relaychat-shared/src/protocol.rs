use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::constants::{BODY_DELIMITER, GLOBAL_RECIPIENT, TIMESTAMP_FORMAT};
use crate::error::ProtocolError;

/// Every event a client may send. One WebSocket text frame carries one
/// event as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// RSA-wrapped AES key for this connection
    ExchangeKey(KeyExchange),

    /// Declare a username after the key exchange
    UserJoined(JoinRequest),

    /// Leave the roster without closing the connection
    UserLeft(LeaveRequest),

    GlobalMessage(GlobalMessage),

    PrivateMessage(PrivateMessage),

    /// Ask for the current roster; answered with `current_users`
    GetCurrentUsers,

    StartUpload(UploadStart),

    UploadChunk(UploadChunk),

    FinishUpload(UploadFinish),

    DownloadRequest(DownloadRequest),
}

/// Every event the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined(Presence),

    UserLeft(Presence),

    /// Message body re-encrypted under the recipient's own key
    IncomingGlobalMessage(IncomingMessage),

    IncomingPrivateMessage(IncomingMessage),

    CurrentUsers(CurrentUsers),

    IncomingGlobalFile(FileReady),

    IncomingPrivateFile(FileReady),

    /// Upload digest mismatch; the client should send the file again
    RetrySending(RetrySending),

    IncomingFileChunk(FileChunk),

    FinishDownload(DownloadFinished),
}

fn default_sender() -> String {
    "Anonymous".to_string()
}

fn default_recipient() -> String {
    GLOBAL_RECIPIENT.to_string()
}

// ---------------------------------------------------------------------------
// Client -> server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchange {
    /// base64(RSA-OAEP(aes_key))
    pub encrypted_aes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMessage {
    #[serde(default = "default_sender")]
    pub sender: String,
    /// base64(iv || AES-CBC("HH:MM:SS|body"))
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    #[serde(default = "default_sender")]
    pub sender: String,
    pub recipient: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStart {
    pub filename: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_recipient")]
    pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    pub filename: String,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// base64 of at most `CHUNK_SIZE` raw bytes
    pub chunk_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFinish {
    pub filename: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Hex SHA-256 of the whole file as computed by the uploader
    pub hash_file: String,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub username: String,
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUsers {
    pub current_usernames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReady {
    pub filename: String,
    pub sender: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySending {
    pub filename: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub filename: String,
    pub chunk_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFinished {
    pub filename: String,
    pub hash_file: String,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExchangeKey(_) => "exchange_key",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::GlobalMessage(_) => "global_message",
            Self::PrivateMessage(_) => "private_message",
            Self::GetCurrentUsers => "get_current_users",
            Self::StartUpload(_) => "start_upload",
            Self::UploadChunk(_) => "upload_chunk",
            Self::FinishUpload(_) => "finish_upload",
            Self::DownloadRequest(_) => "download_request",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::IncomingGlobalMessage(_) => "incoming_global_message",
            Self::IncomingPrivateMessage(_) => "incoming_private_message",
            Self::CurrentUsers(_) => "current_users",
            Self::IncomingGlobalFile(_) => "incoming_global_file",
            Self::IncomingPrivateFile(_) => "incoming_private_file",
            Self::RetrySending(_) => "retry_sending",
            Self::IncomingFileChunk(_) => "incoming_file_chunk",
            Self::FinishDownload(_) => "finish_download",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Decrypted chat payload
// ---------------------------------------------------------------------------

/// Plaintext of a chat message: `"HH:MM:SS|<body>"`, encrypted as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub timestamp: String,
    pub body: String,
}

impl ChatPayload {
    pub fn new(timestamp: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            body: body.into(),
        }
    }

    /// Stamp `body` with the local wall-clock time.
    pub fn now(body: impl Into<String>) -> Self {
        Self::new(Local::now().format(TIMESTAMP_FORMAT).to_string(), body)
    }

    pub fn compose(&self) -> String {
        format!("{}{}{}", self.timestamp, BODY_DELIMITER, self.body)
    }

    /// Splits on the first delimiter only, so bodies may contain `|`.
    pub fn parse(plaintext: &str) -> Result<Self, ProtocolError> {
        let (timestamp, body) = plaintext
            .split_once(BODY_DELIMITER)
            .ok_or(ProtocolError::MalformedBody)?;
        Ok(Self::new(timestamp, body))
    }
}
