//! # relaychat-client
//!
//! Client-side wire logic for the relaychat relay: key handshake, username
//! and file validation, encrypted message composition, chunked uploads and
//! verified downloads, over a WebSocket connection.

pub mod connection;
pub mod download;
pub mod error;
pub mod session;
pub mod upload;
pub mod validate;

pub use connection::{fetch_public_key, websocket_url, Connection};
pub use download::{DownloadReport, Downloads};
pub use error::{ClientError, Result};
pub use session::{ChatLine, ChatSession};
pub use upload::{send_file, UploadSummary};
