//! # relaychat-shared
//!
//! Wire contracts shared by the relay server and its clients: the cipher
//! suite, the named-event protocol, protocol constants and id types.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, ProtocolError};
pub use protocol::{ChatPayload, ClientEvent, ServerEvent};
pub use types::{ConnectionId, Recipient};
