//! Client side of the handshake and the chat message codec.
//!
//! A [`ChatSession`] owns the connection's AES key. It builds the outgoing
//! events (already encrypted) and decodes incoming ones; it never touches
//! the network itself.

use rsa::RsaPublicKey;

use relaychat_shared::crypto::{self, SymmetricKey};
use relaychat_shared::protocol::{
    ChatPayload, ClientEvent, GlobalMessage, IncomingMessage, JoinRequest, KeyExchange,
    LeaveRequest, PrivateMessage, ServerEvent,
};
use relaychat_shared::types::Recipient;

use crate::error::{ClientError, Result};
use crate::validate::validate_username;

/// A decrypted chat line, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: String,
    pub timestamp: String,
    pub body: String,
    /// `Global` for the shared room, otherwise the other party of a
    /// private conversation.
    pub conversation: Recipient,
}

pub struct ChatSession {
    key: SymmetricKey,
    username: Option<String>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    /// Start a session with a freshly generated AES key.
    pub fn new() -> Self {
        Self::with_key(crypto::generate_symmetric_key())
    }

    pub fn with_key(key: SymmetricKey) -> Self {
        Self {
            key,
            username: None,
        }
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// `exchange_key` event wrapping this session's key for the server.
    pub fn key_exchange(&self, server_public_key: &RsaPublicKey) -> Result<ClientEvent> {
        Ok(ClientEvent::ExchangeKey(KeyExchange {
            encrypted_aes: crypto::wrap_symmetric_key(server_public_key, &self.key)?,
        }))
    }

    /// Same as [`key_exchange`](Self::key_exchange), from the PEM served at
    /// `/public-key`.
    pub fn key_exchange_pem(&self, server_public_pem: &str) -> Result<ClientEvent> {
        let public_key = crypto::public_key_from_pem(server_public_pem)?;
        self.key_exchange(&public_key)
    }

    pub fn join(&mut self, username: &str, current_usernames: &[String]) -> Result<ClientEvent> {
        validate_username(username, current_usernames)?;
        self.username = Some(username.to_string());
        Ok(ClientEvent::UserJoined(JoinRequest {
            username: username.to_string(),
        }))
    }

    pub fn leave(&mut self) -> Option<ClientEvent> {
        self.username
            .take()
            .map(|username| ClientEvent::UserLeft(LeaveRequest { username }))
    }

    fn sender(&self) -> Result<String> {
        self.username.clone().ok_or(ClientError::NotJoined)
    }

    pub fn global_message(&self, body: &str) -> Result<ClientEvent> {
        self.global_message_with(ChatPayload::now(body))
    }

    pub fn global_message_with(&self, payload: ChatPayload) -> Result<ClientEvent> {
        Ok(ClientEvent::GlobalMessage(GlobalMessage {
            sender: self.sender()?,
            message: crypto::sym_encrypt(&self.key, &payload.compose())?,
        }))
    }

    /// Returns the event plus the line to show locally; the relay does not
    /// echo private messages back to the sender.
    pub fn private_message(&self, recipient: &str, body: &str) -> Result<(ClientEvent, ChatLine)> {
        self.private_message_with(recipient, ChatPayload::now(body))
    }

    pub fn private_message_with(
        &self,
        recipient: &str,
        payload: ChatPayload,
    ) -> Result<(ClientEvent, ChatLine)> {
        let sender = self.sender()?;
        let event = ClientEvent::PrivateMessage(PrivateMessage {
            sender: sender.clone(),
            recipient: recipient.to_string(),
            message: crypto::sym_encrypt(&self.key, &payload.compose())?,
        });
        let echo = ChatLine {
            sender,
            timestamp: payload.timestamp,
            body: payload.body,
            conversation: Recipient::User(recipient.to_string()),
        };
        Ok((event, echo))
    }

    fn decode(&self, msg: &IncomingMessage, conversation: Recipient) -> Result<ChatLine> {
        let plaintext = crypto::sym_decrypt(&self.key, &msg.message)?;
        let payload = ChatPayload::parse(&plaintext)?;
        Ok(ChatLine {
            sender: msg.sender.clone(),
            timestamp: payload.timestamp,
            body: payload.body,
            conversation,
        })
    }

    /// Decrypt an incoming chat event. Returns `None` for other events.
    pub fn decode_event(&self, event: &ServerEvent) -> Option<Result<ChatLine>> {
        match event {
            ServerEvent::IncomingGlobalMessage(msg) => Some(self.decode(msg, Recipient::Global)),
            ServerEvent::IncomingPrivateMessage(msg) => {
                Some(self.decode(msg, Recipient::User(msg.sender.clone())))
            }
            _ => None,
        }
    }
}
