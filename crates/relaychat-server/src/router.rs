//! Message router: the re-encryption hub.
//!
//! Every inbound chat payload is decrypted with the sender's key and
//! encrypted again, separately, under each recipient's own key. Plaintext
//! exists only transiently inside these functions and is never logged.

use std::sync::Arc;

use tracing::{debug, warn};

use relaychat_shared::crypto;
use relaychat_shared::protocol::{GlobalMessage, IncomingMessage, PrivateMessage, ServerEvent};
use relaychat_shared::types::ConnectionId;

use crate::error::ServerError;
use crate::outbox::Outbox;
use crate::registry::Registry;

#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<dyn Registry>,
    outbox: Outbox,
}

impl MessageRouter {
    pub fn new(registry: Arc<dyn Registry>, outbox: Outbox) -> Self {
        Self { registry, outbox }
    }

    /// Deliver to every joined connection, the sender included. Returns the
    /// number of connections the message was queued for; a recipient whose
    /// queue is full misses this message without holding up the rest.
    pub fn route_global(
        &self,
        conn: ConnectionId,
        msg: GlobalMessage,
    ) -> Result<usize, ServerError> {
        let sender = self
            .registry
            .member(conn)
            .ok_or(ServerError::UnknownSender(conn))?;
        let plaintext = crypto::sym_decrypt(&sender.key, &msg.message)?;

        let mut delivered = 0;
        for recipient in self.registry.members() {
            let message = match crypto::sym_encrypt(&recipient.key, &plaintext) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    warn!(
                        recipient = %recipient.username,
                        error = %e,
                        "Failed to re-encrypt global message, skipping recipient"
                    );
                    continue;
                }
            };

            let event = ServerEvent::IncomingGlobalMessage(IncomingMessage {
                sender: sender.username.clone(),
                message,
            });
            if self.outbox.send(recipient.conn, event) {
                delivered += 1;
            }
        }

        debug!(sender = %sender.username, delivered, "Global message routed");
        Ok(delivered)
    }

    /// Deliver to the named recipient only. No copy goes back to the
    /// sender; the sending client echoes locally.
    pub fn route_private(
        &self,
        conn: ConnectionId,
        msg: PrivateMessage,
    ) -> Result<(), ServerError> {
        let sender = self
            .registry
            .member(conn)
            .ok_or(ServerError::UnknownSender(conn))?;
        let recipient = self
            .registry
            .member_by_name(&msg.recipient)
            .ok_or_else(|| ServerError::UnknownRecipient(msg.recipient.clone()))?;

        let plaintext = crypto::sym_decrypt(&sender.key, &msg.message)?;
        let message = crypto::sym_encrypt(&recipient.key, &plaintext)?;

        self.outbox.send(
            recipient.conn,
            ServerEvent::IncomingPrivateMessage(IncomingMessage {
                sender: sender.username.clone(),
                message,
            }),
        );

        debug!(
            sender = %sender.username,
            recipient = %recipient.username,
            "Private message routed"
        );
        Ok(())
    }
}
