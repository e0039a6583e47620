//! Event dispatcher tying the registry, router and transfer engine together.
//!
//! The transport adapter hands every decoded client event to
//! [`Hub::dispatch`]. Handler errors never reach the client: they are logged
//! and the event is dropped, leaving the connection open.

use std::sync::Arc;

use rsa::RsaPrivateKey;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relaychat_shared::crypto;
use relaychat_shared::protocol::{
    ClientEvent, CurrentUsers, JoinRequest, KeyExchange, Presence, ServerEvent,
};
use relaychat_shared::types::ConnectionId;

use crate::error::ServerError;
use crate::file_store::FileStore;
use crate::outbox::Outbox;
use crate::registry::{Registry, SessionRegistry, SessionState};
use crate::router::MessageRouter;
use crate::transfer::TransferEngine;

#[derive(Clone)]
pub struct Hub {
    private_key: Arc<RsaPrivateKey>,
    registry: Arc<dyn Registry>,
    outbox: Outbox,
    router: MessageRouter,
    transfer: TransferEngine,
    queue_capacity: usize,
}

impl Hub {
    pub fn new(
        private_key: RsaPrivateKey,
        store: FileStore,
        chunk_size: usize,
        queue_capacity: usize,
    ) -> Self {
        let registry: Arc<dyn Registry> = Arc::new(SessionRegistry::new());
        let outbox = Outbox::new();
        let router = MessageRouter::new(registry.clone(), outbox.clone());
        let transfer = TransferEngine::new(registry.clone(), outbox.clone(), store, chunk_size);

        Self {
            private_key: Arc::new(private_key),
            registry,
            outbox,
            router,
            transfer,
            queue_capacity,
        }
    }

    /// Register a fresh connection. The returned receiver feeds its writer.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let rx = self.outbox.register(conn, self.queue_capacity);
        debug!(conn = %conn, "Connection registered");
        (conn, rx)
    }

    pub async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::ExchangeKey(req) => self.exchange_key(conn, req),
            ClientEvent::UserJoined(req) => self.join(conn, req),
            ClientEvent::UserLeft(_) => {
                self.leave(conn);
                Ok(())
            }
            ClientEvent::GlobalMessage(msg) => self.router.route_global(conn, msg).map(drop),
            ClientEvent::PrivateMessage(msg) => self.router.route_private(conn, msg),
            ClientEvent::GetCurrentUsers => {
                self.current_users(conn);
                Ok(())
            }
            ClientEvent::StartUpload(req) => self.transfer.start_upload(conn, req).await,
            ClientEvent::UploadChunk(req) => self.transfer.upload_chunk(conn, req).await,
            ClientEvent::FinishUpload(req) => self.transfer.finish_upload(conn, req).await.map(drop),
            ClientEvent::DownloadRequest(req) => {
                self.transfer.download_request(conn, req).await.map(drop)
            }
        };

        if let Err(e) = result {
            log_dropped(conn, name, self.registry.state(conn), &e);
        }
    }

    fn exchange_key(&self, conn: ConnectionId, req: KeyExchange) -> Result<(), ServerError> {
        let key = crypto::unwrap_symmetric_key(&self.private_key, &req.encrypted_aes)?;
        self.registry.exchange_key(conn, key)?;
        info!(conn = %conn, "Key exchange completed");
        Ok(())
    }

    fn join(&self, conn: ConnectionId, req: JoinRequest) -> Result<(), ServerError> {
        let usernames = self.registry.join(conn, &req.username)?;
        self.broadcast(ServerEvent::UserJoined(Presence {
            username: req.username,
            usernames,
        }));
        Ok(())
    }

    /// Explicit leave: the connection stays open but drops out of the roster.
    fn leave(&self, conn: ConnectionId) {
        self.transfer.abandon_uploads(conn);
        self.announce_departure(conn);
    }

    /// Transport is gone: forget everything about `conn`.
    pub fn disconnect(&self, conn: ConnectionId) {
        self.transfer.abandon_uploads(conn);
        self.outbox.unregister(conn);
        self.announce_departure(conn);
        debug!(conn = %conn, "Connection closed");
    }

    /// `user_left` goes out even for a connection that never joined.
    fn announce_departure(&self, conn: ConnectionId) {
        let departure = self.registry.depart(conn);
        if !departure.was_joined {
            debug!(conn = %conn, "Departure of a connection that never joined");
        }
        self.broadcast(ServerEvent::UserLeft(Presence {
            username: departure.username,
            usernames: departure.usernames,
        }));
    }

    fn current_users(&self, conn: ConnectionId) {
        let event = ServerEvent::CurrentUsers(CurrentUsers {
            current_usernames: self.registry.current_usernames(),
        });
        self.outbox.send(conn, event);
    }

    fn broadcast(&self, event: ServerEvent) -> usize {
        let conns = self.registry.members().into_iter().map(|m| m.conn);
        self.outbox.broadcast(conns, &event)
    }

    pub fn online(&self) -> usize {
        self.registry.members().len()
    }
}

fn log_dropped(conn: ConnectionId, event: &str, state: SessionState, err: &ServerError) {
    match err {
        // Expected during normal operation; no need to be loud.
        ServerError::FileNotFound(_) | ServerError::UnknownRecipient(_) => {
            debug!(conn = %conn, event, ?state, error = %err, "Event dropped")
        }
        _ => warn!(conn = %conn, event, ?state, error = %err, "Event dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use relaychat_shared::crypto::{generate_symmetric_key, SymmetricKey};
    use relaychat_shared::protocol::{DownloadRequest, GlobalMessage, LeaveRequest, UploadStart};
    use rsa::RsaPublicKey;

    fn server_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| crypto::generate_rsa_private_key(1024).unwrap())
    }

    async fn hub() -> (Hub, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).await.unwrap();
        (Hub::new(server_key().clone(), store, 1024, 32), dir)
    }

    fn exchange_event(key: &SymmetricKey) -> ClientEvent {
        let public = RsaPublicKey::from(server_key());
        ClientEvent::ExchangeKey(KeyExchange {
            encrypted_aes: crypto::wrap_symmetric_key(&public, key).unwrap(),
        })
    }

    async fn join(
        hub: &Hub,
        name: &str,
    ) -> (ConnectionId, SymmetricKey, mpsc::Receiver<ServerEvent>) {
        let (conn, rx) = hub.connect();
        let key = generate_symmetric_key();
        hub.dispatch(conn, exchange_event(&key)).await;
        hub.dispatch(
            conn,
            ClientEvent::UserJoined(JoinRequest {
                username: name.into(),
            }),
        )
        .await;
        (conn, key, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_broadcasts_roster() {
        let (hub, _dir) = hub().await;
        let (_alice, _, mut alice_rx) = join(&hub, "alice").await;
        let (_bob, _, mut bob_rx) = join(&hub, "bob").await;

        let expected = ServerEvent::UserJoined(Presence {
            username: "bob".into(),
            usernames: vec!["alice".into(), "bob".into()],
        });
        assert_eq!(drain(&mut alice_rx).last(), Some(&expected));
        assert_eq!(drain(&mut bob_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_join_without_handshake_ignored() {
        let (hub, _dir) = hub().await;
        let (conn, mut rx) = hub.connect();

        hub.dispatch(
            conn,
            ClientEvent::UserJoined(JoinRequest {
                username: "mallory".into(),
            }),
        )
        .await;
        assert_eq!(hub.online(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_bad_key_exchange_leaves_connection_unkeyed() {
        let (hub, _dir) = hub().await;
        let (conn, _rx) = hub.connect();

        hub.dispatch(
            conn,
            ClientEvent::ExchangeKey(KeyExchange {
                encrypted_aes: "bm90IGEga2V5".into(),
            }),
        )
        .await;
        assert_eq!(hub.registry.state(conn), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_end_to_end_global_message() {
        let (hub, _dir) = hub().await;
        let (alice, alice_key, mut alice_rx) = join(&hub, "alice").await;
        let (_bob, bob_key, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.dispatch(
            alice,
            ClientEvent::GlobalMessage(GlobalMessage {
                sender: "alice".into(),
                message: crypto::sym_encrypt(&alice_key, "08:30:00|morning").unwrap(),
            }),
        )
        .await;

        for (rx, key) in [(&mut alice_rx, alice_key), (&mut bob_rx, bob_key)] {
            match drain(rx).as_slice() {
                [ServerEvent::IncomingGlobalMessage(m)] => {
                    assert_eq!(m.sender, "alice");
                    assert_eq!(crypto::sym_decrypt(&key, &m.message).unwrap(), "08:30:00|morning");
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_get_current_users_replies_to_caller_only() {
        let (hub, _dir) = hub().await;
        let (alice, _, mut alice_rx) = join(&hub, "alice").await;
        let (_bob, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.dispatch(alice, ClientEvent::GetCurrentUsers).await;
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::CurrentUsers(CurrentUsers {
                current_usernames: vec!["alice".into(), "bob".into()],
            })]
        );
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cleanup() {
        let (hub, _dir) = hub().await;
        let (alice, _, _alice_rx) = join(&hub, "alice").await;
        let (bob, _, mut bob_rx) = join(&hub, "bob").await;
        hub.dispatch(
            alice,
            ClientEvent::StartUpload(UploadStart {
                filename: "half.png".into(),
                sender: "alice".into(),
                recipient: "bob".into(),
            }),
        )
        .await;
        assert_eq!(hub.transfer.uploads_in_flight(), 1);
        drain(&mut bob_rx);

        hub.disconnect(alice);

        assert!(hub.registry.member(alice).is_none());
        assert!(!hub.outbox.is_connected(alice));
        assert_eq!(hub.transfer.uploads_in_flight(), 0);
        assert!(hub.registry.member(bob).is_some());
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserLeft(Presence {
                username: "alice".into(),
                usernames: vec!["bob".into()],
            })]
        );
    }

    #[tokio::test]
    async fn test_disconnect_before_join_announces_unknown() {
        let (hub, _dir) = hub().await;
        let (_alice, _, mut alice_rx) = join(&hub, "alice").await;
        drain(&mut alice_rx);

        let (stranger, _rx) = hub.connect();
        hub.dispatch(stranger, exchange_event(&generate_symmetric_key())).await;
        hub.disconnect(stranger);

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::UserLeft(Presence {
                username: "Unknown".into(),
                usernames: vec!["alice".into()],
            })]
        );
    }

    #[tokio::test]
    async fn test_explicit_leave_keeps_connection_open() {
        let (hub, _dir) = hub().await;
        let (alice, _, mut alice_rx) = join(&hub, "alice").await;
        drain(&mut alice_rx);

        hub.dispatch(
            alice,
            ClientEvent::UserLeft(LeaveRequest {
                username: "alice".into(),
            }),
        )
        .await;

        assert_eq!(hub.online(), 0);
        assert!(hub.outbox.is_connected(alice));
        hub.dispatch(alice, ClientEvent::GetCurrentUsers).await;
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::CurrentUsers(CurrentUsers {
                current_usernames: vec![],
            })]
        );
    }

    #[tokio::test]
    async fn test_unread_download_does_not_stall_chat() {
        let (hub, dir) = hub().await;
        let (alice, _, _alice_rx) = join(&hub, "alice").await;
        let (bob, bob_key, mut bob_rx) = join(&hub, "bob").await;
        let (_carol, carol_key, mut carol_rx) = join(&hub, "carol").await;
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        // Far more 1 KiB chunks than alice's 32-slot queue holds.
        std::fs::write(dir.path().join("big.mp4"), vec![7u8; 200 * 1024]).unwrap();
        hub.dispatch(
            alice,
            ClientEvent::DownloadRequest(DownloadRequest {
                filename: "big.mp4".into(),
            }),
        )
        .await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let message = crypto::sym_encrypt(&bob_key, "09:00:00|anyone there?").unwrap();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            hub.dispatch(
                bob,
                ClientEvent::GlobalMessage(GlobalMessage {
                    sender: "bob".into(),
                    message,
                }),
            ),
        )
        .await
        .expect("global message waited on a stalled download");

        for (rx, key) in [(&mut bob_rx, bob_key), (&mut carol_rx, carol_key)] {
            match drain(rx).as_slice() {
                [ServerEvent::IncomingGlobalMessage(m)] => {
                    assert_eq!(
                        crypto::sym_decrypt(&key, &m.message).unwrap(),
                        "09:00:00|anyone there?"
                    );
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
    }
}
