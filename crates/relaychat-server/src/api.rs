use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use relaychat_shared::constants::{APP_NAME, PUBLIC_KEY_PATH, WS_PATH};

use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::socket::handle_socket;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub public_pem: Arc<str>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route(PUBLIC_KEY_PATH, get(public_key))
        .route(WS_PATH, get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
}

async fn index() -> String {
    format!("{APP_NAME} relay v{}", env!("CARGO_PKG_VERSION"))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.hub.online(),
    })
}

async fn public_key(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/x-pem-file")],
        state.public_pem.to_string(),
    )
        .into_response()
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.max_message_size(state.config.max_frame_size)
        .max_frame_size(state.config.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message;

    use crate::file_store::FileStore;
    use relaychat_shared::crypto::{self, SymmetricKey};
    use relaychat_shared::protocol::{
        ClientEvent, GlobalMessage, JoinRequest, KeyExchange, ServerEvent,
    };

    async fn spawn_server() -> (std::net::SocketAddr, RsaPrivateKey, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let key = crypto::generate_rsa_private_key(1024).unwrap();
        let public_pem = crypto::public_key_to_pem(&RsaPublicKey::from(&key)).unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).await.unwrap();
        let state = AppState {
            hub: Hub::new(key.clone(), store, 1024, 8),
            public_pem: Arc::from(public_pem.as_str()),
            config: Arc::new(ServerConfig::default()),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        (addr, key, public_pem, dir)
    }

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn send(ws: &mut Ws, event: ClientEvent) {
        ws.send(Message::Text(event.to_json().unwrap())).await.unwrap();
    }

    async fn next_event(ws: &mut Ws) -> ServerEvent {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return ServerEvent::from_json(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn join(addr: std::net::SocketAddr, pem: &str, name: &str) -> (Ws, SymmetricKey) {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let key = crypto::generate_symmetric_key();
        let public = crypto::public_key_from_pem(pem).unwrap();
        send(
            &mut ws,
            ClientEvent::ExchangeKey(KeyExchange {
                encrypted_aes: crypto::wrap_symmetric_key(&public, &key).unwrap(),
            }),
        )
        .await;
        send(
            &mut ws,
            ClientEvent::UserJoined(JoinRequest {
                username: name.into(),
            }),
        )
        .await;
        (ws, key)
    }

    #[tokio::test]
    async fn test_public_key_route_serves_pem() {
        let (addr, key, public_pem, _dir) = spawn_server().await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /public-key HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        let served = response.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(served, public_pem);
        assert_eq!(
            crypto::public_key_from_pem(served).unwrap(),
            RsaPublicKey::from(&key)
        );
    }

    #[tokio::test]
    async fn test_websocket_chat_round_trip() {
        let (addr, _key, pem, _dir) = spawn_server().await;

        let (mut alice, alice_key) = join(addr, &pem, "alice").await;
        assert!(matches!(next_event(&mut alice).await, ServerEvent::UserJoined(p) if p.username == "alice"));

        let (mut bob, bob_key) = join(addr, &pem, "bob").await;
        match next_event(&mut bob).await {
            ServerEvent::UserJoined(p) => assert_eq!(p.usernames, vec!["alice", "bob"]),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(next_event(&mut alice).await, ServerEvent::UserJoined(p) if p.username == "bob"));

        // Garbage frames are dropped without closing the connection.
        alice.send(Message::Text("{not json".into())).await.unwrap();
        send(
            &mut alice,
            ClientEvent::GlobalMessage(GlobalMessage {
                sender: "alice".into(),
                message: crypto::sym_encrypt(&alice_key, "11:11:11|over the wire").unwrap(),
            }),
        )
        .await;

        for (ws, key) in [(&mut alice, alice_key), (&mut bob, bob_key)] {
            match next_event(ws).await {
                ServerEvent::IncomingGlobalMessage(m) => {
                    assert_eq!(m.sender, "alice");
                    assert_eq!(
                        crypto::sym_decrypt(&key, &m.message).unwrap(),
                        "11:11:11|over the wire"
                    );
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        alice.close(None).await.unwrap();
        match next_event(&mut bob).await {
            ServerEvent::UserLeft(p) => {
                assert_eq!(p.username, "alice");
                assert_eq!(p.usernames, vec!["bob"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
