//! WebSocket connection to the relay.
//!
//! Outgoing events go through a bounded channel drained by a writer task;
//! incoming frames are decoded by a reader task and handed out in order via
//! [`Connection::recv`].

use futures::{SinkExt, StreamExt};
use rsa::RsaPublicKey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use relaychat_shared::constants::{PUBLIC_KEY_PATH, WS_PATH};
use relaychat_shared::crypto;
use relaychat_shared::protocol::{ClientEvent, ServerEvent};

use crate::error::{ClientError, Result};

const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 256;

/// Fetch the relay's RSA public key from `{server_url}/public-key`.
pub async fn fetch_public_key(server_url: &str) -> Result<RsaPublicKey> {
    let url = format!("{}{}", server_url.trim_end_matches('/'), PUBLIC_KEY_PATH);

    let resp = reqwest::get(&url)
        .await
        .map_err(|e| ClientError::Handshake(format!("Could not reach {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(ClientError::Handshake(format!(
            "Server answered {} for {url}",
            resp.status()
        )));
    }

    let pem = resp
        .text()
        .await
        .map_err(|e| ClientError::Handshake(format!("Unreadable key response: {e}")))?;
    Ok(crypto::public_key_from_pem(&pem)?)
}

/// `http://host:port` -> `ws://host:port/ws`.
pub fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{WS_PATH}")
}

pub struct Connection {
    outbound: mpsc::Sender<ClientEvent>,
    inbound: mpsc::Receiver<ServerEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _) = connect_async(ws_url).await?;
        info!(url = %ws_url, "Connected to relay");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(INBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                };
                match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        if in_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed server event"),
                }
            }
            debug!("Relay stream ended");
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            reader,
            writer,
        })
    }

    /// Handle for queueing events from other tasks (e.g. uploads).
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.outbound.clone()
    }

    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Next server event, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    /// Flush queued events and close the socket. Waits for every handle
    /// returned by [`sender`](Self::sender) to be dropped.
    pub async fn close(self) {
        drop(self.outbound);
        let _ = self.writer.await;
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("http://localhost:8080"), "ws://localhost:8080/ws");
        assert_eq!(websocket_url("https://chat.example.org/"), "wss://chat.example.org/ws");
        assert_eq!(websocket_url("ws://10.0.0.2:9000"), "ws://10.0.0.2:9000/ws");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Connection::connect(&format!("ws://{addr}/ws")).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
