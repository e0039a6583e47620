//! WebSocket transport adapter.
//!
//! One task reads frames and dispatches them strictly in arrival order;
//! a second task drains the connection's outbound queue into the socket.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use relaychat_shared::protocol::ClientEvent;

use crate::error::ServerError;
use crate::hub::Hub;

pub async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (conn, mut outbound) = hub.connect();
    let (mut sink, mut stream) = socket.split();
    info!(conn = %conn, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %conn, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reason = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break ServerError::TransportDisconnect(e.to_string()),
            None => break ServerError::TransportDisconnect("stream ended".to_string()),
        };

        match frame {
            Message::Text(text) => match ClientEvent::from_json(&text) {
                Ok(event) => hub.dispatch(conn, event).await,
                Err(e) => warn!(conn = %conn, error = %ServerError::from(e), "Frame dropped"),
            },
            Message::Binary(data) => {
                let violation =
                    ServerError::ProtocolViolation(format!("binary frame of {} bytes", data.len()));
                warn!(conn = %conn, error = %violation, "Frame dropped");
            }
            Message::Close(_) => {
                break ServerError::TransportDisconnect("close frame".to_string());
            }
            // Ping/pong are answered by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    };

    debug!(conn = %conn, reason = %reason, "Read loop finished");
    hub.disconnect(conn);
    writer.abort();
    info!(conn = %conn, "WebSocket disconnected");
}
