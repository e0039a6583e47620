//! # relaychat-server
//!
//! Encrypted multi-user chat relay.
//!
//! This binary provides:
//! - **Key handshake**: clients wrap a per-connection AES key with the
//!   server's RSA public key (served at `/public-key`)
//! - **Re-encrypting message router**: every chat message is decrypted with
//!   the sender's key and encrypted again under each recipient's key
//! - **Chunked file transfer** with SHA-256 verification on upload and
//!   streaming download
//! - **WebSocket transport** (axum) carrying named JSON events at `/ws`

mod api;
mod config;
mod error;
mod file_store;
mod hub;
mod keys;
mod outbox;
mod registry;
mod router;
mod socket;
mod transfer;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::file_store::FileStore;
use crate::hub::Hub;
use crate::keys::ServerKeys;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaychat_server=debug")),
        )
        .init();

    info!("Starting relaychat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let keys = ServerKeys::load_or_generate(&config.private_key_path).await?;

    // Upload directory (created if missing)
    let store = FileStore::new(config.upload_dir.clone()).await?;

    let hub = Hub::new(
        keys.private_key,
        store,
        config.chunk_size,
        config.outbound_queue,
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        public_pem: Arc::from(keys.public_pem.as_str()),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
