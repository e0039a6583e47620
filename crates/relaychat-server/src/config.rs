//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use relaychat_shared::constants::{CHUNK_SIZE, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Flat directory holding uploaded files, keyed by filename.
    /// Env: `UPLOAD_DIR`
    /// Default: `./upload_files`
    pub upload_dir: PathBuf,

    /// PEM file holding the server's RSA private key. Generated on first
    /// start if missing, with the public half written next to it.
    /// Env: `PRIVATE_KEY_PATH`
    /// Default: `./private_key.pem`
    pub private_key_path: PathBuf,

    /// File transfer chunk size in bytes. Clients must use the same value.
    /// Env: `CHUNK_SIZE`
    /// Default: 49152 (48 KiB)
    pub chunk_size: usize,

    /// Per-connection outbound event queue depth.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `256`
    pub outbound_queue: usize,

    /// Largest accepted WebSocket message in bytes.
    /// Env: `MAX_FRAME_SIZE`
    /// Default: 1 MiB
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            upload_dir: PathBuf::from("./upload_files"),
            private_key_path: PathBuf::from("./private_key.pem"),
            chunk_size: CHUNK_SIZE,
            outbound_queue: 256,
            max_frame_size: 1024 * 1024, // 1 MiB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Some(path) = lookup("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        if let Some(path) = lookup("PRIVATE_KEY_PATH") {
            config.private_key_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("CHUNK_SIZE") {
            match parse_positive(&val) {
                Some(n) => config.chunk_size = n,
                None => tracing::warn!(value = %val, "Invalid CHUNK_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE") {
            match parse_positive(&val) {
                Some(n) => config.outbound_queue = n,
                None => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE, using default"),
            }
        }

        if let Some(val) = lookup("MAX_FRAME_SIZE") {
            match parse_positive(&val) {
                Some(n) => config.max_frame_size = n,
                None => tracing::warn!(value = %val, "Invalid MAX_FRAME_SIZE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive(val: &str) -> Option<usize> {
    val.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
