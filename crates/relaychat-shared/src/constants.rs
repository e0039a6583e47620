/// Application name
pub const APP_NAME: &str = "RelayChat";

/// File transfer chunk size in bytes (48 KiB). Both ends must agree on it;
/// it is never negotiated on the wire.
pub const CHUNK_SIZE: usize = 49_152;

/// AES-256 key size in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// AES-CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// RSA modulus size used when the server generates its own key pair
pub const RSA_KEY_BITS: usize = 2048;

/// Recipient name that addresses every joined connection
pub const GLOBAL_RECIPIENT: &str = "Global";

/// Username reported when a connection leaves before it joined
pub const UNKNOWN_USERNAME: &str = "Unknown";

/// Separator between timestamp and body in a decrypted chat payload
pub const BODY_DELIMITER: char = '|';

/// Timestamp format carried in chat payloads
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Maximum username length accepted by the client
pub const MAX_USERNAME_LEN: usize = 15;

/// Maximum file size the client offers for upload (20 MB)
pub const MAX_UPLOAD_SIZE: u64 = 20 * 1000 * 1000;

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// WebSocket endpoint path
pub const WS_PATH: &str = "/ws";

/// Endpoint serving the server's RSA public key (PEM)
pub const PUBLIC_KEY_PATH: &str = "/public-key";
