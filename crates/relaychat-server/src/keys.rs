//! Server RSA key pair used for the handshake.
//!
//! The private key is read from a PEM file. On first start the file does not
//! exist yet, so a fresh key pair is generated and both halves are written
//! out: the private key at the configured path and the public key as
//! `public_key.pem` in the same directory, ready to hand to clients.

use std::path::{Path, PathBuf};

use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::fs;
use tracing::info;

use relaychat_shared::constants::RSA_KEY_BITS;
use relaychat_shared::crypto;

use crate::error::ServerError;

pub struct ServerKeys {
    pub private_key: RsaPrivateKey,
    /// PEM (SPKI) encoding of the public half, served at `/public-key`.
    pub public_pem: String,
}

impl ServerKeys {
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, ServerError> {
        let public_pem = crypto::public_key_to_pem(&RsaPublicKey::from(&private_key))?;
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    pub async fn load_or_generate(path: &Path) -> Result<Self, ServerError> {
        if fs::try_exists(path).await? {
            let pem = fs::read_to_string(path).await?;
            let private_key = crypto::private_key_from_pem(&pem)?;
            info!(path = %path.display(), "Loaded RSA private key");
            return Self::from_private_key(private_key);
        }

        // 2048-bit generation takes a noticeable moment; keep it off the runtime threads.
        let private_key = tokio::task::spawn_blocking(|| {
            crypto::generate_rsa_private_key(RSA_KEY_BITS)
        })
        .await
        .map_err(|e| ServerError::Crypto(format!("Key generation task failed: {e}")))??;

        let keys = Self::from_private_key(private_key)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, crypto::private_key_to_pem(&keys.private_key)?).await?;
        let public_path = public_key_path(path);
        fs::write(&public_path, &keys.public_pem).await?;

        info!(
            private = %path.display(),
            public = %public_path.display(),
            bits = RSA_KEY_BITS,
            "Generated new RSA key pair"
        );

        Ok(keys)
    }
}

fn public_key_path(private_path: &Path) -> PathBuf {
    private_path.with_file_name("public_key.pem")
}
