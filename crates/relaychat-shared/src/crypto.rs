//! Cipher suite shared by server and client.
//!
//! - RSA-OAEP (SHA-256 digest, MGF1-SHA-256) transports the per-connection
//!   AES key once, at handshake time.
//! - AES-256-CBC with PKCS7 padding protects every chat payload. Each call
//!   draws a fresh IV which is prepended to the ciphertext before base64.
//! - SHA-256 is the streaming file digest, hex-encoded on the wire.
//!
//! CBC carries no integrity tag: a payload decrypted under the wrong key
//! either fails padding or yields garbage, and the two cases cannot be told
//! apart from tampering.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::constants::{IV_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

// ---------------------------------------------------------------------------
// Asymmetric (key transport)
// ---------------------------------------------------------------------------

pub fn asym_encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|_| CryptoError::EncryptionFailed)
}

pub fn asym_decrypt(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), data)
        .map_err(|_| CryptoError::KeyExchangeFailure)
}

/// Client side of the handshake: RSA-wrap `key` and base64 it for the
/// `encrypted_aes` field.
pub fn wrap_symmetric_key(
    public_key: &RsaPublicKey,
    key: &SymmetricKey,
) -> Result<String, CryptoError> {
    let wrapped = asym_encrypt(public_key, key)?;
    Ok(BASE64.encode(wrapped))
}

/// Server side of the handshake. Anything other than exactly one AES-256
/// key after unwrapping is a key exchange failure.
pub fn unwrap_symmetric_key(
    private_key: &RsaPrivateKey,
    encrypted_b64: &str,
) -> Result<SymmetricKey, CryptoError> {
    let wrapped = BASE64
        .decode(encrypted_b64.as_bytes())
        .map_err(|_| CryptoError::KeyExchangeFailure)?;
    let raw = asym_decrypt(private_key, &wrapped)?;

    raw.as_slice()
        .try_into()
        .map_err(|_| CryptoError::KeyExchangeFailure)
}

pub fn generate_rsa_private_key(bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Accepts both PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1
/// (`BEGIN RSA PRIVATE KEY`) PEM documents.
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String, CryptoError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.as_str().to_owned())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, CryptoError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

// ---------------------------------------------------------------------------
// Symmetric (per-message)
// ---------------------------------------------------------------------------

// Returns base64(iv || ciphertext)
pub fn sym_encrypt(key: &SymmetricKey, plaintext: &str) -> Result<String, CryptoError> {
    let iv = generate_iv();
    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut output = Vec::with_capacity(IV_SIZE + ciphertext.len());
    output.extend_from_slice(&iv);
    output.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(output))
}

pub fn sym_decrypt(key: &SymmetricKey, encoded: &str) -> Result<String, CryptoError> {
    let data = BASE64
        .decode(encoded.as_bytes())
        .map_err(|_| CryptoError::DecryptionFailure)?;
    if data.len() < IV_SIZE {
        return Err(CryptoError::DecryptionFailure);
    }

    let (iv, ciphertext) = data.split_at(IV_SIZE);
    let cipher =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::DecryptionFailure)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailure)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailure)
}

// ---------------------------------------------------------------------------
// File digest
// ---------------------------------------------------------------------------

/// Streaming SHA-256 accumulator for file transfers.
#[derive(Clone, Default)]
pub struct FileDigest {
    hasher: Sha256,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Lowercase hex digest, as carried in `hash_file`.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
