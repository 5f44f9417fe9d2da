//! AES-256-GCM over whole byte buffers
//!
//! Output layout is the standard AEAD one, with no framing of our own:
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//! The IV travels separately (it is its own wire field), and no AAD is used,
//! so the bytes are identical to WebCrypto's `AES-GCM` encrypt output.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zkbox_core::{AuthFailure, ZkError, ZkResult};

use crate::random::random_array;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Generate a fresh 96-bit IV. Never counter-based: one CSPRNG draw per call.
pub fn generate_iv() -> ZkResult<[u8; IV_SIZE]> {
    random_array()
}

/// Encrypt `plaintext` under `key`/`iv`.
///
/// Returns `ciphertext || tag`, exactly `plaintext.len() + 16` bytes.
pub fn encrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> ZkResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| ZkError::Other(anyhow::anyhow!("AES-GCM encryption failed: {e}")))
}

/// Decrypt `ciphertext || tag` under `key`/`iv`.
///
/// Any tag mismatch (wrong key, wrong IV, flipped bit anywhere) fails with
/// `AuthFailure::TagMismatch`. Callers reclassify that by context.
pub fn decrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> ZkResult<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(AuthFailure::TagMismatch.into());
    }

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| AuthFailure::TagMismatch.into())
}
