//! AES-256-GCM filename encryption
//!
//! Names are encrypted with a fresh random IV each time, so the same name
//! sealed twice yields unrelated ciphertexts. The backend never needs to look
//! a file up by name: it addresses objects by opaque file id and stores the
//! placeholder `encrypted.bin` as the visible name.

use zkbox_core::ZkResult;

use crate::cipher::{decrypt, encrypt, generate_iv};
use crate::encoding::utf8_decode;
use crate::{IV_SIZE, KEY_SIZE};

/// An encrypted filename and the IV it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedName {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
}

/// Encrypt a filename under `key` (the master key, or a DEK for share links).
pub fn encrypt_name(key: &[u8; KEY_SIZE], plaintext_name: &str) -> ZkResult<EncryptedName> {
    let iv = generate_iv()?;
    let ciphertext = encrypt(key, &iv, plaintext_name.as_bytes())?;
    Ok(EncryptedName { ciphertext, iv })
}

/// Decrypt a filename sealed by [`encrypt_name`].
///
/// Tag failures surface as `AuthFailure::TagMismatch`; the caller knows
/// whether that means a wrong key or corruption. Invalid UTF-8 after a
/// successful open is a `ProtocolViolation`.
pub fn decrypt_name(key: &[u8; KEY_SIZE], encrypted: &EncryptedName) -> ZkResult<String> {
    let plaintext = decrypt(key, &encrypted.iv, &encrypted.ciphertext)?;
    utf8_decode(plaintext)
}
