//! Key hierarchy: per-file data keys and their wrapping under the master key

use zeroize::Zeroize;
use zkbox_core::{AuthFailure, ZkError, ZkResult};

use crate::cipher::{decrypt, encrypt, generate_iv};
use crate::kdf::MasterKey;
use crate::random::random_array;
use crate::{EDEK_SIZE, IV_SIZE, KEY_SIZE};

/// A per-file 256-bit data encryption key (DEK). Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A DEK encrypted under the master key (the EDEK) plus the IV used.
///
/// This is the only form in which a DEK is ever stored or transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub edek: [u8; EDEK_SIZE],
    pub iv: [u8; IV_SIZE],
}

/// Generate a fresh random DEK. One per file, or per new version of a file.
pub fn generate_data_key() -> ZkResult<DataKey> {
    Ok(DataKey::from_bytes(random_array()?))
}

/// Wrap (encrypt) a DEK under the master key with a fresh IV.
///
/// Output: 48-byte EDEK (`[32-byte encrypted key][16-byte tag]`) and its IV.
pub fn wrap_data_key(master: &MasterKey, dek: &DataKey) -> ZkResult<WrappedKey> {
    let iv = generate_iv()?;
    let ciphertext = encrypt(master.as_bytes(), &iv, dek.as_bytes())?;

    let len = ciphertext.len();
    let edek: [u8; EDEK_SIZE] = ciphertext.try_into().map_err(|_| {
        ZkError::Other(anyhow::anyhow!(
            "wrapped key has wrong size: {len} bytes (expected {EDEK_SIZE})"
        ))
    })?;

    Ok(WrappedKey { edek, iv })
}

/// Unwrap (decrypt) an EDEK with the master key.
///
/// A tag mismatch here means the master key is not the one the file was
/// sealed under, and is reported as `AuthFailure::WrongKey`.
pub fn unwrap_data_key(master: &MasterKey, wrapped: &WrappedKey) -> ZkResult<DataKey> {
    let mut plaintext = decrypt(master.as_bytes(), &wrapped.iv, &wrapped.edek).map_err(|e| {
        match e {
            ZkError::Authentication(_) => ZkError::Authentication(AuthFailure::WrongKey),
            other => other,
        }
    })?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(ZkError::protocol(format!(
            "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(DataKey::from_bytes(key_bytes))
}
