//! Share links: hand a recipient the unwrapped DEK in a URL fragment.
//!
//! The fragment (`#dek=…&iv=…&name=…&niv=…`) never reaches the server, so
//! the backend still sees only ciphertext. The recipient has no master key,
//! so the sharer re-encrypts the filename under the DEK with a fresh IV.
//!
//! Anyone holding the fragment can read the file for as long as the
//! backend serves the ciphertext.

use std::collections::HashMap;

use zkbox_core::{ZkError, ZkResult};

use crate::cipher::decrypt;
use crate::encoding::{decode_base64_url, decode_base64_url_fixed, encode_base64_url};
use crate::envelope::{corrupted_on_auth_failure, EnvelopeMetadata, OpenedFile};
use crate::kdf::MasterKey;
use crate::keys::{unwrap_data_key, DataKey};
use crate::names::{decrypt_name, encrypt_name, EncryptedName};
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

const FIELD_DEK: &str = "dek";
const FIELD_IV: &str = "iv";
const FIELD_NAME: &str = "name";
const FIELD_NIV: &str = "niv";

/// Decryption material for one shared file.
#[derive(Clone)]
pub struct ShareFragment {
    pub dek: DataKey,
    pub cipher_iv: [u8; IV_SIZE],
    /// Filename encrypted under `dek`.
    pub encrypted_name: Vec<u8>,
    pub name_iv: [u8; IV_SIZE],
}

impl std::fmt::Debug for ShareFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareFragment")
            .field("dek", &"[REDACTED]")
            .field("cipher_iv", &self.cipher_iv)
            .field("encrypted_name_len", &self.encrypted_name.len())
            .finish()
    }
}

impl ShareFragment {
    /// Render as `dek=…&iv=…&name=…&niv=…` (URL-safe base64, no padding).
    pub fn to_fragment(&self) -> String {
        format!(
            "{FIELD_DEK}={}&{FIELD_IV}={}&{FIELD_NAME}={}&{FIELD_NIV}={}",
            encode_base64_url(self.dek.as_bytes()),
            encode_base64_url(&self.cipher_iv),
            encode_base64_url(&self.encrypted_name),
            encode_base64_url(&self.name_iv),
        )
    }

    /// Strict parse of a fragment, with or without the leading `#`.
    ///
    /// Each of the four fields must appear exactly once; unknown fields and
    /// wrong sizes are rejected.
    pub fn parse(fragment: &str) -> ZkResult<Self> {
        let body = fragment.trim();
        let body = body.strip_prefix('#').unwrap_or(body);

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ZkError::protocol(format!("share fragment: malformed pair {pair:?}")))?;
            if ![FIELD_DEK, FIELD_IV, FIELD_NAME, FIELD_NIV].contains(&key) {
                return Err(ZkError::protocol(format!(
                    "share fragment: unknown field {key:?}"
                )));
            }
            if fields.insert(key, value).is_some() {
                return Err(ZkError::protocol(format!(
                    "share fragment: duplicate field {key:?}"
                )));
            }
        }

        let field = |name: &str| -> ZkResult<&str> {
            fields
                .get(name)
                .copied()
                .ok_or_else(|| ZkError::protocol(format!("share fragment: missing field {name:?}")))
        };

        let dek = decode_base64_url_fixed::<KEY_SIZE>(FIELD_DEK, field(FIELD_DEK)?)?;
        let cipher_iv = decode_base64_url_fixed::<IV_SIZE>(FIELD_IV, field(FIELD_IV)?)?;
        let encrypted_name = decode_base64_url(FIELD_NAME, field(FIELD_NAME)?)?;
        let name_iv = decode_base64_url_fixed::<IV_SIZE>(FIELD_NIV, field(FIELD_NIV)?)?;

        if encrypted_name.len() < TAG_SIZE {
            return Err(ZkError::protocol(format!(
                "share fragment: name is {} bytes, shorter than the tag",
                encrypted_name.len()
            )));
        }

        Ok(Self {
            dek: DataKey::from_bytes(dek),
            cipher_iv,
            encrypted_name,
            name_iv,
        })
    }
}

/// Build the share fragment for a file the caller owns.
///
/// Fails with `Authentication(WrongKey)` if `master` did not seal the file.
pub fn create_share(master: &MasterKey, metadata: &EnvelopeMetadata) -> ZkResult<ShareFragment> {
    let dek = unwrap_data_key(master, &metadata.wrapped_key())?;

    let filename = decrypt_name(master.as_bytes(), &metadata.encrypted_name())
        .map_err(corrupted_on_auth_failure)?;
    let name = encrypt_name(dek.as_bytes(), &filename)?;

    tracing::debug!("share fragment created");
    Ok(ShareFragment {
        dek,
        cipher_iv: metadata.cipher_iv,
        encrypted_name: name.ciphertext,
        name_iv: name.iv,
    })
}

/// Decrypt a shared file using only the fragment. No master key involved.
///
/// Any tag failure is `Authentication(CorruptedData)`: either the ciphertext
/// was altered or the fragment belongs to another file.
pub fn open_shared(fragment: &ShareFragment, ciphertext: &[u8]) -> ZkResult<OpenedFile> {
    let plaintext = decrypt(fragment.dek.as_bytes(), &fragment.cipher_iv, ciphertext)
        .map_err(corrupted_on_auth_failure)?;

    let name = EncryptedName {
        ciphertext: fragment.encrypted_name.clone(),
        iv: fragment.name_iv,
    };
    let filename = decrypt_name(fragment.dek.as_bytes(), &name).map_err(corrupted_on_auth_failure)?;

    Ok(OpenedFile {
        filename,
        plaintext,
    })
}
