//! zkbox-crypto: client-side zero-knowledge envelope encryption
//!
//! Key hierarchy:
//! ```text
//! Password ──PBKDF2-HMAC-SHA256 (salt, 600k iters)──▶ Master Key (256-bit, memory only)
//!   ├── EDEK = AES-256-GCM(master, edek_iv, DEK)        48 bytes, stored by backend
//!   │     └── DEK (per file, 256-bit random)
//!   │           └── ciphertext = AES-256-GCM(DEK, cipher_iv, file bytes)
//!   └── encrypted name = AES-256-GCM(master, name_iv, utf8(filename))
//! ```
//!
//! The backend stores ciphertext plus `{cipher_iv, edek, edek_iv,
//! encrypted_name, name_iv}` and can decrypt none of it.

pub mod cipher;
pub mod encoding;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod names;
pub mod random;
pub mod session;
pub mod share;

pub use cipher::{decrypt, encrypt, generate_iv};
pub use envelope::{open, seal, EnvelopeMetadata, OpenedFile, SealedFile};
pub use kdf::{derive_master_key, derive_master_key_async, generate_salt, KdfParams, MasterKey};
pub use keys::{generate_data_key, unwrap_data_key, wrap_data_key, DataKey, WrappedKey};
pub use names::{decrypt_name, encrypt_name, EncryptedName};
pub use session::{KeySource, MasterKeySession};
pub use share::{create_share, open_shared, ShareFragment};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped DEK: key + tag
pub const EDEK_SIZE: usize = KEY_SIZE + TAG_SIZE;

/// Minimum accepted salt length
pub const MIN_SALT_SIZE: usize = 16;
