//! Key derivation: PBKDF2-HMAC-SHA256 password → master key

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;
use zkbox_core::{ZkError, ZkResult};

use crate::random::random_vec;
use crate::{KEY_SIZE, MIN_SALT_SIZE};

/// Default PBKDF2 iteration count for new accounts.
pub const DEFAULT_ITERATIONS: u32 = zkbox_core::config::DEFAULT_KDF_ITERATIONS;

/// Upper bound on a server-supplied iteration count.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// A 256-bit master key derived from the account password.
///
/// Lives in process memory only. Zeroized on drop to prevent secrets
/// lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Zeroize for MasterKey {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters for KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Iteration count. Account-bound: every client must use the same value
    /// for a given account or it derives a different key.
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl From<&zkbox_core::config::KdfConfig> for KdfParams {
    fn from(cfg: &zkbox_core::config::KdfConfig) -> Self {
        Self {
            iterations: cfg.iterations,
        }
    }
}

/// Derive a 256-bit master key from a password and salt using
/// PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same password, salt, and iteration count always yield
/// the same key, on every platform. The salt must be at least 16 bytes; it is
/// not secret and is stored server-side with the account.
///
/// This is CPU-bound (hundreds of milliseconds at the default count). Async
/// callers should use [`derive_master_key_async`].
pub fn derive_master_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> ZkResult<MasterKey> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(ZkError::InvalidInput(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_SIZE})",
            salt.len()
        )));
    }
    if params.iterations == 0 || params.iterations > MAX_ITERATIONS {
        return Err(ZkError::InvalidInput(format!(
            "PBKDF2 iteration count {} outside 1..={MAX_ITERATIONS}",
            params.iterations
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        params.iterations,
        &mut key,
    );

    let master = MasterKey::from_bytes(key);
    key.zeroize();
    Ok(master)
}

/// [`derive_master_key`] on the blocking thread pool, so the calling task
/// (and whatever event loop drives it) keeps running during the derivation.
pub async fn derive_master_key_async(
    password: SecretString,
    salt: Vec<u8>,
    params: KdfParams,
) -> ZkResult<MasterKey> {
    let started = std::time::Instant::now();
    let key = tokio::task::spawn_blocking(move || derive_master_key(&password, &salt, &params))
        .await
        .map_err(|e| ZkError::Other(anyhow::anyhow!("KDF task failed: {e}")))??;

    tracing::debug!(
        iterations = params.iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "master key derived"
    );
    Ok(key)
}

/// Generate a random salt of `len` bytes (at least 16).
pub fn generate_salt(len: usize) -> ZkResult<Vec<u8>> {
    if len < MIN_SALT_SIZE {
        return Err(ZkError::InvalidInput(format!(
            "salt length {len} below minimum {MIN_SALT_SIZE}"
        )));
    }
    random_vec(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn fast() -> KdfParams {
        KdfParams { iterations: 1000 }
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = [1u8; 16];

        let key1 = derive_master_key(&password, &salt, &fast()).unwrap();
        let key2 = derive_master_key(&password, &salt, &fast()).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    // PBKDF2-HMAC-SHA256 published vector (dkLen=40 truncated to 32; block 1
    // does not depend on dkLen)
    #[test]
    fn test_kdf_known_answer() {
        let password = SecretString::from("passwordPASSWORDpassword");
        let salt = b"saltSALTsaltSALTsaltSALTsaltSALTsalt";

        let key = derive_master_key(&password, salt, &KdfParams { iterations: 4096 }).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "348c89dbcbd32b2f32d814b8116e84cf2b17347ebc1800181c4e2a1fb8dd53e1"
        );
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; 16];

        let key1 = derive_master_key(&SecretString::from("password-a"), &salt, &fast()).unwrap();
        let key2 = derive_master_key(&SecretString::from("password-b"), &salt, &fast()).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts_and_iterations() {
        let password = SecretString::from("same-password");

        let key1 = derive_master_key(&password, &[1u8; 16], &fast()).unwrap();
        let key2 = derive_master_key(&password, &[2u8; 16], &fast()).unwrap();
        let key3 = derive_master_key(&password, &[1u8; 16], &KdfParams { iterations: 1001 }).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
        assert_ne!(
            key1.as_bytes(),
            key3.as_bytes(),
            "iteration count is part of the key identity"
        );
    }

    #[test]
    fn test_kdf_rejects_short_salt() {
        let err = derive_master_key(&SecretString::from("pw"), &[0u8; 15], &fast()).unwrap_err();
        assert!(matches!(err, ZkError::InvalidInput(_)));
    }

    #[test]
    fn test_kdf_rejects_bad_iterations() {
        let pw = SecretString::from("pw");
        assert!(derive_master_key(&pw, &[0u8; 16], &KdfParams { iterations: 0 }).is_err());
        assert!(derive_master_key(
            &pw,
            &[0u8; 16],
            &KdfParams {
                iterations: MAX_ITERATIONS + 1
            }
        )
        .is_err());
    }

    #[test]
    fn test_generate_salt() {
        let s1 = generate_salt(16).unwrap();
        let s2 = generate_salt(16).unwrap();
        assert_eq!(s1.len(), 16);
        assert_ne!(s1, s2);
        assert_eq!(generate_salt(32).unwrap().len(), 32);
        assert!(matches!(generate_salt(8), Err(ZkError::InvalidInput(_))));
    }

    #[test]
    fn test_default_params_match_config() {
        let cfg = zkbox_core::config::KdfConfig::default();
        assert_eq!(KdfParams::default(), KdfParams::from(&cfg));
        assert_eq!(KdfParams::default().iterations, 600_000);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MasterKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }

    #[tokio::test]
    async fn test_kdf_async_matches_sync() {
        let salt = vec![3u8; 16];
        let sync_key = derive_master_key(&SecretString::from("pw"), &salt, &fast()).unwrap();
        let async_key = derive_master_key_async(SecretString::from("pw"), salt, fast())
            .await
            .unwrap();
        assert_eq!(sync_key.as_bytes(), async_key.as_bytes());
    }
}
