use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PBKDF2 iteration count for new accounts
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Master key inactivity window in seconds (30 min)
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;

/// Top-level client configuration (loaded from zkbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZkboxConfig {
    pub kdf: KdfConfig,
    pub session: SessionConfig,
    pub account: AccountConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// PBKDF2-HMAC-SHA256 parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Iteration count; account-bound, must match every derivation (default: 600000)
    pub iterations: u32,
    /// Salt length in bytes for newly generated salts (default: 16, minimum: 16)
    pub salt_len: usize,
}

/// Master key session lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity window before the master key is wiped (default: 1800 = 30 min)
    pub timeout_secs: u64,
}

/// Account-bound KDF inputs normally held by the storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Hex-encoded account salt (generate with `zkbox init`)
    pub salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Reference backend: "fs" or "memory"
    pub backend: String,
    /// Root directory for the "fs" backend
    pub root: PathBuf,
    /// Object prefix inside the backend
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
            salt_len: 16,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/zkbox/store"),
            prefix: "zkbox".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl ZkboxConfig {
    /// Reject values the crypto layer would refuse later anyway, with a
    /// config-level message instead.
    pub fn validate(&self) -> crate::ZkResult<()> {
        if self.kdf.iterations == 0 {
            return Err(crate::ZkError::Config("kdf.iterations must be > 0".into()));
        }
        if self.kdf.salt_len < 16 {
            return Err(crate::ZkError::Config(format!(
                "kdf.salt_len must be at least 16 (got {})",
                self.kdf.salt_len
            )));
        }
        if self.session.timeout_secs == 0 {
            return Err(crate::ZkError::Config(
                "session.timeout_secs must be > 0".into(),
            ));
        }
        match self.storage.backend.as_str() {
            "fs" | "memory" => {}
            other => {
                return Err(crate::ZkError::Config(format!(
                    "unknown storage.backend '{other}' (expected fs or memory)"
                )))
            }
        }
        if let Some(salt) = &self.account.salt {
            if salt.len() < 32
                || !salt.len().is_multiple_of(2)
                || !salt.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(crate::ZkError::Config(
                    "account.salt must be an even-length hex string of at least 16 bytes".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[kdf]
iterations = 700000
salt_len = 32

[session]
timeout_secs = 600

[account]
salt = "000102030405060708090a0b0c0d0e0f"

[storage]
backend = "memory"
prefix = "alice"

[log]
level = "debug"
format = "json"
"#;
        let config: ZkboxConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.kdf.iterations, 700_000);
        assert_eq!(config.kdf.salt_len, 32);
        assert_eq!(config.session.timeout_secs, 600);
        assert_eq!(
            config.account.salt.as_deref(),
            Some("000102030405060708090a0b0c0d0e0f")
        );
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.prefix, "alice");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let config: ZkboxConfig = toml::from_str("").unwrap();

        assert_eq!(config.kdf.iterations, 600_000);
        assert_eq!(config.kdf.salt_len, 16);
        assert_eq!(config.session.timeout(), std::time::Duration::from_secs(1800));
        assert!(config.account.salt.is_none());
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[session]
timeout_secs = 60
"#;
        let config: ZkboxConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.session.timeout_secs, 60);
        // Defaults
        assert_eq!(config.kdf.iterations, 600_000);
        assert_eq!(config.storage.prefix, "zkbox");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ZkboxConfig::default();
        config.kdf.salt_len = 8;
        assert!(config.validate().is_err());

        let mut config = ZkboxConfig::default();
        config.storage.backend = "ftp".into();
        assert!(config.validate().is_err());

        let mut config = ZkboxConfig::default();
        config.account.salt = Some("abcd".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_remote_backends() {
        let mut config = ZkboxConfig::default();
        config.storage.backend = "s3".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("expected fs or memory"));
    }

    #[test]
    fn test_unknown_storage_keys_are_ignored() {
        let toml_str = r#"
[storage]
backend = "memory"
endpoint = "http://localhost:8333"
bucket = "zkbox"
"#;
        let config: ZkboxConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_use_shared_constants() {
        let config = ZkboxConfig::default();
        assert_eq!(config.kdf.iterations, DEFAULT_KDF_ITERATIONS);
        assert_eq!(config.session.timeout_secs, DEFAULT_SESSION_TIMEOUT_SECS);
        assert_eq!(DEFAULT_SESSION_TIMEOUT_SECS, 1800);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ZkboxConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ZkboxConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.kdf.iterations, parsed.kdf.iterations);
        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.session.timeout_secs, parsed.session.timeout_secs);
    }
}
