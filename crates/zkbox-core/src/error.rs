use thiserror::Error;

pub type ZkResult<T> = Result<T, ZkError>;

#[derive(Debug, Error)]
pub enum ZkError {
    #[error("master key unavailable: session expired or not unlocked, re-authentication required")]
    KeyUnavailable,

    #[error("{0}")]
    Authentication(AuthFailure),

    #[error("secure randomness unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Which step of an AEAD open failed tag verification.
///
/// The raw cipher only knows the tag did not verify; the envelope layer
/// reclassifies that into a cause the user can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Tag mismatch reported by the cipher itself, before classification.
    TagMismatch,
    /// The EDEK did not open under the session's master key.
    WrongKey,
    /// The EDEK opened, but the content or name ciphertext did not.
    CorruptedData,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::TagMismatch => f.write_str("authentication failed: tag mismatch"),
            AuthFailure::WrongKey => f.write_str(
                "cannot unlock file: wrong account or password, or the file was encrypted elsewhere",
            ),
            AuthFailure::CorruptedData => {
                f.write_str("file data is corrupted: integrity check failed after key unwrap")
            }
        }
    }
}

/// Coarse error classification for callers that branch on the failure mode
/// (prompt for credentials vs. report corruption vs. retry the network).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyUnavailable,
    AuthenticationFailure,
    RandomnessUnavailable,
    ProtocolViolation,
    TransportFailure,
    InvalidInput,
    Config,
    Io,
    Other,
}

impl ZkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZkError::KeyUnavailable => ErrorKind::KeyUnavailable,
            ZkError::Authentication(_) => ErrorKind::AuthenticationFailure,
            ZkError::RandomnessUnavailable(_) => ErrorKind::RandomnessUnavailable,
            ZkError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            ZkError::Transport(_) => ErrorKind::TransportFailure,
            ZkError::InvalidInput(_) => ErrorKind::InvalidInput,
            ZkError::Config(_) => ErrorKind::Config,
            ZkError::Io(_) => ErrorKind::Io,
            ZkError::Other(_) => ErrorKind::Other,
        }
    }

    /// True when the user has to enter credentials again to proceed.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            ZkError::KeyUnavailable | ZkError::Authentication(AuthFailure::WrongKey)
        )
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ZkError::ProtocolViolation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ZkError::Transport(msg.into())
    }
}

impl From<AuthFailure> for ZkError {
    fn from(failure: AuthFailure) -> Self {
        ZkError::Authentication(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_key_and_corruption_messages_differ() {
        let wrong = ZkError::from(AuthFailure::WrongKey).to_string();
        let corrupt = ZkError::from(AuthFailure::CorruptedData).to_string();
        assert_ne!(wrong, corrupt);
        assert!(wrong.contains("wrong account or password"));
        assert!(corrupt.contains("corrupted"));
    }

    #[test]
    fn test_kind_and_reauth() {
        assert_eq!(ZkError::KeyUnavailable.kind(), ErrorKind::KeyUnavailable);
        assert!(ZkError::KeyUnavailable.requires_reauthentication());
        assert!(ZkError::from(AuthFailure::WrongKey).requires_reauthentication());
        assert!(!ZkError::from(AuthFailure::CorruptedData).requires_reauthentication());
        assert_eq!(
            ZkError::protocol("missing header").kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            ZkError::transport("connection reset").kind(),
            ErrorKind::TransportFailure
        );
    }
}
