//! Error types for hostpair.

/// Top-level error type for the pairing host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Server failed on {addr}: {reason}")]
    Server { addr: String, reason: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Reasons a pairing or device credential is refused.
///
/// Issuance and validation return these as values; the HTTP layer decides
/// how much of the reason reaches the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid token")]
    MalformedCredential,

    #[error("Token expired")]
    ExpiredCredential,

    #[error("Token not found")]
    UnknownCredential,

    #[error("Token already used")]
    CredentialAlreadyUsed,

    #[error("Invalid token type")]
    WrongCredentialType,

    #[error("Device not registered")]
    DeviceNotRegistered,

    #[error("Maximum devices ({max_devices}) already connected")]
    CapacityExceeded { max_devices: usize },

    #[error("Failed to sign credential: {reason}")]
    Signing { reason: String },
}

impl CredentialError {
    /// Stable snake_case tag used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedCredential => "malformed_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::UnknownCredential => "unknown_credential",
            Self::CredentialAlreadyUsed => "credential_already_used",
            Self::WrongCredentialType => "wrong_credential_type",
            Self::DeviceNotRegistered => "device_not_registered",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Signing { .. } => "signing",
        }
    }
}

/// Failures reading or writing the registry document.
///
/// Never surfaced to credential callers: the registry logs these and keeps
/// its in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Corrupt registry document {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
