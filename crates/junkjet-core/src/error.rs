use std::path::PathBuf;

/// Core error types for junkjet.
#[derive(Debug, thiserror::Error)]
pub enum JunkjetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Store backend '{0}' is not compiled in")]
    BackendUnavailable(String),
}

/// Failures of the chatbot session subsystem.
///
/// An absent session is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Session store call timed out after {0} ms")]
    StoreTimeout(u64),

    #[error("Corrupt session payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// True for failures of the backing store rather than of the caller.
    pub fn is_store_failure(&self) -> bool {
        !matches!(self, SessionError::InvalidInput(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, JunkjetError>;

pub type SessionResult<T> = std::result::Result<T, SessionError>;
