//! Error types for DID routing operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("No available DID in pool")]
    NoAvailableDid,

    #[error("No active call for DID {0}")]
    NoActiveCallForDid(String),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    #[error("Persistence read failed: {0}")]
    PersistenceReadFailed(String),

    #[error("Invalid call status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl RouterError {
    /// Whether the transport should answer with a not-found response rather
    /// than a server error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RouterError::NoActiveCallForDid(_) | RouterError::CallNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
