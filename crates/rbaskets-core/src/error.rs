use thiserror::Error;

/// Error types shared by every basket storage backend.
#[derive(Error, Debug)]
pub enum AppError {
    /// A basket with the requested name is already registered.
    #[error("Failed to create basket: {0} - already exists")]
    NameConflict(String),

    /// Basket name is empty or does not fit the storage column.
    #[error("Invalid basket name: {0}")]
    InvalidName(String),

    /// Basket configuration failed validation.
    #[error("Invalid basket configuration: {0}")]
    InvalidConfig(String),

    /// Response method key is empty or too long.
    ///
    /// `Basket::set_response` deliberately swallows this error (it is logged
    /// as `response_key_rejected`) and `Basket::get_response` reports `None`.
    #[error("Invalid response key: {0}")]
    InvalidKey(String),

    /// A mutation was attempted through a handle whose basket has been deleted.
    #[error("Basket was deleted: {0}")]
    BasketDeleted(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid runtime configuration (environment variables, connection settings).
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if this error is transient and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::DatabaseError(_))
    }
}
