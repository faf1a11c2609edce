use thiserror::Error;

/// Unified error type for all adapter operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Identifier or filter-first lookup missed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate identifier on create (externally-keyed adapters only)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested field or group-by key not present on the collection
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Malformed request (e.g. weighting without a field projection)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Operation not supported by this adapter
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Backend driver or persistence failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a "not found" error with custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        StoreError::Conflict(msg.into())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        StoreError::SchemaMismatch(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        StoreError::InvalidOperation(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        StoreError::Unsupported(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
