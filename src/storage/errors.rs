use thiserror::Error;

use crate::validation::ValidationError;

/// Errors that can arise while interacting with a content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a record that is not present.
    #[error("{0} not found")]
    NotFound(String),

    /// A unique name (username, board name) is already taken.
    #[error("{0} already exists")]
    Duplicate(String),

    /// Username/password pair did not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Input rejected before anything was written.
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    /// Password hashing backend failure.
    #[error("password hash failure: {0}")]
    PasswordHash(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },
}

impl StoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        StoreError::NotFound(what.to_string())
    }
}
