//! Error types for graph and key/value stores.

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`GraphStore`](crate::graph::GraphStore) and
/// [`KvStore`](crate::kv::KvStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Arguments failed a structural check.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An operation named an entity that does not exist.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Relations referenced entities that do not exist.
    #[error("Relation endpoints do not exist: {}", .0.join(", "))]
    MissingEndpoints(Vec<String>),

    /// The underlying database failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the caller's arguments caused the error, rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::EntityNotFound(_) | Self::MissingEndpoints(_)
        )
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        Self::backend(err)
    }
}

impl From<neo4rs::DeError> for StoreError {
    fn from(err: neo4rs::DeError) -> Self {
        Self::backend(err)
    }
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        Self::backend(err)
    }
}
