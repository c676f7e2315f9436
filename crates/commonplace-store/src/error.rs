use std::time::Duration;

use thiserror::Error;

use crate::models::DocumentType;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The replicated store or blob store could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Missing document, collection or blob.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A collaborator call exceeded the caller's budget.
    #[error("{op} timed out after {budget:?}")]
    Timeout { op: &'static str, budget: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Metadata variant differs from the document's fixed type.
    #[error("Metadata type mismatch: document is {expected:?}, got {found:?}")]
    TypeMismatch {
        expected: DocumentType,
        found: DocumentType,
    },

    /// Only the document's owner may edit or delete it.
    #[error("Only the owning peer may modify this document")]
    NotOwner,

    /// Record (de)serialization error.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
