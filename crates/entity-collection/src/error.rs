//! Collection error types.

use crate::EntityId;
use thiserror::Error;

/// A collection operation would break an invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// No record with this id
    #[error("No record with id {0}")]
    NotFound(EntityId),

    /// A record with this id already exists
    #[error("Duplicate record id {0}")]
    DuplicateId(EntityId),

    /// Insertion index past the end of the collection
    #[error("Index {index} out of bounds for collection of {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Result type alias using CollectionError.
pub type CollectionResult<T> = Result<T, CollectionError>;
