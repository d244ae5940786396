//! Mutation error types.

use entity_collection::{CollectionError, EntityId};
use request_pipeline::ApiError;
use thiserror::Error;

/// Mutation error type.
///
/// When a request fails the collection has already been restored to its
/// state before the mutation. An unusable create response instead leaves
/// the record in place marked [`SyncState::Failed`](entity_collection::SyncState::Failed).
#[derive(Error, Debug)]
pub enum MutationError {
    /// The request failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The collection refused a reconciliation step
    #[error("Collection invariant violated: {0}")]
    Reconciliation(#[from] CollectionError),

    /// The target record is not in the collection
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The payload cannot be applied to the record
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The server accepted the request but its answer is unusable
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl MutationError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            MutationError::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            MutationError::Api(err) => err.user_message(),
            MutationError::UnknownEntity(_) => "This record no longer exists.".to_string(),
            MutationError::InvalidPayload(reason) => reason.clone(),
            MutationError::UnexpectedResponse(_) => {
                "The server answered unexpectedly. Reload to see the latest data.".to_string()
            }
            MutationError::Reconciliation(_) => "Something went wrong. Please reload.".to_string(),
        }
    }
}

/// Result type alias using MutationError.
pub type MutationResult<T> = Result<T, MutationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use entity_collection::ServerId;
    use request_pipeline::ErrorBody;

    #[test]
    fn user_message_passes_server_detail_through() {
        let err = MutationError::from(ApiError::Http {
            status: 400,
            body: ErrorBody::new(r#"{"title": ["This field is required."]}"#),
        });
        assert_eq!(err.user_message(), "title: This field is required.");
        assert!(err.api_error().is_some());
    }

    #[test]
    fn unknown_entity_message() {
        let err = MutationError::UnknownEntity(EntityId::from(ServerId::from(4)));
        assert_eq!(err.to_string(), "Unknown entity 4");
        assert!(err.api_error().is_none());
    }
}
