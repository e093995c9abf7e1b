//! Errors returned by the engine's operations.
//!
//! Each operation family gets its own enum so callers can match on exactly
//! the failures that operation can produce. Storage's `DocumentNotFound`
//! is lifted into the operation's own not-found variant.

use crate::storage::{DocumentId, StorageError};
use docent_embed::EmbedError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("storage failed: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for IndexError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DocumentNotFound(id) => Self::DocumentNotFound(id),
            other => Self::Storage(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("storage failed: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for StructureError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DocumentNotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Failures while opening an engine. All of them are configuration problems
/// or an unusable index, never transient.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(
        "index stores {registered}-dimensional vectors from '{registered_model}', \
         but the configured model '{configured_model}' produces {configured}"
    )]
    IncompatibleModel {
        registered_model: String,
        registered: usize,
        configured_model: String,
        configured: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("embedding setup failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_lifted() {
        assert!(matches!(
            IndexError::from(StorageError::DocumentNotFound(3)),
            IndexError::DocumentNotFound(3)
        ));
        assert!(matches!(
            StructureError::from(StorageError::DocumentNotFound(3)),
            StructureError::NotFound(3)
        ));
        assert!(matches!(
            IndexError::from(StorageError::InvalidRecord("x".into())),
            IndexError::Storage(_)
        ));
    }

    #[test]
    fn test_messages() {
        let err = EngineError::IncompatibleModel {
            registered_model: "fastembed:bge-base-en-v1.5".into(),
            registered: 768,
            configured_model: "hashing:feature-hash-64".into(),
            configured: 64,
        };
        let message = err.to_string();
        assert!(message.contains("768"));
        assert!(message.contains("feature-hash-64"));
        assert_eq!(
            IndexError::DocumentNotFound(9).to_string(),
            "document 9 not found"
        );
    }
}
