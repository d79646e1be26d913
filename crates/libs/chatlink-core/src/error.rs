use serde::{Deserialize, Serialize};

/// Errors surfaced by the correlation/queue/transfer core.
///
/// `DuplicateId` is a logic error (correlation ids are never reused);
/// everything else is an operational condition the caller can act on.
/// Nothing here is fatal to the process: a failing durable store degrades
/// the engine to in-memory operation, it does not stop it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error("duplicate correlation id: {id}")]
    DuplicateId { id: String },

    #[error("no live entry for correlation id: {id}")]
    NotFound { id: String },

    #[error("durable storage failed: {message}")]
    StorageFailure { message: String },

    #[error("transport rejected send: {reason}")]
    TransportRejected { reason: String },

    #[error("server reported error: {message}")]
    Remote { message: String },

    #[error("serialization failed: {message}")]
    Serialization { message: String },
}

impl CoreError {
    /// Returns `true` for transient conditions that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageFailure { .. } | Self::TransportRejected { .. }
        )
    }

    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: message.into(),
        }
    }

    pub fn transport_rejected(reason: impl Into<String>) -> Self {
        Self::TransportRejected {
            reason: reason.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }
}
