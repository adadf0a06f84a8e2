//! Ingestion error types.

use uuid::Uuid;

use crate::source::SourceError;
use crate::store::StoreError;

/// Errors that abort an ingestion batch or roster update.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Persisting the batch failed; nothing was written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The batch's source could not be read or fetched.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl IngestError {
    /// The match id if this error is about a match that does not exist.
    #[must_use]
    pub fn unknown_match(&self) -> Option<Uuid> {
        match self {
            Self::Store(StoreError::UnknownMatch(id)) => Some(*id),
            _ => None,
        }
    }
}
