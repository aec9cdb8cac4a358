//! Caller-facing error taxonomy for reconciliation operations.
//!
//! Every variant leaves the record store in its last committed state.

use thiserror::Error;

use crate::pipeline::storage::StoreError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Stored records are unreadable: {0}")]
    StorageCorrupt(String),

    #[error("Record store error: {0}")]
    Store(StoreError),

    #[error("Invalid image for record {record_id}: {reason}")]
    InvalidImage { record_id: String, reason: String },

    #[error("Extraction failed at index {index} (record {record_id}): {reason}")]
    ExtractionFailed {
        record_id: String,
        index: usize,
        reason: String,
    },

    #[error("Record {record_id} has not been analyzed")]
    NotAnalyzed { record_id: String },

    #[error("Remote write failed for record {record_id}: {reason}")]
    RemoteWriteFailed { record_id: String, reason: String },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record {record_id} has no fields to save")]
    NothingToSave { record_id: String },

    #[error("Record {record_id} is already being saved")]
    SaveInProgress { record_id: String },

    #[error("A batch run is already in progress")]
    BatchInProgress,

    #[error("Batch worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt(reason) => Self::StorageCorrupt(reason),
            other => Self::Store(other),
        }
    }
}

impl ReconcileError {
    /// Record the error is keyed to, when there is one.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::InvalidImage { record_id, .. }
            | Self::ExtractionFailed { record_id, .. }
            | Self::NotAnalyzed { record_id }
            | Self::RemoteWriteFailed { record_id, .. }
            | Self::NothingToSave { record_id }
            | Self::SaveInProgress { record_id } => Some(record_id.as_str()),
            Self::RecordNotFound(id) => Some(id.as_str()),
            _ => None,
        }
    }

    /// External-service failures that may succeed if the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed { .. }
                | Self::RemoteWriteFailed { .. }
                | Self::SaveInProgress { .. }
                | Self::BatchInProgress
        )
    }
}
