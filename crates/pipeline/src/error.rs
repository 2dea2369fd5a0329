use tally_core::LedgerError;
use tally_import::FormatError;
use tally_storage::StoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::record::UploadStatus;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Unknown, expired, or owned by someone else.
    #[error("Upload not found: {0}")]
    NotFound(Uuid),
    /// The upload is stored as `failed`; no parser will run for it.
    #[error("Upload {upload_id} rejected: {}", .errors.join("; "))]
    Validation { upload_id: Uuid, errors: Vec<String> },
    #[error("Upload {upload_id}: {source}")]
    Unsupported {
        upload_id: Uuid,
        #[source]
        source: FormatError,
    },
    #[error("Upload {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: UploadStatus,
        expected: UploadStatus,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Corrupt stored record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Corrupt stored upload data: {0}")]
    Content(#[from] hex::FromHexError),
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl ImportError {
    /// The upload id this error concerns, when there is one.
    pub fn upload_id(&self) -> Option<Uuid> {
        match self {
            ImportError::NotFound(id) => Some(*id),
            ImportError::Validation { upload_id, .. } | ImportError::Unsupported { upload_id, .. } => {
                Some(*upload_id)
            }
            ImportError::InvalidState { id, .. } => Some(*id),
            _ => None,
        }
    }
}
