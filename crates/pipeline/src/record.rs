use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{EntryId, UserId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded,
    Previewed,
    Confirmed,
    Imported,
    RolledBack,
    Failed,
}

impl UploadStatus {
    /// `imported` is terminal for the import flow; only a rollback leaves it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Imported | UploadStatus::RolledBack | UploadStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Uploaded, Previewed) | (Previewed, Previewed) => true,
            (Previewed, Confirmed) | (Confirmed, Imported) => true,
            (Imported, RolledBack) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Uploaded => write!(f, "uploaded"),
            UploadStatus::Previewed => write!(f, "previewed"),
            UploadStatus::Confirmed => write!(f, "confirmed"),
            UploadStatus::Imported => write!(f, "imported"),
            UploadStatus::RolledBack => write!(f, "rolled_back"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(UploadStatus::Uploaded),
            "previewed" => Ok(UploadStatus::Previewed),
            "confirmed" => Ok(UploadStatus::Confirmed),
            "imported" => Ok(UploadStatus::Imported),
            "rolled_back" => Ok(UploadStatus::RolledBack),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("Unknown upload status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: UploadStatus,
    pub to: UploadStatus,
    pub at: DateTime<Utc>,
}

/// One uploaded statement and where it is in the import flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub user: UserId,
    pub filename: String,
    /// SHA-256 hex of the uploaded bytes.
    pub content_hash: String,
    pub size: usize,
    pub parser_id: Option<String>,
    pub bank_hint: Option<String>,
    pub validation_errors: Vec<String>,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    /// Every transition since creation, oldest first.
    pub history: Vec<StatusChange>,
}

impl UploadRecord {
    pub fn new(
        user: UserId,
        filename: impl Into<String>,
        content_hash: String,
        size: usize,
        bank_hint: Option<String>,
    ) -> Self {
        UploadRecord {
            id: Uuid::new_v4(),
            user,
            filename: filename.into(),
            content_hash,
            size,
            parser_id: None,
            bank_hint,
            validation_errors: Vec::new(),
            status: UploadStatus::Uploaded,
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Moves to `next` and logs the change. Returns `false`, leaving the
    /// record untouched, when the move is not allowed.
    pub fn transition(&mut self, next: UploadStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.history.push(StatusChange {
            from: self.status,
            to: next,
            at: Utc::now(),
        });
        self.status = next;
        true
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user == user
    }
}

/// Ledger entries created by one import, deletable as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub token: Uuid,
    pub upload_id: Uuid,
    pub user: UserId,
    /// In creation order.
    pub entry_ids: Vec<EntryId>,
    pub created_at: DateTime<Utc>,
}

impl RollbackRecord {
    pub fn new(upload_id: Uuid, user: UserId) -> Self {
        RollbackRecord {
            token: Uuid::new_v4(),
            upload_id,
            user,
            entry_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
