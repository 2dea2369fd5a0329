//! Contract of the ledger collaborator: the already-persisted entries an import
//! must not duplicate, and the create/delete calls an import and its rollback use.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::transaction::ParsedTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An expense entry as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user: UserId,
    pub date: NaiveDate,
    pub description: String,
    pub notes: Option<String>,
    pub amount: Decimal,
    pub merchant: Option<String>,
    pub reference: Option<String>,
}

impl LedgerEntry {
    pub fn from_parsed(id: EntryId, user: UserId, tx: &ParsedTransaction) -> Self {
        LedgerEntry {
            id,
            user,
            date: tx.date,
            description: tx.description.clone(),
            notes: tx.notes.clone(),
            amount: tx.amount,
            merchant: tx.merchant.clone(),
            reference: tx.reference.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger rejected entry: {0}")]
    Rejected(String),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Entries owned by `user` dated within `[start, end]`, inclusive.
    async fn find_by_date_range(
        &self,
        user: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    async fn create(&self, user: &UserId, tx: &ParsedTransaction) -> Result<EntryId, LedgerError>;

    /// Returns `false` when no entry with `id` exists.
    async fn delete(&self, id: EntryId) -> Result<bool, LedgerError>;
}
