use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tally_core::{EntryId, Ledger, LedgerEntry, LedgerError, ParsedTransaction, UserId};
use tokio::sync::RwLock;

use crate::db::DbPool;

#[derive(Default)]
struct MemoryLedgerState {
    entries: BTreeMap<EntryId, LedgerEntry>,
    next_id: i64,
    rejected: HashSet<String>,
}

/// In-memory ledger for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<MemoryLedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `create` fail for transactions with this exact description.
    pub async fn reject_description(&self, description: impl Into<String>) {
        self.state.write().await.rejected.insert(description.into());
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find_by_date_range(
        &self,
        user: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| &e.user == user && e.date >= start && e.date <= end)
            .cloned()
            .collect())
    }

    async fn create(&self, user: &UserId, tx: &ParsedTransaction) -> Result<EntryId, LedgerError> {
        let mut state = self.state.write().await;
        if state.rejected.contains(&tx.description) {
            return Err(LedgerError::Rejected(format!(
                "entry '{}' refused by ledger",
                tx.description
            )));
        }
        state.next_id += 1;
        let id = EntryId(state.next_id);
        state
            .entries
            .insert(id, LedgerEntry::from_parsed(id, user.clone(), tx));
        Ok(id)
    }

    async fn delete(&self, id: EntryId) -> Result<bool, LedgerError> {
        Ok(self.state.write().await.entries.remove(&id).is_some())
    }
}

/// `ledger_entries` table. Amounts are stored as decimal text so no precision
/// is lost on the way through SQLite.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: DbPool,
}

impl SqliteLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

type LedgerRow = (
    i64,
    String,
    NaiveDate,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

fn entry_from_row(row: LedgerRow) -> Result<LedgerEntry, LedgerError> {
    let (id, user, date, description, notes, amount, merchant, reference) = row;
    let amount = Decimal::from_str(&amount).map_err(|e| {
        LedgerError::Unavailable(format!("entry {id} has invalid amount '{amount}': {e}"))
    })?;
    Ok(LedgerEntry {
        id: EntryId(id),
        user: UserId(user),
        date,
        description,
        notes,
        amount,
        merchant,
        reference,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn find_by_date_range(
        &self,
        user: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, user_id, date, description, notes, amount, merchant, reference
            FROM ledger_entries
            WHERE user_id = ? AND date >= ? AND date <= ?
            ORDER BY date, id
            "#,
        )
        .bind(&user.0)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn create(&self, user: &UserId, tx: &ParsedTransaction) -> Result<EntryId, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (user_id, date, description, notes, amount, merchant, reference)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.0)
        .bind(tx.date)
        .bind(&tx.description)
        .bind(&tx.notes)
        .bind(tx.amount.to_string())
        .bind(&tx.merchant)
        .bind(&tx.reference)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(EntryId(result.last_insert_rowid()))
    }

    async fn delete(&self, id: EntryId) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }
}
