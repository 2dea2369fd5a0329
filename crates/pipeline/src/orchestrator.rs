//! Upload → preview → confirm → import, and the compensating rollback.
//!
//! All state between calls lives in the injected [`KeyedStore`] under the
//! configured retention TTL, so a second process sharing the same store can
//! pick up where the first left off. Calls that mutate one upload (preview,
//! confirm, rollback) hold that upload's lock for their whole duration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tally_core::{EntryId, Ledger, ParseResult, UserId};
use tally_import::{
    find_internal_duplicates, BankConfigSet, BankId, ConflictReport, MatchEngine, ParseContext,
    ParserRegistry,
};
use tally_storage::KeyedStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::ImportError;
use crate::hash::content_hash;
use crate::locks::UploadLocks;
use crate::record::{RollbackRecord, UploadRecord, UploadStatus};
use crate::validate::{DefaultValidator, UploadValidator};

const UPLOADS: &str = "upload";
const CONTENTS: &str = "upload_content";
const PREVIEWS: &str = "preview";
const ROLLBACKS: &str = "rollback";

/// Keyword overlap above which two same-day, same-amount lines of one
/// statement are flagged.
const INTERNAL_DUPLICATE_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    /// Overrides `PipelineConfig::auto_skip` for this preview.
    pub auto_skip: Option<bool>,
    pub year_hint: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub upload: UploadRecord,
    pub parse: ParseResult,
    pub conflicts: ConflictReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreviewState {
    parse: ParseResult,
    conflicts: ConflictReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub upload_id: Uuid,
    pub imported_count: usize,
    pub skipped_count: usize,
    /// One entry per transaction that could not be imported.
    pub errors: Vec<String>,
    /// `None` only when nothing was created.
    pub rollback_token: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// `missing` counts entries the ledger no longer had.
    RolledBack { deleted: usize, missing: usize },
    /// Unknown, expired, already used, or another user's token.
    NotFound,
}

pub struct ImportOrchestrator {
    store: Arc<dyn KeyedStore>,
    ledger: Arc<dyn Ledger>,
    registry: ParserRegistry,
    banks: BankConfigSet,
    validator: Arc<dyn UploadValidator>,
    engine: MatchEngine,
    locks: UploadLocks,
    config: PipelineConfig,
}

impl ImportOrchestrator {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        ledger: Arc<dyn Ledger>,
        banks: BankConfigSet,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            registry: ParserRegistry::with_defaults(),
            banks,
            validator: Arc::new(DefaultValidator::from_config(&config)),
            engine: MatchEngine::new(config.matching.clone()),
            locks: UploadLocks::new(),
            config,
        }
    }

    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn UploadValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Validates and stores a statement. A rejected upload is still recorded,
    /// as `failed`, and its id travels in the returned error.
    pub async fn upload(
        &self,
        user: &UserId,
        filename: &str,
        data: &[u8],
        bank_hint: Option<&str>,
    ) -> Result<UploadRecord, ImportError> {
        let mut record = UploadRecord::new(
            user.clone(),
            filename,
            content_hash(data),
            data.len(),
            bank_hint.map(str::to_string),
        );

        let validation = self.validator.validate(data, filename);
        if !validation.is_ok() {
            warn!(upload_id = %record.id, user = %user, filename, errors = ?validation.errors, "Upload rejected");
            record.validation_errors = validation.errors.clone();
            record.status = UploadStatus::Failed;
            self.put_json(UPLOADS, record.id, &record).await?;
            return Err(ImportError::Validation {
                upload_id: record.id,
                errors: validation.errors,
            });
        }

        let parser = match self.registry.find_parser(filename, Some(data)) {
            Ok(parser) => parser,
            Err(source) => {
                warn!(upload_id = %record.id, filename, "No parser for upload");
                record.validation_errors.push(source.to_string());
                record.transition(UploadStatus::Failed);
                self.put_json(UPLOADS, record.id, &record).await?;
                return Err(ImportError::Unsupported {
                    upload_id: record.id,
                    source,
                });
            }
        };
        record.parser_id = Some(parser.id().to_string());

        self.store
            .put(
                CONTENTS,
                &record.id.to_string(),
                hex::encode(data),
                self.config.retention(),
            )
            .await?;
        self.put_json(UPLOADS, record.id, &record).await?;

        info!(
            upload_id = %record.id,
            user = %user,
            parser = parser.id(),
            size = data.len(),
            hash = %record.content_hash,
            "Statement uploaded"
        );
        Ok(record)
    }

    /// Parses the upload and scores it against the ledger. Can be repeated
    /// until the upload is confirmed.
    pub async fn preview(
        &self,
        upload_id: Uuid,
        user: &UserId,
        options: PreviewOptions,
    ) -> Result<Preview, ImportError> {
        let _guard = self.locks.acquire(upload_id).await;
        let mut record = self.load_upload(upload_id, user).await?;
        if !matches!(record.status, UploadStatus::Uploaded | UploadStatus::Previewed) {
            return Err(ImportError::InvalidState {
                id: upload_id,
                status: record.status,
                expected: UploadStatus::Uploaded,
            });
        }

        let data = match self.store.get(CONTENTS, &upload_id.to_string()).await? {
            Some(encoded) => hex::decode(encoded)?,
            None => return Err(ImportError::NotFound(upload_id)),
        };
        let parser = match record.parser_id.as_deref().and_then(|id| self.registry.get(id)) {
            Some(parser) => parser,
            None => self
                .registry
                .find_parser(&record.filename, Some(&data))
                .map_err(|source| ImportError::Unsupported { upload_id, source })?,
        };
        let bank = record
            .bank_hint
            .clone()
            .map(BankId::from)
            .unwrap_or_else(|| self.config.default_bank.clone());
        let ctx = ParseContext::new(self.banks.profile(&bank)).with_year_hint(options.year_hint);

        let parser_id = parser.id();
        let mut parse = tokio::task::spawn_blocking(move || parser.parse(&data, &ctx))
            .await
            .unwrap_or_else(|e| ParseResult::failed(parser_id, format!("parser worker failed: {e}")));

        if parse.is_empty() {
            warn!(upload_id = %upload_id, parser = parser_id, errors = ?parse.errors, "Statement yielded no transactions");
            record.transition(UploadStatus::Failed);
            self.put_json(UPLOADS, upload_id, &record).await?;
            return Ok(Preview {
                upload: record,
                parse,
                conflicts: ConflictReport::default(),
            });
        }

        let existing = match self.engine.search_range(&parse.transactions) {
            Some(range) => {
                self.ledger
                    .find_by_date_range(user, range.start, range.end)
                    .await?
            }
            None => Vec::new(),
        };
        debug!(upload_id = %upload_id, existing = existing.len(), "Loaded ledger window");

        let auto_skip = options.auto_skip.unwrap_or(self.config.auto_skip);
        let engine = self.engine.clone();
        let transactions = parse.transactions.clone();
        let (conflicts, duplicates) = tokio::task::spawn_blocking(move || {
            let report = engine.resolve(&transactions, &existing, auto_skip);
            let duplicates = find_internal_duplicates(&transactions, INTERNAL_DUPLICATE_SIMILARITY);
            (report, duplicates)
        })
        .await
        .map_err(|e| ImportError::Worker(e.to_string()))?;

        for (a, b) in duplicates {
            parse.warn(format!(
                "transactions {a} and {b} look like the same statement line"
            ));
        }

        let state = PreviewState { parse, conflicts };
        self.put_json(PREVIEWS, upload_id, &state).await?;
        record.transition(UploadStatus::Previewed);
        self.put_json(UPLOADS, upload_id, &record).await?;

        info!(
            upload_id = %upload_id,
            parser = parser_id,
            bank = %bank,
            transactions = state.parse.len(),
            skip = state.conflicts.skip_count,
            review = state.conflicts.review_count,
            new = state.conflicts.new_count,
            "Preview ready"
        );
        Ok(Preview {
            upload: record,
            parse: state.parse,
            conflicts: state.conflicts,
        })
    }

    /// Creates ledger entries for the selected transaction indices of a
    /// previewed upload. Every entry created, even when a later one fails,
    /// is covered by the returned rollback token.
    pub async fn execute_import(
        &self,
        upload_id: Uuid,
        user: &UserId,
        selected: &[usize],
    ) -> Result<ImportResult, ImportError> {
        let _guard = self.locks.acquire(upload_id).await;
        let mut record = self.load_upload(upload_id, user).await?;
        if record.status != UploadStatus::Previewed {
            return Err(ImportError::InvalidState {
                id: upload_id,
                status: record.status,
                expected: UploadStatus::Previewed,
            });
        }
        let state: PreviewState = self
            .get_json(PREVIEWS, upload_id)
            .await?
            .ok_or(ImportError::NotFound(upload_id))?;

        record.transition(UploadStatus::Confirmed);
        self.put_json(UPLOADS, upload_id, &record).await?;

        let transactions = &state.parse.transactions;
        let auto_skipped: BTreeSet<usize> = state.conflicts.auto_skipped().collect();
        let mut errors = Vec::new();
        let mut chosen = Vec::new();
        let mut seen = BTreeSet::new();
        for &index in selected {
            if !seen.insert(index) {
                continue;
            }
            match transactions.get(index) {
                None => errors.push(format!("transaction {index}: not in this statement")),
                Some(_) if auto_skipped.contains(&index) => {
                    debug!(upload_id = %upload_id, index, "Skipping likely duplicate");
                }
                Some(tx) => chosen.push((index, tx)),
            }
        }

        // From here on the upload is `confirmed`, so store failures are
        // reported in the result and the upload still reaches a final status.
        let mut rollback = RollbackRecord::new(upload_id, user.clone());
        let mut pending = chosen.as_slice();
        let mut rollback_stored = false;
        if !chosen.is_empty() {
            match self.put_json(ROLLBACKS, rollback.token, &rollback).await {
                Ok(()) => rollback_stored = true,
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "Rollback record could not be created, nothing imported");
                    errors.push(format!("import stopped before the first transaction: {e}"));
                    pending = &[];
                }
            }
        }

        for (index, tx) in pending {
            let id = match self.ledger.create(user, tx).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(upload_id = %upload_id, index, error = %e, "Ledger create failed");
                    errors.push(format!("transaction {index} ({}): {e}", tx.description));
                    continue;
                }
            };
            rollback.entry_ids.push(id);
            if let Err(e) = self.put_json(ROLLBACKS, rollback.token, &rollback).await {
                // Not covered by the stored token, so take it back out of the ledger.
                rollback.entry_ids.pop();
                self.undo_untracked(id).await;
                warn!(upload_id = %upload_id, index, error = %e, "Rollback record update failed, stopping import");
                errors.push(format!("transaction {index} ({}): import stopped: {e}", tx.description));
                break;
            }
        }

        let imported_count = rollback.entry_ids.len();
        let rollback_token = if imported_count > 0 {
            Some(rollback.token)
        } else {
            if rollback_stored {
                if let Err(e) = self.store.delete(ROLLBACKS, &rollback.token.to_string()).await {
                    // Holds no entries; it expires with the retention TTL.
                    warn!(upload_id = %upload_id, error = %e, "Could not drop empty rollback record");
                }
            }
            None
        };

        let outcome = if imported_count == 0 && !errors.is_empty() {
            UploadStatus::Failed
        } else {
            UploadStatus::Imported
        };
        record.transition(outcome);
        if let Err(e) = self.put_json(UPLOADS, upload_id, &record).await {
            warn!(upload_id = %upload_id, status = %record.status, error = %e, "Could not save upload status");
            errors.push(format!("upload status could not be saved: {e}"));
        }

        let skipped_count = transactions.len() - chosen.len();
        info!(
            upload_id = %upload_id,
            user = %user,
            imported = imported_count,
            skipped = skipped_count,
            errors = errors.len(),
            status = %record.status,
            "Import finished"
        );
        Ok(ImportResult {
            upload_id,
            imported_count,
            skipped_count,
            errors,
            rollback_token,
        })
    }

    /// Deletes every entry created under `token`. A token can be used once.
    pub async fn rollback(&self, token: Uuid, user: &UserId) -> Result<RollbackOutcome, ImportError> {
        let upload_id = match self.get_json::<RollbackRecord>(ROLLBACKS, token).await? {
            Some(record) if &record.user == user => record.upload_id,
            _ => return Ok(RollbackOutcome::NotFound),
        };

        let _guard = self.locks.acquire(upload_id).await;
        // A concurrent rollback may have consumed the token while we waited.
        let Some(mut record) = self.get_json::<RollbackRecord>(ROLLBACKS, token).await? else {
            return Ok(RollbackOutcome::NotFound);
        };

        let (mut deleted, mut missing) = (0, 0);
        while let Some(&id) = record.entry_ids.last() {
            match self.ledger.delete(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => missing += 1,
                Err(e) => {
                    // Keep what is left so a retry finishes the job.
                    self.put_json(ROLLBACKS, token, &record).await?;
                    return Err(e.into());
                }
            }
            record.entry_ids.pop();
        }
        self.store.delete(ROLLBACKS, &token.to_string()).await?;

        if let Some(mut upload) = self.get_json::<UploadRecord>(UPLOADS, upload_id).await? {
            if upload.transition(UploadStatus::RolledBack) {
                self.put_json(UPLOADS, upload_id, &upload).await?;
            }
        }

        info!(upload_id = %upload_id, token = %token, deleted, missing, "Import rolled back");
        Ok(RollbackOutcome::RolledBack { deleted, missing })
    }

    pub async fn get_upload(&self, upload_id: Uuid, user: &UserId) -> Result<UploadRecord, ImportError> {
        self.load_upload(upload_id, user).await
    }

    pub async fn purge_expired(&self) -> Result<usize, ImportError> {
        Ok(self.store.purge_expired().await?)
    }

    async fn undo_untracked(&self, id: EntryId) {
        if let Err(e) = self.ledger.delete(id).await {
            warn!(entry_id = %id, error = %e, "Could not remove entry missing from rollback record");
        }
    }

    async fn load_upload(&self, upload_id: Uuid, user: &UserId) -> Result<UploadRecord, ImportError> {
        match self.get_json::<UploadRecord>(UPLOADS, upload_id).await? {
            Some(record) if record.is_owned_by(user) => Ok(record),
            _ => Err(ImportError::NotFound(upload_id)),
        }
    }

    async fn put_json<T: Serialize>(&self, namespace: &str, key: Uuid, value: &T) -> Result<(), ImportError> {
        let json = serde_json::to_string(value)?;
        self.store
            .put(namespace, &key.to_string(), json, self.config.retention())
            .await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: Uuid) -> Result<Option<T>, ImportError> {
        match self.store.get(namespace, &key.to_string()).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
