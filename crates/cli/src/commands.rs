use anyhow::{bail, Context};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_core::UserId;
use tally_import::{BankConfigSet, BankId, ParseContext, ParserRegistry, RecommendedAction};
use tally_pipeline::{ImportOrchestrator, PipelineConfig, Preview, PreviewOptions};
use tally_storage::{create_db, KeyedStore, SqliteLedger, SqliteStore};

use crate::{Cli, Commands, ParseArgs, Session};

pub async fn run(cli: Cli) -> anyhow::Result<Value> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let banks = config.bank_configs()?;

    match cli.command {
        Commands::Detect { file } => detect(&file),
        Commands::Parse { file, parse } => parse_file(&file, &parse, &config, &banks),
        Commands::Preview {
            file,
            session,
            parse,
            auto_skip,
        } => {
            let orch = orchestrator(&session, config, banks).await?;
            let preview = upload_and_preview(&orch, &file, &session, &parse, auto_skip).await?;
            Ok(serde_json::to_value(preview)?)
        }
        Commands::Import {
            file,
            session,
            parse,
            auto_skip,
            all,
            select,
        } => {
            let orch = orchestrator(&session, config, banks).await?;
            let preview = upload_and_preview(&orch, &file, &session, &parse, auto_skip).await?;
            if !preview.parse.success {
                bail!("{} could not be parsed: {}", file.display(), preview.parse.errors.join("; "));
            }
            let selected: Vec<usize> = match (all, select) {
                (true, _) => (0..preview.parse.len()).collect(),
                (false, Some(indices)) => indices,
                (false, None) => preview
                    .conflicts
                    .items
                    .iter()
                    .filter(|item| item.recommended_action == RecommendedAction::New)
                    .map(|item| item.index)
                    .collect(),
            };
            let user = UserId::new(&session.user);
            let result = orch.execute_import(preview.upload.id, &user, &selected).await?;
            Ok(json!({
                "warnings": preview.parse.warnings,
                "result": result,
            }))
        }
        Commands::Rollback { token, session } => {
            let orch = orchestrator(&session, config, banks).await?;
            let outcome = orch.rollback(token, &UserId::new(&session.user)).await?;
            Ok(serde_json::to_value(outcome)?)
        }
    }
}

fn detect(file: &Path) -> anyhow::Result<Value> {
    let data = read(file)?;
    let parser = ParserRegistry::with_defaults().find_parser(&file_name(file), Some(&data))?;
    Ok(json!({ "file": file, "parser": parser.id() }))
}

fn parse_file(
    file: &Path,
    args: &ParseArgs,
    config: &PipelineConfig,
    banks: &BankConfigSet,
) -> anyhow::Result<Value> {
    let data = read(file)?;
    let parser = ParserRegistry::with_defaults().find_parser(&file_name(file), Some(&data))?;
    let bank = args
        .bank
        .clone()
        .map(BankId::from)
        .unwrap_or_else(|| config.default_bank.clone());
    let ctx = ParseContext::new(banks.profile(&bank)).with_year_hint(args.year);
    let result = parser.parse(&data, &ctx);
    tracing::info!(
        file = %file.display(),
        parser = parser.id(),
        transactions = result.len(),
        warnings = result.warnings.len(),
        "Parsed statement"
    );
    Ok(serde_json::to_value(result)?)
}

async fn orchestrator(
    session: &Session,
    config: PipelineConfig,
    banks: BankConfigSet,
) -> anyhow::Result<ImportOrchestrator> {
    let path = match &session.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    let pool = create_db(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    let store = SqliteStore::new(pool.clone());
    match store.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::debug!(purged, "Dropped expired records"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not purge expired records"),
    }
    Ok(ImportOrchestrator::new(
        Arc::new(store),
        Arc::new(SqliteLedger::new(pool)),
        banks,
        config,
    ))
}

async fn upload_and_preview(
    orch: &ImportOrchestrator,
    file: &Path,
    session: &Session,
    args: &ParseArgs,
    auto_skip: bool,
) -> anyhow::Result<Preview> {
    let data = read(file)?;
    let user = UserId::new(&session.user);
    let record = orch
        .upload(&user, &file_name(file), &data, args.bank.as_deref())
        .await?;
    let options = PreviewOptions {
        auto_skip: auto_skip.then_some(true),
        year_hint: args.year,
    };
    Ok(orch.preview(record.id, &user, options).await?)
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "tally", "Tally")
        .context("Failed to get app directory")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    Ok(data_dir.join("tally.db"))
}

fn read(file: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn file_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}
