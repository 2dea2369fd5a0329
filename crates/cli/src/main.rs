use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tally", about = "Import bank statements into a ledger without duplicates.")]
pub struct Cli {
    /// Pipeline settings (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

/// Where uploads, previews and imported entries are kept.
#[derive(clap::Args)]
pub struct Session {
    /// SQLite database (default: the platform data directory)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Owner of the upload and the ledger entries
    #[arg(long)]
    pub user: String,
}

/// Parsing options shared by the commands that read a statement.
#[derive(clap::Args)]
pub struct ParseArgs {
    /// Bank profile id (generic, csob, revolut or a custom one)
    #[arg(long)]
    pub bank: Option<String>,
    /// Year for day/month-only dates when the statement header has none
    #[arg(long)]
    pub year: Option<i32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which parser would read a file.
    Detect {
        file: PathBuf,
    },
    /// Parse a statement and print the transactions. Nothing is stored.
    Parse {
        file: PathBuf,
        #[command(flatten)]
        parse: ParseArgs,
    },
    /// Upload a statement and compare it with the ledger.
    Preview {
        file: PathBuf,
        #[command(flatten)]
        session: Session,
        #[command(flatten)]
        parse: ParseArgs,
        /// Drop likely duplicates without asking
        #[arg(long)]
        auto_skip: bool,
    },
    /// Upload, preview and import a statement in one go. Without --all or
    /// --select only transactions recommended as new are imported.
    Import {
        file: PathBuf,
        #[command(flatten)]
        session: Session,
        #[command(flatten)]
        parse: ParseArgs,
        #[arg(long)]
        auto_skip: bool,
        /// Import every transaction
        #[arg(long, conflicts_with = "select")]
        all: bool,
        /// Comma-separated transaction indices, e.g. 0,2,5
        #[arg(long, value_delimiter = ',')]
        select: Option<Vec<usize>>,
    },
    /// Undo an import using the token it printed.
    Rollback {
        token: uuid::Uuid,
        #[command(flatten)]
        session: Session,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = commands::run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_takes_a_selection_list() {
        let cli = Cli::try_parse_from([
            "tally", "import", "may.csv", "--user", "alice", "--select", "0,2,5",
        ])
        .unwrap();
        let Commands::Import { select, all, session, .. } = cli.command else {
            panic!("expected import");
        };
        assert_eq!(select, Some(vec![0, 2, 5]));
        assert!(!all);
        assert_eq!(session.user, "alice");
        assert!(session.db.is_none());
    }

    #[test]
    fn all_and_select_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "tally", "import", "may.csv", "--user", "alice", "--all", "--select", "1",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn rollback_token_must_be_a_uuid() {
        assert!(Cli::try_parse_from(["tally", "rollback", "nope", "--user", "a"]).is_err());
        let cli = Cli::try_parse_from([
            "tally",
            "--config",
            "tally.toml",
            "rollback",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "--user",
            "a",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("tally.toml")));
    }
}
