//! tally-daemon: ledger maintenance and confirmation token refill.
//!
//! Single OS process running a Tokio async runtime. The ledger runs on its
//! own worker thread; prefix list I/O runs on the blocking pool.

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "tally-daemon")]
#[command(about = "Ledger storage, prefix lists and confirmation tokens")]
#[command(version)]
struct Cli {
    /// Config file. Defaults to config.toml in the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate the ledger, then keep the token pool topped up until Ctrl-C.
    Run,
    /// Bring the ledger schema up to date.
    Migrate,
    /// Manage the hash prefix list.
    Prefix {
        #[command(subcommand)]
        command: PrefixCommand,
    },
    /// Inspect the confirmation token pool.
    Tokens {
        #[command(subcommand)]
        command: TokensCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PrefixCommand {
    /// Replace the prefix list.
    Update {
        /// Raw sorted prefixes, or one value per line with --hash-values.
        file: PathBuf,

        /// Bytes per prefix (4 to 32).
        #[arg(long, default_value = "4")]
        prefix_size: usize,

        /// Hash each line of FILE instead of reading raw prefixes.
        #[arg(long)]
        hash_values: bool,
    },
    /// Check whether a value is listed.
    Contains { value: String },
}

#[derive(Subcommand, Debug)]
enum TokensCommand {
    /// Print the pool size and outstanding refill batches as JSON.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("tally={}", config.advanced.log_level).parse()?),
        )
        .init();

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    info!(data_dir = %data_dir.display(), "Tally daemon starting");

    match cli.command {
        Command::Run => {
            commands::migrate::migrate(&config.database_path()).await?;
            commands::run::run(&config).await?;
        }
        Command::Migrate => {
            let version = commands::migrate::migrate(&config.database_path()).await?;
            println!("schema version {version}");
        }
        Command::Prefix { command } => match command {
            PrefixCommand::Update {
                file,
                prefix_size,
                hash_values,
            } => {
                let count =
                    commands::prefix::update(&config.prefix_path(), &file, prefix_size, hash_values)
                        .await?;
                println!("{count} prefixes written");
            }
            PrefixCommand::Contains { value } => {
                let listed = commands::prefix::contains(&config.prefix_path(), &value).await?;
                println!("{listed}");
            }
        },
        Command::Tokens {
            command: TokensCommand::Status,
        } => {
            let db_path = config.database_path();
            let database =
                tokio::task::spawn_blocking(move || tally_db::Database::open(&db_path)).await??;
            let status =
                commands::tokens::status(Arc::new(database), &config.refill_config()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_prefix_update() {
        let cli = Cli::try_parse_from([
            "tally-daemon",
            "prefix",
            "update",
            "values.txt",
            "--prefix-size",
            "8",
            "--hash-values",
        ])
        .expect("parse");
        match cli.command {
            Command::Prefix {
                command:
                    PrefixCommand::Update {
                        file,
                        prefix_size,
                        hash_values,
                    },
            } => {
                assert_eq!(file, PathBuf::from("values.txt"));
                assert_eq!(prefix_size, 8);
                assert!(hash_values);
            }
            other => unreachable!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["tally-daemon", "tokens", "status", "--config", "/etc/tally.toml"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tally.toml")));
        assert!(matches!(
            cli.command,
            Command::Tokens {
                command: TokensCommand::Status
            }
        ));
    }
}
