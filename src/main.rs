use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use blob_vault::addressing::{ContentAddresser, DEFAULT_SHARD_DEPTH};
use blob_vault::state::Database;
use blob_vault::{
    BlobCandidate, BlobContent, BlobStorageManager, ContentHash, Result, StorageConfig,
    StorageError,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blob-vault")]
#[command(about = "Content-addressed blob storage across object storage, Swarm and the filesystem")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "BLOB_VAULT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every configured backend
    Health,
    /// Print the storage key of a blob
    Key {
        #[arg(long, default_value_t = 1)]
        chain_id: u64,
        /// Content hash (0x-prefixed hex)
        hash: String,
    },
    /// Store files as blobs on every configured backend
    Store {
        #[arg(long, default_value_t = 1)]
        chain_id: u64,
        files: Vec<PathBuf>,
    },
    /// Fetch a stored blob from one backend
    Get {
        /// Backend identifier (e.g. "filesystem")
        #[arg(long)]
        backend: String,
        uri: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}

async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Key { chain_id, hash } => {
            let shard_depth = match &cli.config {
                Some(path) => StorageConfig::load(Some(path.as_path()))?.addressing.shard_depth,
                None => DEFAULT_SHARD_DEPTH,
            };
            let hash = ContentHash::parse(&hash)?;
            println!("{}", ContentAddresser::new(shard_depth).derive_key(chain_id, &hash));
            Ok(true)
        }
        Commands::Health => {
            let config = StorageConfig::load(cli.config.as_deref())?;
            let manager = BlobStorageManager::from_config(&config)?;
            let report = manager.check_health().await;
            print_json(&report)?;
            Ok(report.iter().all(|h| h.healthy))
        }
        Commands::Store { chain_id, files } => {
            let config = StorageConfig::load(cli.config.as_deref())?;
            let manager = BlobStorageManager::from_config(&config)?;

            let mut candidates = Vec::with_capacity(files.len());
            for file in &files {
                let content = BlobContent::from_bytes(tokio::fs::read(file).await?);
                candidates.push(BlobCandidate {
                    content,
                    chain_id,
                });
            }

            let records = match &config.database_url {
                Some(url) => {
                    let db = Database::connect(url).await?;
                    manager.prepare_batch(&candidates, &db).await?
                }
                None => {
                    let known: HashSet<ContentHash> = HashSet::new();
                    manager.prepare_batch(&candidates, &known).await?
                }
            };
            print_json(&records)?;
            Ok(true)
        }
        Commands::Get {
            backend,
            uri,
            output,
        } => {
            let config = StorageConfig::load(cli.config.as_deref())?;
            let manager = BlobStorageManager::from_config(&config)?;
            let data = manager.retrieve(&backend, &uri).await?;
            match output {
                Some(path) => tokio::fs::write(path, &data).await?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "blob-vault failed");
            ExitCode::FAILURE
        }
    }
}
