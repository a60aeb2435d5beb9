use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pactum_compat::NativePrimitives;
use pactum_keys::{FileStore, KeyManager};
use tracing::info;

mod commands;
mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "pactum", about = "Pactum end-to-end key management")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the key store file, overrides config
    #[arg(long)]
    store: Option<PathBuf>,

    /// Device id, overrides config
    #[arg(long)]
    device_id: Option<u32>,

    /// Password for backups and sealed protocol state
    #[arg(long, env = "PACTUM_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision an identity key and registration id if missing
    Init,
    /// Print the local identity fingerprint
    Fingerprint,
    /// Generate pre-keys and a signed pre-key, print the bundle as JSON
    Bundle {
        #[arg(long, default_value_t = 1)]
        start_id: u32,
        #[arg(long, default_value_t = 100)]
        count: u32,
        #[arg(long, default_value_t = 1)]
        signed_id: u32,
    },
    /// Write a password-protected identity backup
    ExportBackup {
        #[arg(long)]
        out: PathBuf,
    },
    /// Restore the identity from a backup file
    ImportBackup {
        #[arg(long)]
        input: PathBuf,
    },
    /// Delete all local key material
    Reset,
}

impl Args {
    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .context("a password is required (--password or PACTUM_PASSWORD)")
    }
}

// Session futures hold libsignal's !Send store borrows, so everything runs on
// one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pactum=info,pactum_keys=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };

    // CLI overrides
    if let Some(store) = &args.store {
        config.store_path = store.clone();
    }
    if let Some(device_id) = args.device_id {
        config.keys.device_id = device_id;
    }

    info!(store = %config.store_path.display(), device_id = config.keys.device_id);

    let storage = FileStore::open(&config.store_path)
        .with_context(|| format!("failed to open key store: {}", config.store_path.display()))?;
    let manager = KeyManager::new(config.keys, Arc::new(storage), Arc::new(NativePrimitives));

    let output = match &args.command {
        Command::Init => commands::init(&manager)?,
        Command::Fingerprint => commands::fingerprint(&manager)?,
        Command::Bundle {
            start_id,
            count,
            signed_id,
        } => {
            commands::bundle(&manager, args.password()?, *start_id, *count, *signed_id).await?
        }
        Command::ExportBackup { out } => {
            commands::export_backup(&manager, args.password()?, out)?
        }
        Command::ImportBackup { input } => {
            commands::import_backup(&manager, args.password()?, input)?
        }
        Command::Reset => commands::reset(&manager)?,
    };

    println!("{output}");
    Ok(())
}
