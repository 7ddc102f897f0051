use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use log::warn;

use ringsync::config::DB_PATH_ENV;
use ringsync::{
    init_logging, Frame, LegacyMigrator, MigrationStatus, StorageEngine, StoreConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sample database file.
    #[arg(long, global = true, env = DB_PATH_ENV, default_value = "ringsync.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the 16-byte frame for a command (e.g. --command 0x15 --payload "01 02").
    Frame {
        #[arg(long, value_parser = parse_byte)]
        command: u8,
        #[arg(long, default_value = "")]
        payload: String,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

/// Subcommands that operate on the sample database.
#[derive(Subcommand)]
enum StoreCommand {
    /// Write every collection as pretty-printed JSON into a directory.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Import a legacy flat-file JSON directory.
    Migrate {
        #[arg(long)]
        legacy: PathBuf,
    },
    /// Show record counts and storage usage.
    Stats,
    /// Delete every stored record.
    Wipe {
        #[arg(long, help = "Confirm deletion of all records")]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Frame { command, payload } => {
            let frame = Frame::encode(command, &parse_hex(&payload)?)?;
            println!("{}", frame.to_hex());
            Ok(())
        }
        Commands::Store(command) => run_store_command(&cli.db, command).await,
    }
}

async fn run_store_command(db: &Path, command: StoreCommand) -> anyhow::Result<()> {
    let store = Arc::new(
        StorageEngine::open(StoreConfig::file(db))
            .with_context(|| format!("opening {}", db.display()))?,
    );

    match command {
        StoreCommand::Export { out } => {
            let bundle = store.export().await;
            for path in bundle.write_to_dir(&out)? {
                println!("wrote {}", path.display());
            }
            for (collection, reason) in &bundle.degraded {
                warn!("{} exported empty: {}", collection, reason);
            }
        }
        StoreCommand::Migrate { legacy } => {
            let report = LegacyMigrator::new(legacy, store.clone()).run().await?;
            match report.status {
                MigrationStatus::NoLegacyData => println!("No legacy data found"),
                MigrationStatus::AlreadyMigrated => println!("Legacy data already migrated"),
                MigrationStatus::NothingRecovered => println!("No usable legacy samples"),
                MigrationStatus::Migrated => {
                    for (collection, outcome) in &report.merged {
                        println!(
                            "{:<12} {} inserted, {} updated",
                            collection, outcome.inserted, outcome.updated
                        );
                    }
                    if let Some(dir) = &report.backup_dir {
                        println!("Originals copied to {}", dir.display());
                    }
                }
            }
            for (collection, reason) in &report.skipped {
                println!("{:<12} skipped: {:?}", collection, reason);
            }
        }
        StoreCommand::Stats => {
            for (collection, count) in store.record_counts().await? {
                println!("{:<12} {}", collection, count);
            }
            println!(
                "{} of 7 collections populated, {} bytes on disk",
                store.populated_collection_count().await,
                store.size_on_disk().await
            );
        }
        StoreCommand::Wipe { yes } => {
            if !yes {
                bail!("refusing to delete all records without --yes");
            }
            let removed = store.delete_all().await?;
            println!("Deleted {} records", removed);
        }
    }
    Ok(())
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid command byte {:?}: {}", s, e))
}

fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("payload {:?} is not hex", s);
    }
    if digits.len() % 2 != 0 {
        return Err(anyhow!("payload hex has an odd number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}
