// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing::info;

mod config;
mod logging;
mod reassembly;
mod registry;
mod resources;
mod s3;
#[cfg(test)]
mod test_utils;
mod trigger;

use crate::reassembly::Reassembler;
use crate::registry::SqliteSessionStore;
use crate::resources::SqliteResourceStore;
use crate::s3::S3Storage;
use crate::trigger::{DirectRequest, Dispatcher, DispatchResponse, Trigger};

type LiveDispatcher = Dispatcher<S3Storage, SqliteSessionStore, SqliteResourceStore>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.toml",
        global = true
    )]
    config: String,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sweep stale sessions on an interval until interrupted
    Run,
    /// Sweep stale sessions once
    Sweep,
    /// Reassemble a booking or one of its sessions
    Reassemble {
        #[arg(long)]
        booking_id: String,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long)]
        manifest_key: Option<String>,

        /// Resource id reserved by the uploader
        #[arg(long)]
        final_resource_id: Option<String>,

        /// File name prefix used to infer the session
        #[arg(long)]
        base_file_name: Option<String>,

        /// Mark the session failed when no chunks are found
        #[arg(long)]
        terminal_on_missing: bool,
    },
    /// Handle an object-created notification for a key
    Event {
        #[arg(long)]
        key: String,

        /// Defaults to the configured bucket
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Classify and dispatch a raw JSON event read from a file
    Invoke {
        #[arg(long, value_name = "FILE")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config, e);
            process::exit(1);
        }
    };

    let _log_guard = logging::init_logging(config.logging.as_ref(), cli.verbose)?;
    info!("GeoTIFF Reassembler v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config);

    let dispatcher = initialize_dispatcher(&config).await?;

    match cli.command {
        Commands::Run => {
            dispatcher.sweeper().run().await;
            Ok(())
        }
        Commands::Sweep => {
            let response = dispatcher.handle(Trigger::Scheduled).await;
            finish(&response)
        }
        Commands::Reassemble {
            booking_id,
            session_id,
            manifest_key,
            final_resource_id,
            base_file_name,
            terminal_on_missing,
        } => {
            let request = DirectRequest {
                booking_id,
                session_id,
                manifest_key,
                final_resource_id,
                base_file_name,
                resource_type: None,
                terminal_on_missing,
            };
            let response = dispatcher.handle(Trigger::Direct(request)).await;
            finish(&response)
        }
        Commands::Event { key, bucket } => {
            let trigger = Trigger::StorageEvent {
                bucket: bucket.unwrap_or_else(|| config.s3.bucket.clone()),
                key,
            };
            let response = dispatcher.handle(trigger).await;
            finish(&response)
        }
        Commands::Invoke { event } => {
            let text = std::fs::read_to_string(&event)
                .with_context(|| format!("Failed to read event file {event}"))?;
            let payload: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Event file {event} is not valid JSON"))?;
            let response = dispatcher.dispatch(&payload).await;
            print_json(&response.envelope()?)
        }
    }
}

async fn initialize_dispatcher(config: &config::Config) -> Result<LiveDispatcher> {
    let storage = Arc::new(S3Storage::new(&config.s3).await?);
    let sessions = Arc::new(SqliteSessionStore::new(&config.registry.db_path)?);
    let resources = Arc::new(SqliteResourceStore::new(&config.registry.db_path)?);
    let reassembler = Arc::new(Reassembler::new(
        storage,
        sessions,
        resources,
        &config.reassembly,
    ));

    info!("Reassembler initialized for bucket {}", config.s3.bucket);

    Ok(Dispatcher::new(reassembler, &config.s3.bucket, &config.sweep))
}

/// Print the response; a server-side failure becomes a non-zero exit
fn finish(response: &DispatchResponse) -> Result<()> {
    print_json(response)?;
    if response.status_code() >= 500 {
        anyhow::bail!("Reassembly failed with status {}", response.status_code());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
