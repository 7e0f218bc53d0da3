//! discovery: run contextualization flows from the command line.
//!
//! Loads configuration, runs one P&ID conversion or entity extraction to
//! completion, and prints progress as it arrives. Ctrl-C cancels the flow.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery_client::{DiscoveryConfig, PlatformClient};
use discovery_core::{Error, EventBus, FileStore, FlowEvent, SourceFile};
use discovery_jobs::{Callbacks, ContextualizationService, FlowHandle, FlowOutcome, JobState};

#[derive(Parser)]
#[command(name = "discovery")]
#[command(author, version, about = "Contextualize P&ID documents against the asset hierarchy")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: <config dir>/discovery/discovery.toml, then DISCOVERY_* variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a P&ID document into a linked SVG
    Convert {
        /// Id of the source file
        #[arg(short, long)]
        file_id: i64,

        /// Name of the source file, used to name the derived SVG
        #[arg(short, long)]
        name: String,
    },

    /// Find asset names mentioned in a file
    Extract {
        /// Id of the file to search
        #[arg(short, long)]
        file_id: i64,
    },

    /// Print a download link for a file
    DownloadLink {
        /// Id of the file
        #[arg(short, long)]
        file_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = init_tracing();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref path) => DiscoveryConfig::from_file(path),
        None => DiscoveryConfig::load(),
    }
    .context("Failed to load configuration")?;

    let client = PlatformClient::new(config.api.clone())?;

    match cli.command {
        Commands::Convert { file_id, name } => {
            let service = ContextualizationService::from_client(client, &config);
            print_progress(service.events());

            let (tx, mut rx) = mpsc::unbounded_channel();
            let err_tx = tx.clone();
            let handle = service.start_pnid_conversion(
                SourceFile::new(file_id, name),
                Callbacks::new()
                    .on_result(move |artifact| {
                        let _ = tx.send(Ok(artifact));
                    })
                    .on_error(move |e| {
                        let _ = err_tx.send(Err(e));
                    }),
            );
            run_to_end(handle).await?;

            let artifact = rx.recv().await.context("Flow ended without a result")??;
            println!("Created file {} ({})", artifact.file.id, artifact.file.name);
            println!("Linked to source: {}", artifact.source_link.external_id);
            println!("Linked to {} detected asset(s)", artifact.asset_links.len());
        }
        Commands::Extract { file_id } => {
            let service = ContextualizationService::from_client(client, &config);
            print_progress(service.events());

            let (tx, mut rx) = mpsc::unbounded_channel();
            let err_tx = tx.clone();
            let handle = service.start_entity_extraction(
                file_id,
                Callbacks::new()
                    .on_result(move |entities| {
                        let _ = tx.send(Ok(entities));
                    })
                    .on_error(move |e| {
                        let _ = err_tx.send(Err(e));
                    }),
            );
            run_to_end(handle).await?;

            let entities = rx.recv().await.context("Flow ended without a result")??;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Commands::DownloadLink { file_id } => {
            println!("{}", client.download_link(file_id).await?);
        }
    }

    Ok(())
}

/// Wait for the flow, cancelling it on Ctrl-C.
async fn run_to_end(handle: FlowHandle) -> anyhow::Result<()> {
    let flow_id = handle.id();
    let mut state = handle.watch_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!(flow_id = %flow_id, "Interrupted, cancelling flow");
            handle.cancel();
        }
        _ = state.wait_for(JobState::is_terminal) => {}
    }

    if handle.join().await == JobState::Done(FlowOutcome::Cancelled) {
        bail!(Error::Cancelled);
    }
    Ok(())
}

/// Print every progress message published on the bus to stderr.
fn print_progress(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = rx.recv().await {
            match envelope.payload {
                FlowEvent::FlowProgress { message, .. } => eprintln!("{}", message),
                FlowEvent::JobSubmitted {
                    job_kind, job_id, ..
                } => info!(job_kind = %job_kind, job_id = %job_id, "Job submitted"),
                _ => {}
            }
        }
    });
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   RUST_LOG    - standard env filter (default: "discovery=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "discovery=info,discovery_core=info,discovery_client=info,discovery_jobs=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("discovery.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
        }
        Some(guard)
    } else {
        // Console output goes to stderr so stdout stays machine-readable
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}
