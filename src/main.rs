//! jamcapture - multi-channel live recording
//!
//! Subcommands:
//! - `jamcapture record <song>` - Record once every configured source is up
//! - `jamcapture sources` - List ports of the routing graph
//! - `jamcapture channels` - Show availability of the configured channels
//! - `jamcapture link|unlink <source> <dest>` - Manage a single link
//! - `jamcapture config` - Print the resolved configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jamcapture::recorder::ChannelStatus;
use jamcapture::routing::{count_occurrences, ConnectionManager, PortDirectory, PortGraph, PwLink};
use jamcapture::{CaptureConfig, CaptureCoordinator, CaptureStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "jamcapture")]
#[command(about = "Multi-channel live recording over PipeWire")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.config/jamcapture.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a song; starts when all sources are present, Ctrl+C stops
    Record {
        /// Song name, also used for the output file name
        song: String,
    },

    /// List ports of the routing graph
    Sources,

    /// Show availability of the configured channels
    Channels {
        /// Print the status map as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link two ports, retrying while the source is missing
    Link { source: String, dest: String },

    /// Remove the link between two ports
    Unlink { source: String, dest: String },

    /// Print the resolved configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    jamcapture::init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let graph: Arc<dyn PortGraph> = Arc::new(PwLink::new(config.routing.link_command.clone()));

    match cli.command {
        Commands::Record { song } => record(config, graph, &song).await,
        Commands::Sources => list_sources(graph).await,
        Commands::Channels { json } => show_channels(config, graph, json).await,
        Commands::Link { source, dest } => {
            let manager = ConnectionManager::new(PortDirectory::new(graph));
            let attempt = manager.connect(&source, &dest).await?;
            println!("Linked {} -> {} (attempt {})", source, dest, attempt);
            Ok(())
        }
        Commands::Unlink { source, dest } => {
            let manager = ConnectionManager::new(PortDirectory::new(graph));
            manager.disconnect(&source, &dest).await?;
            println!("Unlinked {} -> {}", source, dest);
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<CaptureConfig> {
    if let Some(path) = explicit {
        return CaptureConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()));
    }

    match CaptureConfig::default_path() {
        Some(path) if path.exists() => CaptureConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display())),
        _ => {
            tracing::debug!("No config file found, using defaults");
            Ok(CaptureConfig::default())
        }
    }
}

async fn record(config: CaptureConfig, graph: Arc<dyn PortGraph>, song: &str) -> Result<()> {
    let coordinator = CaptureCoordinator::new(config, graph);

    let session = match coordinator.prepare(song).await {
        Ok(session) => session,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e).context("preparing session");
        }
    };
    println!("Prepared '{}' -> {}", session.song_name, session.output_file.display());
    println!("Waiting for sources... (Ctrl+C to stop)");

    let result = watch_session(&coordinator).await;
    coordinator.shutdown().await;
    result
}

async fn watch_session(coordinator: &CaptureCoordinator) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last = CaptureStatus::Ready;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl+C")?;
                break;
            }
            _ = ticker.tick() => {}
        }

        let status = coordinator.status();
        if status == last {
            continue;
        }
        last = status;

        match status {
            CaptureStatus::Recording => println!("Recording... (Ctrl+C to stop)"),
            CaptureStatus::Standby | CaptureStatus::Error => {
                let reason = coordinator
                    .last_error()
                    .unwrap_or_else(|| "sources did not become available".to_string());
                bail!("recording did not start: {}", reason);
            }
            CaptureStatus::Ready => {}
        }
    }

    match coordinator.status() {
        CaptureStatus::Recording => {
            let summary = coordinator.stop().await.context("stopping recording")?;
            println!(
                "Saved {} ({} tracks, {} bytes, {:.1}s)",
                summary.output_file.display(),
                summary.channel_count,
                summary.size_bytes,
                summary.duration_ms as f64 / 1000.0
            );
        }
        CaptureStatus::Ready => {
            coordinator.cancel().await?;
            println!("Cancelled before recording started");
        }
        _ => {}
    }
    Ok(())
}

async fn list_sources(graph: Arc<dyn PortGraph>) -> Result<()> {
    let ports = graph.list_ports().await?;
    let mut shown = Vec::new();
    for port in &ports {
        if shown.contains(port) {
            continue;
        }
        shown.push(port.clone());
        match count_occurrences(&ports, port) {
            1 => println!("{}", port),
            n => println!("{} (registered {} times)", port, n),
        }
    }
    Ok(())
}

async fn show_channels(config: CaptureConfig, graph: Arc<dyn PortGraph>, json: bool) -> Result<()> {
    let channels = config.channels.clone();
    let coordinator = CaptureCoordinator::new(config, graph);
    let statuses = coordinator.get_channel_status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    for channel in &channels {
        let status = statuses
            .get(&channel.name)
            .copied()
            .unwrap_or(ChannelStatus::Unknown);
        let sources: Vec<String> = channel.sources.iter().map(|s| s.to_string()).collect();
        println!(
            "{:<16} {:<12} {}",
            channel.name,
            format!("{:?}", status).to_lowercase(),
            sources.join(", ")
        );
    }
    Ok(())
}
