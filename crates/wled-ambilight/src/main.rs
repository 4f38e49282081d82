use std::sync::Arc;

use ambi_catalog::Catalog;
use ambi_jellyfin::JellyfinClient;
use ambi_net::{DnsCache, UdpSender};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

mod config;
mod orchestrator;
mod scheduler;
mod targets;

use config::Config;
use orchestrator::{Orchestrator, UdpEngineFactory};
use scheduler::Scheduler;

/// Ambient lighting for Jellyfin playback.
///
/// Extracts per-frame border colors from every catalogued video into
/// compact binaries, then mirrors whatever each client device is playing
/// onto its WLED strip over UDP, frame-accurately.
#[derive(Parser, Debug)]
#[command(name = "wled-ambilight", version, about)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Scan the library and extract LED binaries; no playback.
    Extract,
    /// Follow live sessions and drive WLED strips; no extraction.
    Play,
    /// Both pipelines in one process.
    Run,
    /// Print extraction progress and disk usage, then exit.
    Status,
    /// Print the header and frame count of one binary, then exit.
    Inspect {
        /// Path to a `.bin` file.
        file: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // The read-only commands work without a media server configured.
    match &cli.role {
        Role::Status => return print_status(),
        Role::Inspect { file } => return print_binary_info(file),
        _ => {}
    }

    let config = Config::from_env().context("configuration error")?;
    log_startup(&config);

    let catalog = Catalog::open(&config.data_dir).with_context(|| {
        format!("cannot open data directory {}", config.data_dir.display())
    })?;
    let orphans = catalog.sweep_orphan_binaries();
    if orphans > 0 {
        tracing::info!(orphans, "removed leftovers from interrupted extractions");
    }

    let shutdown = spawn_signal_handler();

    match cli.role {
        Role::Extract => run_scheduler(&config, catalog, shutdown).await,
        Role::Play => run_player(&config, catalog, shutdown).await?,
        Role::Run => {
            let player_catalog = Catalog::open(&config.data_dir)?;
            let scheduler_fut = run_scheduler(&config, catalog, shutdown.clone());
            let player_fut = run_player(&config, player_catalog, shutdown);
            let ((), player) = tokio::join!(scheduler_fut, player_fut);
            player?;
        }
        Role::Status | Role::Inspect { .. } => unreachable!("handled above"),
    }

    tracing::info!("clean shutdown");
    Ok(())
}

async fn run_scheduler(config: &Config, catalog: Catalog, shutdown: watch::Receiver<bool>) {
    let client = match JellyfinClient::new(&config.server_url, &config.server_token) {
        Ok(client) => client,
        Err(e) => {
            // Startup has already validated the URL/token shape; losing
            // here means the token is header-hostile.
            tracing::error!("cannot build media server client: {e}");
            return;
        }
    };
    Scheduler::new(
        catalog,
        client,
        config.geometry,
        config.extraction.clone(),
        config.scheduler.clone(),
    )
    .run(shutdown)
    .await;
}

async fn run_player(
    config: &Config,
    catalog: Catalog,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let client = JellyfinClient::new(&config.server_url, &config.server_token)
        .context("cannot build media server client")?;

    let dns = Arc::new(DnsCache::new(config.dns_ttl, config.dns_disable));
    let sender = Arc::new(
        UdpSender::bind(dns)
            .await
            .context("cannot bind the WLED output socket")?,
    );
    let factory = UdpEngineFactory::new(
        sender,
        config.physical_payload_len(),
        config.playback.options,
    );

    let mut orchestrator = Orchestrator::new(
        Arc::new(client),
        Box::new(factory),
        catalog,
        config.targets.clone(),
        &config.playback,
    );
    orchestrator
        .run(config.playback.poll_interval, shutdown)
        .await;
    Ok(())
}

/// First SIGINT/SIGTERM flips the process-wide shutdown flag; every loop
/// selects on it and winds down within its own tick.
fn spawn_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
        let _ = tx.send(true);
    });
    rx
}

/// `status`: extraction progress and disk usage of the data directory.
fn print_status() -> Result<()> {
    let data_dir = Config::data_dir_from_env()?;
    let catalog = Catalog::open(&data_dir)
        .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;

    let stats = catalog.stats();
    let storage = catalog.storage_info();
    println!("data directory : {}", data_dir.display());
    println!(
        "videos         : {} total, {} extracted, {} pending, {} failed",
        stats.total, stats.extracted, stats.pending, stats.failed
    );
    println!(
        "binaries       : {} files, {:.1} MiB",
        storage.binary_count,
        storage.binary_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("item documents : {}", storage.item_count);
    Ok(())
}

/// `inspect`: decode one binary's header and index.
fn print_binary_info(file: &std::path::Path) -> Result<()> {
    let reader = ambi_codec::FrameReader::open(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let header = reader.header();
    let duration = reader
        .len()
        .checked_sub(1)
        .and_then(|last| reader.timestamp_us(last))
        .map_or(0.0, |us| us as f64 / 1_000_000.0);

    println!("file      : {}", file.display());
    println!("fps       : {:.3}", header.fps);
    println!("leds      : {} ({})", header.led_count, header.format);
    println!("offset    : {}", header.offset);
    println!("frames    : {}", reader.len());
    println!("duration  : {duration:.3}s");
    Ok(())
}

fn log_startup(config: &Config) {
    tracing::info!(
        server = %config.server_url,
        data_dir = %config.data_dir.display(),
        leds = config.geometry.led_count(),
        physical_leds = config.physical_led_count,
        format = %config.geometry.format,
        offset = config.geometry.offset,
        "starting wled-ambilight"
    );
    if config.targets.is_empty() {
        tracing::warn!("no WLED_TARGET_* mappings configured; playback will light nothing");
    }
    for (ident, endpoint) in config.targets.iter() {
        tracing::info!(ident, endpoint = %endpoint, "target mapping");
    }
}
