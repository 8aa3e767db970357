//! Realtime NEXRAD radial streamer.
//!
//! Subscribes to Level II chunk notifications for a group of sites while
//! clients are listening, reassembles and decodes the chunks in order, and
//! streams the resulting radials over HTTP (Server-Sent Events).

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chunk_feed::RadarFeed;
use level2_decoder::Level2Decoder;
use radar_common::SiteTable;
use storage::{
    ChunkStore, NotificationSubscriber, ObjectStorage, RedisSubscriber, SqsSubscriber,
};

use config::{QueueConfig, StreamerConfig};
use server::AppState;

#[derive(Parser, Debug)]
#[command(name = "radial-streamer")]
#[command(about = "Realtime NEXRAD Level II radial streaming service")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "STREAMER_CONFIG", default_value = "config/radial-streamer.yaml")]
    config: PathBuf,

    /// HTTP listen address (overrides the config file)
    #[arg(long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Site metadata CSV (overrides the config file)
    #[arg(long, env = "SITES_FILE")]
    sites_file: Option<PathBuf>,

    /// Subscribe at startup instead of waiting for the first listener
    #[arg(long)]
    activate_on_start: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics exporter
    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    info!("Starting radial streamer");

    // Load configuration
    let mut config = StreamerConfig::load_or_default(&args.config)?;
    config.apply_env();
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(sites_file) = args.sites_file {
        config.sites_file = Some(sites_file);
    }
    if args.activate_on_start {
        config.feed.activate_on_start = true;
    }
    config
        .feed
        .validate()
        .context("Invalid feed configuration")?;
    info!(
        sites = ?config.feed.sites,
        backend = config.queue.backend_name(),
        bucket = %config.storage.bucket,
        "Loaded configuration"
    );

    let sites = match &config.sites_file {
        Some(path) => SiteTable::load(path)?,
        None => SiteTable::builtin()?,
    };
    for site in &config.feed.sites {
        if !sites.contains(site) {
            warn!(site = %site, "Site has no location metadata");
        }
    }

    // Chunk store and notification backend
    let storage = ObjectStorage::new(&config.storage)?;
    let fetcher = Arc::new(ChunkStore::new(storage, config.feed.data_dir.clone()));
    let notifications: Arc<dyn NotificationSubscriber> = match &config.queue {
        QueueConfig::Sqs(sqs) => Arc::new(SqsSubscriber::new(sqs.clone()).await),
        QueueConfig::Redis(redis) => Arc::new(RedisSubscriber::new(redis.clone())?),
    };

    let feed = Arc::new(RadarFeed::new(
        config.feed.clone(),
        notifications,
        fetcher,
        Arc::new(Level2Decoder::new()),
    )?);
    feed.start().await?;

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        feed: feed.clone(),
        sites,
        prometheus,
        shutdown: shutdown.clone(),
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            server::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    server::run_server(state, &config.listen, shutdown.cancelled_owned()).await?;

    feed.shutdown().await;
    info!("Radial streamer stopped");
    Ok(())
}
