//! Sealpost server binary.
//!
//! # Usage
//!
//! ```bash
//! # Durable store in the working directory
//! sealpost-server --db sealpost.redb
//!
//! # Faster sweeps for local testing
//! sealpost-server --db /tmp/sealpost.redb --delivery-interval-secs 5 --expiry-interval-secs 5
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use sealpost_server::{
    ChannelSink, RedbStorage, ServerConfig, ServerDriver, Storage, Sweeps, SystemEnv,
};
use tokio::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sealpost relay server
#[derive(Parser, Debug)]
#[command(name = "sealpost-server")]
#[command(about = "End-to-end encrypted messaging relay")]
#[command(version)]
struct Args {
    /// Path to the redb database file
    #[arg(long, default_value = "sealpost.redb")]
    db: PathBuf,

    /// Seconds between scheduled-delivery sweeps
    #[arg(long, default_value = "60")]
    delivery_interval_secs: u64,

    /// Seconds between self-destruct sweeps
    #[arg(long, default_value = "60")]
    expiry_interval_secs: u64,

    /// Unused prekey count below which key fetches warn
    #[arg(long, default_value = "2")]
    pre_key_low_watermark: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Sealpost server starting");
    tracing::info!("Opening database at {}", args.db.display());

    let config = ServerConfig {
        delivery_sweep_interval: Duration::from_secs(args.delivery_interval_secs),
        expiry_sweep_interval: Duration::from_secs(args.expiry_interval_secs),
        pre_key_low_watermark: args.pre_key_low_watermark,
        ..ServerConfig::default()
    };

    let storage = RedbStorage::open(&args.db)?;
    let scheduled = storage.scheduled_messages()?.len();
    tracing::info!(scheduled, "storage ready");

    let driver = Arc::new(Mutex::new(ServerDriver::new(SystemEnv::new(), storage, config.clone())));
    let (sink, mut pushes) = ChannelSink::new();
    let sweeps = Sweeps::spawn(driver, Arc::new(sink), &config);

    // No session transport is attached; drained pushes are only logged.
    let drain = tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            tracing::debug!(recipient = %push.recipient, event = push.event.name(), "undelivered push");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    sweeps.shutdown().await;
    drain.abort();

    Ok(())
}
