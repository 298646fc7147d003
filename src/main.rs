use anyhow::Context;
use clap::Parser;
use is_root::is_root;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lanwatch::cli::Cli;
use lanwatch::metrics;
use lanwatch::net::interface;
use lanwatch::pinger::Pinger;
use lanwatch::reporter::{self, Reporter};
use lanwatch::storage::Storage;
use lanwatch::watcher::Watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if !is_root() {
        warn!("not running as root; raw ICMP probing and packet capture will likely fail");
    }

    let scopes = interface::find(&cli.ifaces)?;

    let exporter = TcpListener::bind(cli.exporter_listen)
        .await
        .with_context(|| format!("binding metrics exporter on {}", cli.exporter_listen))?;
    info!("metrics exporter listening on {}", cli.exporter_listen);
    tokio::spawn(async move {
        if let Err(err) = metrics::serve(exporter).await {
            error!("metrics exporter failed: {err:#}");
        }
    });

    let storage = Storage::connect(&cli.storage_config()).await?;

    let (sighting_tx, sighting_rx) = mpsc::channel(reporter::SIGHTING_QUEUE_DEPTH);
    let (stop_tx, stop_rx) = watch::channel(false);

    let reporter = Reporter::new(cli.report_interval, cli.offline_lag, sighting_rx, storage.handle());
    let reporter_task = tokio::spawn(reporter.run());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    for scope in scopes {
        let pinger = Pinger::new(scope.clone(), cli.ping_interval, sighting_tx.clone());
        let stop = stop_rx.clone();
        let iface = scope.iface_name().to_string();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = pinger.run(stop).await {
                error!("pinger on interface {iface} crashed: {err:#}");
            }
        }));

        let watcher = Watcher::new(scope, sighting_tx.clone());
        tasks.push(watcher.start(stop_rx.clone())?);
    }
    // The pingers and watchers hold their own clones.
    drop(sighting_tx);

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    let _ = stop_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }
    let _ = reporter_task.await;
    storage.close().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
