use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use futures::stream;
use influxdb2::Client;
use influxdb2::models::DataPoint;
use pnet::util::MacAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::metrics;

// Matches the defaults of the InfluxDB v2 client's batching write API.
const MAX_BATCH: usize = 5000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The seam the reporter writes through. Writes are fire-and-forget: the
/// reporter never waits for durability.
pub trait StorageSink {
    fn write_point(&self, ip: &str, mac: MacAddr, online: bool);
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    /// Takes precedence over `token` when set; first line, trimmed.
    pub token_file: Option<PathBuf>,
}

/// InfluxDB writer. Points are queued to a background task that batches and
/// flushes them; write errors are logged and counted, never surfaced.
pub struct Storage {
    tx: mpsc::UnboundedSender<DataPoint>,
    writer: JoinHandle<()>,
}

/// Cloneable write handle for the reporter.
#[derive(Clone)]
pub struct Handle {
    tx: mpsc::UnboundedSender<DataPoint>,
}

impl Storage {
    /// Connects and health-checks the server; an unreachable server is a
    /// fatal setup error. On success the writer task starts.
    pub async fn connect(config: &StorageConfig) -> anyhow::Result<Self> {
        let token = read_token(config)?;
        let client = Client::new(&config.url, &config.org, token);
        client
            .health()
            .await
            .with_context(|| format!("InfluxDB health check failed for {}", config.url))?;
        info!("connected to InfluxDB at {}", config.url);

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_loop(client, config.bucket.clone(), rx));
        Ok(Self { tx, writer })
    }

    pub fn handle(&self) -> Handle {
        Handle { tx: self.tx.clone() }
    }

    /// Flushes whatever is still queued and stops the writer.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.writer.await;
    }
}

impl StorageSink for Handle {
    fn write_point(&self, ip: &str, mac: MacAddr, online: bool) {
        match host_point(ip, mac, online) {
            // A send error only means the writer already shut down.
            Ok(point) => {
                let _ = self.tx.send(point);
            }
            Err(err) => warn!("failed to build InfluxDB point for {ip}: {err}"),
        }
    }
}

fn host_point(ip: &str, mac: MacAddr, online: bool) -> anyhow::Result<DataPoint> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    DataPoint::builder("host")
        .tag("ip", ip)
        .tag("mac", mac.to_string())
        .field("online", i64::from(online))
        .timestamp(timestamp)
        .build()
        .context("building host data point")
}

async fn writer_loop(client: Client, bucket: String, mut rx: mpsc::UnboundedReceiver<DataPoint>) {
    let mut pending: Vec<DataPoint> = Vec::new();
    let mut ticker = time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            point = rx.recv() => match point {
                Some(point) => {
                    pending.push(point);
                    if pending.len() >= MAX_BATCH {
                        flush(&client, &bucket, &mut pending).await;
                    }
                }
                None => {
                    flush(&client, &bucket, &mut pending).await;
                    return;
                }
            },
            _ = ticker.tick() => flush(&client, &bucket, &mut pending).await,
        }
    }
}

// TODO: fail the whole application if write errors persist for X minutes.
async fn flush(client: &Client, bucket: &str, pending: &mut Vec<DataPoint>) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<DataPoint> = pending.drain(..).collect();
    if let Err(err) = client.write(bucket, stream::iter(batch)).await {
        warn!("InfluxDB write error: {err}");
        metrics::STORAGE_WRITE_ERRORS.inc();
    }
}

fn read_token(config: &StorageConfig) -> anyhow::Result<String> {
    if let Some(path) = &config.token_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading InfluxDB token file {}", path.display()))?;
        Ok(contents.lines().next().unwrap_or_default().trim().to_string())
    } else {
        Ok(config.token.clone())
    }
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(token: &str, token_file: Option<PathBuf>) -> StorageConfig {
        StorageConfig {
            url: "http://localhost:8086".to_string(),
            org: "test".to_string(),
            bucket: "lanwatch".to_string(),
            token: token.to_string(),
            token_file,
        }
    }

    #[test]
    fn token_file_takes_precedence_and_is_trimmed() {
        let mut file = tempfile_path();
        writeln!(file.1, "  secret-token  ").unwrap();
        writeln!(file.1, "second line is ignored").unwrap();

        let token = read_token(&config("flag-token", Some(file.0.clone()))).unwrap();
        assert_eq!(token, "secret-token");
        let _ = std::fs::remove_file(&file.0);
    }

    #[test]
    fn flag_token_is_used_without_a_file() {
        let token = read_token(&config("flag-token", None)).unwrap();
        assert_eq!(token, "flag-token");
    }

    #[test]
    fn missing_token_file_is_an_error() {
        let result = read_token(&config("", Some(PathBuf::from("/nonexistent/token"))));
        assert!(result.is_err());
    }

    #[test]
    fn host_point_carries_ip_and_mac_tags() {
        let mac = MacAddr::new(0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF);
        assert!(host_point("192.168.1.20", mac, true).is_ok());
        assert!(host_point("192.168.1.20", mac, false).is_ok());
    }

    fn tempfile_path() -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("lanwatch-token-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
