use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::storage::StorageConfig;

#[derive(Debug, Parser)]
#[command(
    name = "lanwatch",
    version,
    about = "LAN host presence monitor combining active ICMP sweeps with passive ARP observation"
)]
pub struct Cli {
    /// Interfaces to watch (repeatable, or comma separated)
    #[arg(long = "iface", env = "LANWATCH_IFACE", value_delimiter = ',', required = true)]
    pub ifaces: Vec<String>,

    /// Ping sweep interval
    #[arg(long, env = "LANWATCH_PING_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub ping_interval: Duration,

    /// Report interval
    #[arg(long, env = "LANWATCH_REPORT_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub report_interval: Duration,

    /// Consider a host offline after report-interval + offline-lag of silence
    #[arg(long, env = "LANWATCH_OFFLINE_LAG", default_value = "30s", value_parser = humantime::parse_duration)]
    pub offline_lag: Duration,

    /// Prometheus exporter listen address
    #[arg(long, env = "LANWATCH_EXPORTER_LISTEN", default_value = "0.0.0.0:9999")]
    pub exporter_listen: SocketAddr,

    /// InfluxDB server url
    #[arg(long, env = "LANWATCH_INFLUXDB_URL", default_value = "http://localhost:8086")]
    pub influxdb_url: String,

    /// InfluxDB authentication token
    #[arg(long, env = "LANWATCH_INFLUXDB_TOKEN", default_value = "")]
    pub influxdb_token: String,

    /// InfluxDB authentication token file (takes precedence over --influxdb-token)
    #[arg(long, env = "LANWATCH_INFLUXDB_TOKEN_FILE")]
    pub influxdb_token_file: Option<PathBuf>,

    /// InfluxDB organization
    #[arg(long, env = "LANWATCH_INFLUXDB_ORG", default_value = "")]
    pub influxdb_org: String,

    /// InfluxDB bucket
    #[arg(long, env = "LANWATCH_INFLUXDB_BUCKET", default_value = "lanwatch")]
    pub influxdb_bucket: String,
}

impl Cli {
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            url: self.influxdb_url.clone(),
            org: self.influxdb_org.clone(),
            bucket: self.influxdb_bucket.clone(),
            token: self.influxdb_token.clone(),
            token_file: self.influxdb_token_file.clone(),
        }
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
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn iface_accepts_comma_separated_list() {
        let cli = Cli::parse_from(["lanwatch", "--iface", "eth0,wlan0"]);
        assert_eq!(cli.ifaces, vec!["eth0".to_string(), "wlan0".to_string()]);
    }

    #[test]
    fn durations_parse_with_units() {
        let cli = Cli::parse_from([
            "lanwatch",
            "--iface",
            "eth0",
            "--ping-interval",
            "30s",
            "--offline-lag",
            "2m",
        ]);
        assert_eq!(cli.ping_interval, Duration::from_secs(30));
        assert_eq!(cli.offline_lag, Duration::from_secs(120));
        assert_eq!(cli.report_interval, Duration::from_secs(60));
    }

    #[test]
    fn iface_is_required() {
        assert!(Cli::try_parse_from(["lanwatch"]).is_err());
    }
}
