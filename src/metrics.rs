use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntGauge, IntGaugeVec, TextEncoder,
    register_histogram_vec, register_int_counter, register_int_gauge, register_int_gauge_vec,
};
use tokio::net::TcpListener;

/// The number of hosts the reporter currently tracks.
pub static KNOWN_HOSTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("lanwatch_known_hosts", "The number of known hosts")
        .expect("failed to register known_hosts gauge")
});

/// Per-(ip, mac) up/down gauge, refreshed on every report sweep.
pub static HOST_UP: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "lanwatch_host_up",
        "Indicates if the host was up at the last sweep",
        &["ip", "mac"]
    )
    .expect("failed to register host_up gauge")
});

/// Wall-clock time one full ping sweep spent sending, per interface.
pub static PINGER_SEND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lanwatch_pinger_send_duration_seconds",
        "The number of seconds sending out pings to the network took",
        &["iface"]
    )
    .expect("failed to register pinger_send_duration histogram")
});

pub static STORAGE_WRITE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "lanwatch_influxdb_write_errors_total",
        "The total number of InfluxDB write errors"
    )
    .expect("failed to register influxdb_write_errors counter")
});

/// Serves the default registry on `/metrics`. The listener is bound by the
/// caller so an unusable exporter address fails startup, not this task.
pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(render));
    axum::serve(listener, app).await?;
    Ok(())
}

async fn render() -> Response {
    let encoder = TextEncoder::new();
    let mut body = String::new();
    match encoder.encode_utf8(&prometheus::gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
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
