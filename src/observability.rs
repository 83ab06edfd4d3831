use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Admission ───────────────────────────────────────────────────

/// Counter: booking proposals. Labels: outcome (`admitted` or the rejection kind).
pub const ADMISSIONS_TOTAL: &str = "houndz_admissions_total";

/// Histogram: proposal latency in seconds, lock waits included.
pub const ADMISSION_DURATION_SECONDS: &str = "houndz_admission_duration_seconds";

/// Counter: proposals or reads that gave up waiting for a suite lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "houndz_lock_timeouts_total";

/// Gauge: suites with a checked-in booking, as of the last occupancy query.
pub const OCCUPIED_SUITES: &str = "houndz_occupied_suites";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "houndz_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "houndz_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "houndz_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when no port is configured.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
