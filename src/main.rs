use std::sync::Arc;

use chrono::Local;
use tracing::info;

use houndz::compactor;
use houndz::config::Config;
use houndz::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    houndz::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), config.engine_options())?);

    info!("houndz booking store ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {}ms", config.lock_timeout.as_millis());
    info!("  status_policy: {}", config.status_policy);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Occupancy snapshot for today, one JSON line per checked-in booking.
    let today = Local::now().date_naive();
    let occupied = engine.list_active_bookings(today).await;
    info!("{} suites occupied on {today}", occupied.len());
    for booking in &occupied {
        println!("{}", serde_json::to_string(booking)?);
    }

    let compactor_handle = tokio::spawn(compactor::run_compactor(engine.clone(), config.compact_threshold));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received");
    compactor_handle.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::error!("final compaction failed: {e}");
    }
    info!("houndz stopped");
    Ok(())
}
