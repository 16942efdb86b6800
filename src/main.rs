//! Access Log Monitor: binary entrypoint.
//! Loads configuration, tails the access log and runs the traffic monitor
//! until Ctrl-C.

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use access_log_monitor::{
    run, AppConfig, JsonLinesSink, ReportFormat, ReportSink, TailFile, TracingSink,
    TrafficMonitor,
};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("access_log_monitor=info,report=info,alert=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().flatten_event(true)).init();
    } else {
        // Keep stdout free for JSON reports.
        registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("load configuration")?;
    let monitor = TrafficMonitor::new(cfg.monitor)?;

    let source = TailFile::open(
        &cfg.log_path,
        cfg.start_at_end,
        Duration::from_millis(cfg.poll_interval_ms),
    )
    .await?;

    let sink: Box<dyn ReportSink> = match cfg.report_format {
        ReportFormat::Log => Box::new(TracingSink),
        ReportFormat::Json => Box::new(JsonLinesSink::new(io::stdout())),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, stopping"),
            Err(e) => tracing::warn!(error = ?e, "ctrl-c handler failed, stopping"),
        }
        let _ = stop_tx.send(true);
    });

    let monitor = run(monitor, source, sink, stop_rx).await?;
    tracing::info!(
        total_hits = monitor.cumulative().total_hits(),
        "bye"
    );
    Ok(())
}
