//! Synthetic load for manual end-to-end runs: appends combined-format lines to
//! a log file at a normal rate, then a high rate, then normal again.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

struct Phase {
    rps: u64,
    secs: u64,
}

fn env_or(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn log_line(section: u32) -> String {
    let ts = Utc::now().format("%d/%b/%Y:%H:%M:%S %z");
    format!(
        "127.0.0.1 - - [{ts}] \"GET /{section}/test.html HTTP/1.1\" 200 1024 \"-\" \"traffic-demo\"\n"
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let path = std::env::var("DEMO_LOG_PATH").unwrap_or_else(|_| "access.log".to_string());
    let sections = env_or("DEMO_SECTIONS", 3).clamp(1, u32::MAX as u64) as u32;
    let normal = Phase {
        rps: env_or("DEMO_NORMAL_RPS", 1).max(1),
        secs: env_or("DEMO_NORMAL_SECS", 180),
    };
    let high = Phase {
        rps: env_or("DEMO_HIGH_RPS", 10).max(1),
        secs: env_or("DEMO_HIGH_SECS", 10),
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("open {path}"))?;

    let mut rng = rand::rng();
    for phase in [&normal, &high, &normal] {
        let total = phase.rps * phase.secs;
        let pause = Duration::from_secs_f64(1.0 / phase.rps as f64);
        tracing::info!(rps = phase.rps, secs = phase.secs, "sending {total} requests");
        for _ in 0..total {
            let line = log_line(rng.random_range(0..sections));
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tokio::time::sleep(pause).await;
        }
    }

    println!("traffic-demo done");
    Ok(())
}
