// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const ENV_CONFIG_PATH: &str = "ACCESS_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";
pub const DEFAULT_LOG_PATH: &str = "/var/log/apache2/access.log";

/// Longest accepted tick: one day.
pub const MAX_TICK_INTERVAL_SECS: u64 = 86_400;
/// Most ticks one alert window may span.
pub const MAX_WINDOW_TICKS: u64 = 100_000;

fn default_tick_interval_secs() -> u64 {
    10
}
fn default_alert_window_secs() -> u64 {
    120
}
fn default_alert_threshold() -> u64 {
    10
}
fn default_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_PATH)
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    250
}

/// Knobs consumed by the traffic monitor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Must be an exact multiple of `tick_interval_secs`.
    #[serde(default = "default_alert_window_secs")]
    pub alert_window_secs: u64,
    /// Extra hits above the rolling average that raise an alert.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            alert_window_secs: default_alert_window_secs(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

impl MonitorConfig {
    /// Number of ticks in the alert window, or why the config is unusable.
    pub fn window_ticks(&self) -> Result<usize> {
        if self.tick_interval_secs == 0 {
            bail!("tick_interval_secs must be > 0");
        }
        if self.tick_interval_secs > MAX_TICK_INTERVAL_SECS {
            bail!(
                "tick_interval_secs ({}) must be at most {MAX_TICK_INTERVAL_SECS}",
                self.tick_interval_secs
            );
        }
        if self.alert_window_secs == 0 {
            bail!("alert_window_secs must be > 0");
        }
        if self.alert_window_secs % self.tick_interval_secs != 0 {
            bail!(
                "alert_window_secs ({}) must be a multiple of tick_interval_secs ({})",
                self.alert_window_secs,
                self.tick_interval_secs
            );
        }
        let ticks = self.alert_window_secs / self.tick_interval_secs;
        if ticks > MAX_WINDOW_TICKS {
            bail!("alert window spans {ticks} ticks, at most {MAX_WINDOW_TICKS} allowed");
        }
        usize::try_from(ticks).map_err(|_| anyhow!("alert window too large"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Structured tracing events.
    #[default]
    Log,
    /// One JSON object per line on stdout.
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(ReportFormat::Log),
            "json" => Ok(ReportFormat::Json),
            other => bail!("unknown report format: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Start tailing at end-of-file (`tail -f -n 0`).
    #[serde(default = "default_true")]
    pub start_at_end: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub report_format: ReportFormat,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            start_at_end: true,
            poll_interval_ms: default_poll_interval_ms(),
            report_format: ReportFormat::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse monitor config TOML")
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading monitor config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $ACCESS_MONITOR_CONFIG
    /// 2) config/monitor.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides()?;
        cfg.monitor.window_ticks()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(p) = env::var("ACCESS_LOG_PATH") {
            self.log_path = PathBuf::from(p);
        }
        if let Some(v) = env_u64("TICK_INTERVAL_SECS")? {
            self.monitor.tick_interval_secs = v;
        }
        if let Some(v) = env_u64("ALERT_WINDOW_SECS")? {
            self.monitor.alert_window_secs = v;
        }
        if let Some(v) = env_u64("ALERT_THRESHOLD")? {
            self.monitor.alert_threshold = v;
        }
        if let Ok(v) = env::var("REPORT_FORMAT") {
            self.report_format = v.parse()?;
        }
        Ok(())
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.monitor.tick_interval_secs, 10);
        assert_eq!(cfg.monitor.alert_window_secs, 120);
        assert_eq!(cfg.monitor.alert_threshold, 10);
        assert_eq!(cfg.monitor.window_ticks().unwrap(), 12);
        assert!(cfg.start_at_end);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            log_path = "/tmp/access.log"
            report_format = "json"

            [monitor]
            alert_window_secs = 40
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_path, PathBuf::from("/tmp/access.log"));
        assert_eq!(cfg.report_format, ReportFormat::Json);
        assert_eq!(cfg.monitor.tick_interval_secs, 10);
        assert_eq!(cfg.monitor.window_ticks().unwrap(), 4);
    }

    #[test]
    fn invalid_windows_rejected() {
        let bad = |tick, window| MonitorConfig {
            tick_interval_secs: tick,
            alert_window_secs: window,
            alert_threshold: 10,
        };
        assert!(bad(0, 120).window_ticks().is_err());
        assert!(bad(10, 0).window_ticks().is_err());
        let err = bad(10, 125).window_ticks().unwrap_err();
        assert!(err.to_string().contains("multiple"));

        assert!(bad(MAX_TICK_INTERVAL_SECS + 1, MAX_TICK_INTERVAL_SECS + 1)
            .window_ticks()
            .is_err());
        assert!(bad(u64::MAX, u64::MAX).window_ticks().is_err());
        let err = bad(1, u64::MAX).window_ticks().unwrap_err();
        assert!(err.to_string().contains("ticks"));
        assert_eq!(bad(1, MAX_WINDOW_TICKS).window_ticks().unwrap(), 100_000);
    }

    #[test]
    fn report_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!(" log ".parse::<ReportFormat>().unwrap(), ReportFormat::Log);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
