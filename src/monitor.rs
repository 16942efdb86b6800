//! # Traffic Monitor
//! Owns the draft stats (shared with ingestion behind one mutex), the
//! cumulative stats, the sliding alert window and the alert state.
//!
//! Two activities run for the lifetime of the monitor:
//!   - ingestion: reads lines, parses them and bumps the draft stats;
//!   - tick: every `tick_interval_secs` swaps the draft for an empty one and
//!     folds it into the window and the cumulative stats, lock-free.
//!
//! The draft mutex is the only state the two share. Window, alert and
//! cumulative state belong to the tick activity alone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::MonitorConfig;
use crate::parser::{self, Sample};
use crate::report::{AlertEvent, ReportSink, TickReport};
use crate::source::LineSource;
use crate::stats::AccessStats;
use crate::telemetry;
use crate::window::{AlertState, Observation, SlidingAlertWindow};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Cloneable handle to the lock-guarded draft stats.
#[derive(Debug, Clone, Default)]
pub struct DraftHandle {
    inner: Arc<Mutex<AccessStats>>,
}

impl DraftHandle {
    /// Count one sample. Holds the lock for a single increment.
    pub fn ingest(&self, sample: &Sample) {
        self.lock().add_sample(sample);
    }

    /// Swap the draft for an empty one and return what it held.
    pub fn drain(&self) -> AccessStats {
        std::mem::take(&mut *self.lock())
    }

    pub fn pending_hits(&self) -> u64 {
        self.lock().total_hits()
    }

    fn lock(&self) -> MutexGuard<'_, AccessStats> {
        // A panic mid-increment cannot leave the counters torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The draft drained at the start of this tick.
    pub drained: AccessStats,
    pub observation: Observation,
    pub alert: Option<AlertEvent>,
    pub report: TickReport,
}

#[derive(Debug)]
pub struct TrafficMonitor {
    config: MonitorConfig,
    draft: DraftHandle,
    cumulative: AccessStats,
    window: SlidingAlertWindow,
    ticks: u64,
}

impl TrafficMonitor {
    /// Refuses to build when the tick/window configuration is unusable.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let window_ticks = config.window_ticks().context("invalid monitor configuration")?;
        Ok(Self {
            config,
            draft: DraftHandle::default(),
            cumulative: AccessStats::new(),
            window: SlidingAlertWindow::new(window_ticks, config.alert_threshold),
            ticks: 0,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn draft_handle(&self) -> DraftHandle {
        self.draft.clone()
    }

    pub fn ingest(&self, sample: &Sample) {
        self.draft.ingest(sample);
    }

    pub fn cumulative(&self) -> &AccessStats {
        &self.cumulative
    }

    pub fn window(&self) -> &SlidingAlertWindow {
        &self.window
    }

    pub fn is_alert_active(&self) -> bool {
        self.window.is_triggered()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One rotation: drain, merge, slide the window, evaluate the alert.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let drained = self.draft.drain();
        self.cumulative.merge(&drained);

        let observation = self.window.observe(drained.total_hits());
        self.ticks += 1;

        let timestamp = format_timestamp(now);
        let alert = match observation {
            Observation::Evaluated {
                window_hits,
                average,
                transition: Some(state),
            } => Some(AlertEvent {
                state,
                window_hits,
                average,
                timestamp: timestamp.clone(),
            }),
            _ => None,
        };

        counter!(telemetry::TICKS_TOTAL).increment(1);
        gauge!(telemetry::WINDOW_HITS).set(observation.window_hits() as f64);
        gauge!(telemetry::ALERT_ACTIVE).set(if self.window.is_triggered() { 1.0 } else { 0.0 });
        if let Some(ev) = &alert {
            let state = match ev.state {
                AlertState::Triggered => "triggered",
                AlertState::Recovered => "recovered",
            };
            counter!(telemetry::ALERTS_TOTAL, "state" => state).increment(1);
        }

        tracing::debug!(
            tick = self.ticks,
            drained = drained.total_hits(),
            window_hits = observation.window_hits(),
            window_full = self.window.is_full(),
            "tick"
        );

        let report = TickReport {
            timestamp,
            stats: self.cumulative.snapshot(true),
            window_hits: Some(observation.window_hits()),
            is_final: false,
        };

        TickOutcome {
            drained,
            observation,
            alert,
            report,
        }
    }

    /// Final drain on shutdown: folds whatever is pending into the cumulative
    /// stats. A partial interval is not pushed into the window.
    pub fn flush(&mut self, now: DateTime<Utc>) -> TickReport {
        let drained = self.draft.drain();
        self.cumulative.merge(&drained);
        tracing::info!(pending = drained.total_hits(), "final drain");
        TickReport {
            timestamp: format_timestamp(now),
            stats: self.cumulative.snapshot(true),
            window_hits: None,
            is_final: true,
        }
    }
}

/// Run both activities until `stop` flips to `true` (or its sender is
/// dropped) or the source is exhausted. Ingestion ends first; the tick
/// activity then performs a final drain so nothing ingested is lost.
/// If the tick activity dies, ingestion is halted and the failure returned.
/// Returns the monitor for inspection.
pub async fn run<S, K>(
    monitor: TrafficMonitor,
    source: S,
    sink: K,
    stop: watch::Receiver<bool>,
) -> Result<TrafficMonitor>
where
    S: LineSource + 'static,
    K: ReportSink + 'static,
{
    telemetry::ensure_metrics_described();
    let period = Duration::from_secs(monitor.config.tick_interval_secs);
    let first_tick = Instant::now()
        .checked_add(period)
        .ok_or_else(|| anyhow!("tick interval of {}s is out of range", period.as_secs()))?;

    tracing::info!(
        source = source.name(),
        tick_interval_secs = monitor.config.tick_interval_secs,
        alert_window_secs = monitor.config.alert_window_secs,
        alert_threshold = monitor.config.alert_threshold,
        "traffic monitor starting"
    );

    let halt = Arc::new(Notify::new());
    let mut ingestion = tokio::spawn(ingest_loop(
        monitor.draft_handle(),
        source,
        stop,
        halt.clone(),
    ));
    let (finish_tx, finish_rx) = oneshot::channel();
    let mut ticking = tokio::spawn(tick_loop(monitor, sink, first_tick, finish_rx));

    let ingested = tokio::select! {
        res = &mut ingestion => res,
        res = &mut ticking => {
            // The tick activity only returns after `finish`, so getting here means it failed.
            halt.notify_one();
            let _ = ingestion.await;
            return Err(match res {
                Err(e) => anyhow!("tick activity failed: {e}"),
                Ok(_) => anyhow!("tick activity exited before ingestion"),
            });
        }
    };
    let _ = finish_tx.send(());
    let monitor = ticking
        .await
        .map_err(|e| anyhow!("tick activity failed: {e}"))?;

    match ingested {
        Ok(Ok(lines)) => tracing::info!(lines, "ingestion finished"),
        Ok(Err(e)) => tracing::warn!(error = ?e, "ingestion stopped on source error"),
        Err(e) => return Err(anyhow!("ingestion activity failed: {e}")),
    }
    tracing::info!(
        ticks = monitor.ticks,
        total_hits = monitor.cumulative.total_hits(),
        "traffic monitor stopped"
    );
    Ok(monitor)
}

async fn ingest_loop<S: LineSource>(
    draft: DraftHandle,
    mut source: S,
    mut stop: watch::Receiver<bool>,
    halt: Arc<Notify>,
) -> Result<u64> {
    let mut lines = 0u64;
    if *stop.borrow() {
        return Ok(lines);
    }

    loop {
        let next = tokio::select! {
            res = source.next_line() => res,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = halt.notified() => {
                tracing::warn!("ingestion halted: tick activity is gone");
                break;
            }
        };

        let Some(line) = next? else {
            tracing::info!(source = source.name(), "line source exhausted");
            break;
        };
        lines += 1;
        counter!(telemetry::LINES_TOTAL).increment(1);

        if let Some(sample) = parser::parse(&line) {
            draft.ingest(&sample);
            counter!(telemetry::SAMPLES_TOTAL).increment(1);
        }
    }
    Ok(lines)
}

async fn tick_loop<K: ReportSink>(
    mut monitor: TrafficMonitor,
    mut sink: K,
    first_tick: Instant,
    mut finish: oneshot::Receiver<()>,
) -> TrafficMonitor {
    let period = Duration::from_secs(monitor.config.tick_interval_secs);
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Synchronous: a started drain always completes before stop is seen.
                let outcome = monitor.tick(Utc::now());
                if let Some(ev) = &outcome.alert {
                    if let Err(e) = sink.alert(ev) {
                        tracing::warn!(error = ?e, "alert sink failed");
                    }
                }
                if let Err(e) = sink.report(&outcome.report) {
                    tracing::warn!(error = ?e, "report sink failed");
                }
            }
            _ = &mut finish => break,
        }
    }

    let report = monitor.flush(Utc::now());
    if let Err(e) = sink.report(&report) {
        tracing::warn!(error = ?e, "report sink failed");
    }
    monitor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(section_url: &str) -> Sample {
        parser::parse_line(&format!(
            r#"10.0.0.7 - - [10/Oct/2000:13:55:36 -0700] "GET {section_url} HTTP/1.1" 200 512 "-" "test-agent""#
        ))
        .unwrap()
    }

    fn monitor(window_secs: u64, threshold: u64) -> TrafficMonitor {
        TrafficMonitor::new(MonitorConfig {
            tick_interval_secs: 10,
            alert_window_secs: window_secs,
            alert_threshold: threshold,
        })
        .unwrap()
    }

    fn tick_with(m: &mut TrafficMonitor, hits: u64) -> TickOutcome {
        let s = sample("/api/v1/items");
        for _ in 0..hits {
            m.ingest(&s);
        }
        m.tick(Utc::now())
    }

    #[test]
    fn refuses_bad_configuration() {
        let bad = MonitorConfig {
            tick_interval_secs: 10,
            alert_window_secs: 45,
            alert_threshold: 10,
        };
        assert!(TrafficMonitor::new(bad).is_err());
        let zero = MonitorConfig {
            tick_interval_secs: 0,
            ..MonitorConfig::default()
        };
        assert!(TrafficMonitor::new(zero).is_err());

        let huge_window = MonitorConfig {
            tick_interval_secs: 1,
            alert_window_secs: u64::MAX,
            alert_threshold: 10,
        };
        assert!(TrafficMonitor::new(huge_window).is_err());

        let huge_tick = MonitorConfig {
            tick_interval_secs: u64::MAX,
            alert_window_secs: u64::MAX,
            alert_threshold: 10,
        };
        assert!(TrafficMonitor::new(huge_tick).is_err());
    }

    #[test]
    fn warm_up_suppresses_alerts() {
        let mut m = monitor(40, 10);
        for hits in [500, 0, 900, 1200] {
            let out = tick_with(&mut m, hits);
            assert!(out.alert.is_none());
        }
        assert!(!m.is_alert_active());
        assert!(m.window().is_full());
    }

    #[test]
    fn trigger_and_recovery_cycle() {
        let mut m = monitor(40, 10);
        let mut events = Vec::new();
        let plan = std::iter::repeat(5)
            .take(10)
            .chain(std::iter::repeat(50).take(2))
            .chain(std::iter::repeat(5).take(18));
        for (i, hits) in plan.enumerate() {
            if let Some(ev) = tick_with(&mut m, hits).alert {
                events.push((i + 1, ev));
            }
        }

        assert_eq!(events.len(), 2, "{events:?}");
        let (at, high) = &events[0];
        assert_eq!(*at, 11);
        assert_eq!(high.state, AlertState::Triggered);
        assert_eq!(high.window_hits, 65);
        assert_eq!(high.average, 20.0);

        let (at, normal) = &events[1];
        assert_eq!(*at, 16);
        assert_eq!(normal.state, AlertState::Recovered);
        assert_eq!(normal.window_hits, 20);
        assert_eq!(normal.average, 50.0);
        assert!(!m.is_alert_active());
    }

    #[test]
    fn window_sum_matches_last_w_ticks() {
        let mut m = monitor(30, 1_000);
        let totals = [3u64, 0, 7, 12, 1, 9, 4, 4, 30];
        for &t in &totals {
            tick_with(&mut m, t);
        }
        let expected: u64 = totals[totals.len() - 3..].iter().sum();
        assert_eq!(m.window().window_sum(), expected);
        assert_eq!(m.cumulative().total_hits(), totals.iter().sum::<u64>());
        assert_eq!(m.ticks(), totals.len() as u64);
    }

    #[test]
    fn report_carries_cumulative_stats_and_top_section() {
        let mut m = monitor(20, 10);
        m.ingest(&sample("/a/b/c.html"));
        m.ingest(&sample("/a/b/d.html"));
        m.ingest(&sample("/x/y/z"));
        let out = m.tick(Utc::now());
        assert_eq!(out.drained.total_hits(), 3);
        assert_eq!(out.report.stats.total_hits, 3);
        assert_eq!(out.report.stats.most_popular_section.as_deref(), Some("/a/b/"));
        assert_eq!(out.report.window_hits, Some(3));

        let out = m.tick(Utc::now());
        assert_eq!(out.drained.total_hits(), 0);
        assert_eq!(out.report.stats.total_hits, 3);
    }

    #[test]
    fn flush_merges_without_touching_window() {
        let mut m = monitor(20, 10);
        tick_with(&mut m, 2);
        m.ingest(&sample("/late/one"));
        let report = m.flush(Utc::now());
        assert!(report.is_final);
        assert_eq!(report.window_hits, None);
        assert_eq!(m.cumulative().total_hits(), 3);
        assert_eq!(m.window().len(), 1);
        assert_eq!(m.draft_handle().pending_hits(), 0);
    }

    #[test]
    fn concurrent_ingest_and_ticks_lose_nothing() {
        let mut m = monitor(20, 10);
        let producers: Vec<_> = (0..4)
            .map(|i| {
                let handle = m.draft_handle();
                let s = sample(&format!("/p{i}/x/y"));
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        handle.ingest(&s);
                    }
                })
            })
            .collect();

        let mut seen = 0u64;
        while !producers.iter().all(|p| p.is_finished()) {
            seen += m.tick(Utc::now()).drained.total_hits();
        }
        for p in producers {
            p.join().unwrap();
        }
        seen += m.tick(Utc::now()).drained.total_hits();

        assert_eq!(seen, 20_000);
        assert_eq!(m.cumulative().total_hits(), 20_000);
        assert_eq!(m.cumulative().hits_for("/p2/x/"), 5_000);
    }

    #[test]
    fn independent_instances_do_not_share_state() {
        let a = monitor(20, 10);
        let b = monitor(20, 10);
        a.ingest(&sample("/a/b/c"));
        assert_eq!(a.draft_handle().pending_hits(), 1);
        assert_eq!(b.draft_handle().pending_hits(), 0);
    }

    #[test]
    fn timestamp_format() {
        use chrono::TimeZone;
        let t = Utc.with_ymd_and_hms(2025, 9, 6, 9, 5, 7).unwrap();
        assert_eq!(format_timestamp(t), "2025-09-06 09:05:07");
    }
}
