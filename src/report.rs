//! Per-tick output: status reports, alert events and the sinks that carry them.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::stats::StatsSnapshot;
use crate::window::AlertState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub state: AlertState,
    pub window_hits: u64,
    pub average: f64,
    pub timestamp: String,
}

impl AlertEvent {
    pub fn message(&self) -> String {
        match self.state {
            AlertState::Triggered => format!(
                "High traffic generated an alert - hits = {}, average = {:.2}, triggered at {}",
                self.window_hits, self.average, self.timestamp
            ),
            AlertState::Recovered => format!(
                "Traffic back to normal - hits = {}, average = {:.2}, recovered at {}",
                self.window_hits, self.average, self.timestamp
            ),
        }
    }
}

/// Cumulative stats as of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub timestamp: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// `None` on the final flush, which does not touch the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_hits: Option<u64>,
    #[serde(rename = "final", skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

/// Where tick output goes. Called only from the tick activity.
pub trait ReportSink: Send {
    fn alert(&mut self, event: &AlertEvent) -> Result<()>;
    fn report(&mut self, report: &TickReport) -> Result<()>;
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn alert(&mut self, event: &AlertEvent) -> Result<()> {
        (**self).alert(event)
    }

    fn report(&mut self, report: &TickReport) -> Result<()> {
        (**self).report(report)
    }
}

/// Emits structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn alert(&mut self, event: &AlertEvent) -> Result<()> {
        match event.state {
            AlertState::Triggered => tracing::warn!(
                target: "alert",
                window_hits = event.window_hits,
                average = event.average,
                at = %event.timestamp,
                "{}",
                event.message()
            ),
            AlertState::Recovered => tracing::info!(
                target: "alert",
                window_hits = event.window_hits,
                average = event.average,
                at = %event.timestamp,
                "{}",
                event.message()
            ),
        }
        Ok(())
    }

    fn report(&mut self, report: &TickReport) -> Result<()> {
        tracing::info!(
            target: "report",
            at = %report.timestamp,
            total_hits = report.stats.total_hits,
            sections = report.stats.section_hits.len(),
            top_section = report.stats.most_popular_section.as_deref().unwrap_or("-"),
            window_hits = ?report.window_hits,
            is_final = report.is_final,
            "traffic report"
        );
        Ok(())
    }
}

/// Writes one JSON object per line: `{"alert": {...}}` or `{"report": {...}}`.
pub struct JsonLinesSink<W> {
    out: W,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Line<'a> {
    Alert(&'a AlertEvent),
    Report(&'a TickReport),
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &Line<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, line).context("encode report line")?;
        self.out.write_all(b"\n").context("write report line")?;
        self.out.flush().context("flush report sink")?;
        Ok(())
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn alert(&mut self, event: &AlertEvent) -> Result<()> {
        self.write_line(&Line::Alert(event))
    }

    fn report(&mut self, report: &TickReport) -> Result<()> {
        self.write_line(&Line::Report(report))
    }
}
