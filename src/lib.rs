// src/lib.rs
// Public library surface for the binary, integration tests and embedding.

pub mod config;
pub mod monitor;
pub mod parser;
pub mod report;
pub mod source;
pub mod stats;
pub mod telemetry;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, MonitorConfig, ReportFormat};
pub use crate::monitor::{run, DraftHandle, TickOutcome, TrafficMonitor};
pub use crate::parser::{parse, parse_line, ParseError, Sample};
pub use crate::report::{AlertEvent, JsonLinesSink, ReportSink, TickReport, TracingSink};
pub use crate::source::{ChannelSource, LineSource, TailFile};
pub use crate::stats::{AccessStats, StatsSnapshot};
pub use crate::window::{AlertState, SlidingAlertWindow};
