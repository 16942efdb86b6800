//! Metric names shared by the ingestion and tick paths.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub const LINES_TOTAL: &str = "monitor_lines_total";
pub const PARSE_ERRORS_TOTAL: &str = "monitor_parse_errors_total";
pub const SAMPLES_TOTAL: &str = "monitor_samples_total";
pub const TICKS_TOTAL: &str = "monitor_ticks_total";
pub const ALERTS_TOTAL: &str = "monitor_alerts_total";
pub const WINDOW_HITS: &str = "monitor_window_hits";
pub const ALERT_ACTIVE: &str = "monitor_alert_active";

/// One-time metrics registration (so series show up in exporters).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(LINES_TOTAL, "Raw lines read from the log source.");
        describe_counter!(
            PARSE_ERRORS_TOTAL,
            "Lines skipped because they did not parse."
        );
        describe_counter!(SAMPLES_TOTAL, "Parsed samples ingested into the draft stats.");
        describe_counter!(TICKS_TOTAL, "Completed tick rotations.");
        describe_counter!(ALERTS_TOTAL, "Alert transitions, labelled by state.");
        describe_gauge!(WINDOW_HITS, "Hits in the current alert window.");
        describe_gauge!(ALERT_ACTIVE, "1 while the high-traffic alert is active.");
    });
}
