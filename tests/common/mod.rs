// tests/common/mod.rs
// Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use access_log_monitor::{AlertEvent, ReportSink, TickReport};

pub fn access_line(ip: &str, url: &str) -> String {
    format!(
        r#"{ip} - - [09/May/2018:16:00:39 +0000] "GET {url} HTTP/1.0" 200 123 "http://example.com/" "Mozilla/5.0""#
    )
}

/// Sink that keeps everything it was handed; clones share the same buffers.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub alerts: Arc<Mutex<Vec<AlertEvent>>>,
    pub reports: Arc<Mutex<Vec<TickReport>>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<TickReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.alerts.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn alert(&mut self, event: &AlertEvent) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn report(&mut self, report: &TickReport) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}
