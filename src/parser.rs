//! # Line Parser
//! Turns one raw combined-format access log line into a [`Sample`].
//!
//! Stateless: the compiled pattern lives in a process-wide `OnceCell`, so
//! `parse_line` can be called from any thread without coordination.

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::telemetry;

/// `IP IDENT USER [TIMESTAMP] "REQUEST" STATUS BYTES "REFERER" "USER-AGENT"`
const LINE_PATTERN: &str = r#"^(\S+) (\S+) (\S+) \[([\w:/]+\s[+\-]\d{4})\] "(.+?)" (\d{3}) (\d+|-) "([^"]*)" "([^"]*)""#;

/// Longest chunk of an offending line we echo into the logs.
const LOG_LINE_CAP: usize = 200;

/// One parsed access log entry. Created per line and consumed right away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub ip: String,
    /// Original log timecode, kept verbatim.
    pub timestamp: String,
    /// Raw `METHOD PATH PROTOCOL`.
    pub request_line: String,
    pub status_code: u16,
    pub bytes_sent: u64,
    pub referer: String,
    pub user_agent: String,
    pub request_url: String,
    pub section: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not match the combined access log format")]
    NoMatch,
    #[error("request line has no URL: {0:?}")]
    MissingUrl(String),
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

fn line_regex() -> &'static Regex {
    static RE_LINE: OnceCell<Regex> = OnceCell::new();
    RE_LINE.get_or_init(|| Regex::new(LINE_PATTERN).expect("access log pattern compiles"))
}

/// Parse a line, returning why it was rejected.
pub fn parse_line(line: &str) -> Result<Sample, ParseError> {
    let caps = line_regex().captures(line).ok_or(ParseError::NoMatch)?;
    let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());

    let request_line = group(5);
    let request_url = request_line
        .split(' ')
        .nth(1)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ParseError::MissingUrl(request_line.to_string()))?
        .to_string();

    let status_code = group(6)
        .parse::<u16>()
        .map_err(|_| ParseError::InvalidNumber {
            field: "status",
            value: group(6).to_string(),
        })?;

    // Apache logs "-" when no body was sent.
    let bytes_sent = match group(7) {
        "-" => 0,
        raw => raw.parse::<u64>().map_err(|_| ParseError::InvalidNumber {
            field: "bytes",
            value: raw.to_string(),
        })?,
    };

    Ok(Sample {
        ip: group(1).to_string(),
        timestamp: group(4).to_string(),
        request_line: request_line.to_string(),
        status_code,
        bytes_sent,
        referer: group(8).to_string(),
        user_agent: group(9).to_string(),
        section: section_of(&request_url).to_string(),
        request_url,
    })
}

/// Parse a line for the ingestion path: failures are logged, counted and
/// turned into `None` so the caller just skips the line.
pub fn parse(line: &str) -> Option<Sample> {
    telemetry::ensure_metrics_described();
    match parse_line(line) {
        Ok(sample) => Some(sample),
        Err(e) => {
            counter!(telemetry::PARSE_ERRORS_TOTAL).increment(1);
            tracing::warn!(error = %e, line = %truncate(line, LOG_LINE_CAP), "skipping unparseable line");
            None
        }
    }
}

/// Section key of a request URL.
///
/// - `/a/b/c.html` → `/a/b/` (first two path components)
/// - `/a/b` → `/a/`
/// - `/onlyone`, `/` → `/`
///
/// Pure prefix extraction; no decoding or normalization.
pub fn section_of(url: &str) -> &str {
    let mut slashes = url.match_indices('/').map(|(i, _)| i);
    let _root = slashes.next();
    let second = slashes.next();
    let third = slashes.next();

    match (second, third) {
        (_, Some(end)) | (Some(end), None) => &url[..=end],
        (None, None) => "/",
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
