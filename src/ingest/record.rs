//! Typed run records and the parse-or-default boundary for loose export JSON.
//!
//! Everything downstream of [`from_attributes`] works on [`RunRecord`] and
//! never sees the untyped document again.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

const RUN_AT_KEYS: &[&str] = &["created-at", "created_at", "run_at"];
const RUN_ID_KEYS: &[&str] = &["run-id", "run_id"];
const TEST_ID_KEYS: &[&str] = &["test-id", "test_id"];
const DURATION_KEYS: &[&str] = &["run-time", "duration_ms", "duration"];

/// Final outcome of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    Other,
}

impl Status {
    /// Case-insensitive parse. Anything unrecognised is `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" => Status::Passed,
            "failed" => Status::Failed,
            "skipped" => Status::Skipped,
            _ => Status::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Other => "other",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of one test within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub test_id: String,
    pub title: String,
    pub run_id: String,
    /// Timestamp exactly as exported. Parsed on demand by [`RunRecord::timestamp`].
    pub run_at: String,
    pub status: Status,
    pub retries: u32,
    pub duration_ms: u64,
}

impl RunRecord {
    /// Create a record with zero retries and zero duration. The title
    /// defaults to the test id.
    pub fn new(
        test_id: impl Into<String>,
        run_id: impl Into<String>,
        run_at: impl Into<String>,
        status: Status,
    ) -> Self {
        let test_id = test_id.into();
        Self {
            title: test_id.clone(),
            test_id,
            run_id: run_id.into(),
            run_at: run_at.into(),
            status,
            retries: 0,
            duration_ms: 0,
        }
    }

    /// Builder-style setter for `title`.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder-style setter for `retries`.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Builder-style setter for `duration_ms`.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Parsed `run_at`, or `None` when the exported value is not a
    /// recognisable ISO 8601 timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.run_at)
    }
}

/// Parse RFC 3339 (`Z` or offset), falling back to offset-less ISO forms
/// which are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Convert one untyped attribute object into a [`RunRecord`].
///
/// Numeric fields that are missing or unparseable become `0`; unknown
/// statuses become [`Status::Other`]. Returns `None` only when no test
/// identity can be found (`test-id`/`test_id`, else a non-blank `title`).
pub fn from_attributes(attrs: &Map<String, Value>) -> Option<RunRecord> {
    let title = first_text(attrs, &["title"]).unwrap_or_default();
    let test_id = first_text(attrs, TEST_ID_KEYS).or_else(|| {
        if title.is_empty() {
            None
        } else {
            Some(title.clone())
        }
    })?;

    let run_at = first_text(attrs, RUN_AT_KEYS).unwrap_or_default();
    let run_id = first_text(attrs, RUN_ID_KEYS).unwrap_or_else(|| run_at.clone());
    let status = attrs
        .get("status")
        .and_then(Value::as_str)
        .map(Status::parse)
        .unwrap_or(Status::Other);
    let retries = attrs
        .get("retries")
        .and_then(as_count)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0);
    let duration_ms = DURATION_KEYS
        .iter()
        .filter_map(|key| attrs.get(*key))
        .find(|v| !is_blank(v))
        .and_then(as_count)
        .unwrap_or(0);

    Some(RunRecord {
        test_id,
        title,
        run_id,
        run_at,
        status,
        retries,
        duration_ms,
    })
}

/// First key holding a non-blank string or a number, trimmed.
fn first_text(attrs: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match attrs.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Non-negative integer from a JSON number or numeric string.
/// Fractions truncate, negatives clamp to zero, everything else is `None`.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.max(0.0) as u64)
            })
        }
        _ => None,
    }
}
