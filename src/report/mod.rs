//! Output rows for the flaky overview ledger.

pub mod ledger;

use std::borrow::Cow;

use crate::detect::ScoredTest;

/// Column names, in output order.
pub const HEADERS: [&str; 9] = [
    "run_at",
    "run_id",
    "title",
    "status",
    "retries",
    "duration_ms",
    "trend_last5",
    "is_flaky",
    "reasons",
];

pub const DELIMITER: char = ',';

/// One rendered ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub run_at: String,
    pub run_id: String,
    pub title: String,
    pub status: String,
    pub retries: String,
    pub duration_ms: String,
    pub trend_last5: String,
    pub is_flaky: String,
    pub reasons: String,
}

impl OutputRow {
    pub fn from_scored(scored: &ScoredTest, reason_separator: &str) -> Self {
        Self {
            run_at: scored.run_at.clone(),
            run_id: scored.run_id.clone(),
            title: scored.title.clone(),
            status: scored.status.to_string(),
            retries: scored.retries.to_string(),
            duration_ms: scored.duration_ms.to_string(),
            trend_last5: scored.trend_last5.clone(),
            is_flaky: if scored.is_flaky { "yes" } else { "no" }.to_string(),
            reasons: scored.reasons_text(reason_separator),
        }
    }

    /// Cells in [`HEADERS`] order.
    pub fn fields(&self) -> [&str; 9] {
        [
            self.run_at.as_str(),
            self.run_id.as_str(),
            self.title.as_str(),
            self.status.as_str(),
            self.retries.as_str(),
            self.duration_ms.as_str(),
            self.trend_last5.as_str(),
            self.is_flaky.as_str(),
            self.reasons.as_str(),
        ]
    }

    /// The row as one delimited line, newline included.
    pub fn to_line(&self) -> String {
        join_line(self.fields())
    }
}

/// The header as one delimited line, newline included.
pub fn header_line() -> String {
    join_line(HEADERS)
}

fn join_line<'a>(cells: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = String::new();
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        line.push_str(&escape_field(cell));
    }
    line.push('\n');
    line
}

/// Quote a field when it holds the delimiter, a quote or a line break;
/// embedded quotes are doubled.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([DELIMITER, '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Split one line produced by [`OutputRow::to_line`] back into cells.
pub fn split_line(line: &str) -> Vec<String> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            (true, '"') => quoted = false,
            (false, '"') if cell.is_empty() => quoted = true,
            (false, c) if c == DELIMITER => cells.push(std::mem::take(&mut cell)),
            (_, c) => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}
