//! Flaky-test detection: history normalization, duration statistics and rule scoring.

pub mod anomaly;
pub mod engine;
pub mod history;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::record::Status;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("insufficient duration samples: need {needed}, have {have}")]
    InsufficientWindow { needed: usize, have: usize },
}

/// Rules that can mark a test as flaky. Declaration order is reason order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
    /// R1: repeated failures inside the recent window. Forces a flaky verdict.
    FailureFrequency,
    /// R3: latest run passed, but only after several retries.
    RetryMaskedPass,
    /// R4: run time swings widely across the recent window.
    DurationInstability,
}

impl Rule {
    /// Short label written to the `reasons` column.
    pub const fn label(self) -> &'static str {
        match self {
            Rule::FailureFrequency => ">1 fail in last5",
            Rule::RetryMaskedPass => ">1 retry to pass",
            Rule::DurationInstability => "duration instability",
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How outcomes are drawn in the trend column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStyle {
    /// `P`, `F`, `S`, `O`.
    #[default]
    Letters,
    /// Check mark, cross, and a skip glyph for everything else.
    Symbols,
}

impl TrendStyle {
    pub const fn marker(self, status: Status) -> char {
        match (self, status) {
            (TrendStyle::Letters, Status::Passed) => 'P',
            (TrendStyle::Letters, Status::Failed) => 'F',
            (TrendStyle::Letters, Status::Skipped) => 'S',
            (TrendStyle::Letters, Status::Other) => 'O',
            (TrendStyle::Symbols, Status::Passed) => '✅',
            (TrendStyle::Symbols, Status::Failed) => '❌',
            (TrendStyle::Symbols, _) => '⏭',
        }
    }
}

/// Scoring result for one test, carrying its latest run's descriptive fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredTest {
    pub test_id: String,
    pub run_at: String,
    pub run_id: String,
    pub title: String,
    pub status: Status,
    pub retries: u32,
    pub duration_ms: u64,
    pub trend_last5: String,
    pub score: u32,
    pub is_flaky: bool,
    /// Triggered rules in R1, R3, R4 order.
    pub reasons: Vec<Rule>,
}

impl ScoredTest {
    /// Reason labels joined with `separator`.
    pub fn reasons_text(&self, separator: &str) -> String {
        self.reasons
            .iter()
            .map(|r| r.label())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_order_is_reason_order() {
        let mut rules = vec![
            Rule::DurationInstability,
            Rule::FailureFrequency,
            Rule::RetryMaskedPass,
        ];
        rules.sort();
        let labels: Vec<_> = rules.iter().map(|r| r.label()).collect();
        assert_eq!(
            labels,
            [">1 fail in last5", ">1 retry to pass", "duration instability"]
        );
    }

    #[test]
    fn test_trend_markers() {
        assert_eq!(TrendStyle::Letters.marker(Status::Failed), 'F');
        assert_eq!(TrendStyle::Symbols.marker(Status::Skipped), '⏭');
        assert_eq!(TrendStyle::Symbols.marker(Status::Other), '⏭');
    }
}
