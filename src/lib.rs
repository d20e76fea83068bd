//! flakeradar -- flaky-test detection over exported test-run history.
//!
//! The pipeline is load -> normalize -> score -> emit. Loading and writing
//! are async file I/O; normalization and scoring are pure and synchronous.

pub mod config;
pub mod detect;
pub mod ingest;
pub mod report;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use config::OutputConfig;
use detect::engine::FlakeEngine;
use detect::history::group_histories;
use ingest::record::{parse_timestamp, RunRecord};
use report::ledger::RowSink;
use report::OutputRow;

/// Pipeline stage, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Load,
    Merge,
    Write,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Config => write!(f, "config"),
            Stage::Load => write!(f, "load"),
            Stage::Merge => write!(f, "merge"),
            Stage::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source:#}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Counts reported after a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub tests_scored: usize,
    pub tests_flaky: usize,
    pub records_dropped: usize,
    pub rows_written: usize,
}

impl ScanSummary {
    pub fn merge(&mut self, other: &ScanSummary) {
        self.tests_scored += other.tests_scored;
        self.tests_flaky += other.tests_flaky;
        self.records_dropped += other.records_dropped;
        self.rows_written += other.rows_written;
    }
}

impl std::fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scored {} tests, {} flaky ({} records dropped)",
            self.tests_scored, self.tests_flaky, self.records_dropped
        )
    }
}

/// Rows scored from one input, not yet written.
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub source: PathBuf,
    pub rows: Vec<OutputRow>,
    pub summary: ScanSummary,
}

/// Normalize and score records, producing one row per distinct test.
///
/// Rows are ordered by their latest run (oldest first), then by test id,
/// so identical input always yields identical output.
pub fn score_records(
    records: Vec<RunRecord>,
    engine: &FlakeEngine,
    output: &OutputConfig,
) -> (Vec<OutputRow>, ScanSummary) {
    let histories = group_histories(records);
    let mut scored = engine.score_all(&histories);
    scored.sort_by(|a, b| {
        parse_timestamp(&a.run_at)
            .cmp(&parse_timestamp(&b.run_at))
            .then_with(|| a.test_id.cmp(&b.test_id))
    });

    let summary = ScanSummary {
        tests_scored: scored.len(),
        tests_flaky: scored.iter().filter(|s| s.is_flaky).count(),
        ..ScanSummary::default()
    };
    let rows = scored
        .iter()
        .map(|s| OutputRow::from_scored(s, &output.reason_separator))
        .collect();
    (rows, summary)
}

/// Load one export and score it entirely in memory.
pub async fn score_file(
    path: &Path,
    engine: &FlakeEngine,
    output: &OutputConfig,
) -> Result<ScoredBatch, PipelineError> {
    let batch = ingest::load_records(path)
        .await
        .map_err(|e| PipelineError::new(Stage::Load, e))?;
    info!(path = %path.display(), records = batch.records.len(), "loaded export");

    let (rows, mut summary) = score_records(batch.records, engine, output);
    summary.records_dropped = batch.dropped;
    info!(
        path = %path.display(),
        tests = summary.tests_scored,
        flaky = summary.tests_flaky,
        dropped = summary.records_dropped,
        "scored export"
    );

    Ok(ScoredBatch {
        source: path.to_path_buf(),
        rows,
        summary,
    })
}

/// Append scored batches to `sink` in order. Returns the combined summary.
pub async fn write_batches(
    batches: &[ScoredBatch],
    sink: &dyn RowSink,
) -> Result<ScanSummary, PipelineError> {
    let mut total = ScanSummary::default();
    for batch in batches {
        let written = sink
            .append(&batch.rows)
            .await
            .map_err(|e| PipelineError::new(Stage::Write, e))?;
        let mut summary = batch.summary;
        summary.rows_written = written;
        info!(source = %batch.source.display(), rows = written, "rows appended");
        total.merge(&summary);
    }
    Ok(total)
}

/// Score every input first, then append all of them to `sink`.
///
/// A load failure in any input aborts before anything is written.
pub async fn scan(
    inputs: &[PathBuf],
    engine: &FlakeEngine,
    output: &OutputConfig,
    sink: &dyn RowSink,
) -> Result<ScanSummary, PipelineError> {
    let batches = score_inputs(inputs, engine, output).await?;
    write_batches(&batches, sink).await
}

/// Score every input, in order.
pub async fn score_inputs(
    inputs: &[PathBuf],
    engine: &FlakeEngine,
    output: &OutputConfig,
) -> Result<Vec<ScoredBatch>, PipelineError> {
    let mut batches = Vec::with_capacity(inputs.len());
    for path in inputs {
        batches.push(score_file(path, engine, output).await?);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::Status;
    use crate::report::ledger::MemorySink;

    fn rec(test: &str, run: u32, status: Status) -> RunRecord {
        RunRecord::new(test, run.to_string(), format!("2024-02-{:02}T08:00:00Z", run), status)
            .with_title(format!("{test} title"))
            .with_duration_ms(200)
    }

    fn sample() -> Vec<RunRecord> {
        vec![
            rec("login", 1, Status::Passed),
            rec("login", 2, Status::Failed),
            rec("login", 3, Status::Passed),
            rec("login", 4, Status::Failed),
            rec("search", 1, Status::Passed),
            rec("search", 2, Status::Passed).with_retries(2),
            rec("export", 3, Status::Skipped),
            rec("export", 1, Status::Failed),
        ]
    }

    #[test]
    fn test_one_row_per_test() {
        let (rows, summary) =
            score_records(sample(), &FlakeEngine::default(), &OutputConfig::default());
        assert_eq!(rows.len(), 3);
        assert_eq!(summary.tests_scored, 3);
        assert_eq!(summary.tests_flaky, 1);

        let login = rows.iter().find(|r| r.title == "login title").unwrap();
        assert_eq!(login.is_flaky, "yes");
        assert_eq!(login.trend_last5, "PFPF");
        assert_eq!(login.run_id, "4");

        let search = rows.iter().find(|r| r.title == "search title").unwrap();
        assert_eq!(search.is_flaky, "no");
        assert_eq!(search.reasons, ">1 retry to pass");
    }

    #[test]
    fn test_rows_ordered_by_latest_run() {
        let (rows, _) = score_records(sample(), &FlakeEngine::default(), &OutputConfig::default());
        let ids: Vec<_> = rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, ["2", "3", "4"]);
    }

    #[test]
    fn test_shuffled_input_gives_identical_rows() {
        let engine = FlakeEngine::default();
        let output = OutputConfig::default();
        let (expected, _) = score_records(sample(), &engine, &output);

        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(score_records(reversed, &engine, &output).0, expected);

        for shift in 1..sample().len() {
            let mut rotated = sample();
            rotated.rotate_left(shift);
            assert_eq!(score_records(rotated, &engine, &output).0, expected);
        }
    }

    #[test]
    fn test_rescoring_is_byte_identical() {
        let engine = FlakeEngine::default();
        let output = OutputConfig::default();
        let render = |rows: Vec<OutputRow>| rows.iter().map(OutputRow::to_line).collect::<String>();
        let first = render(score_records(sample(), &engine, &output).0);
        let second = render(score_records(sample(), &engine, &output).0);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scan_writes_all_batches() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(
            &a,
            r#"{"data": [
                {"attributes": {"test-id": "t1", "title": "one", "status": "failed",
                                "created-at": "2024-01-01T00:00:00Z"}},
                {"attributes": {"test-id": "t1", "title": "one", "status": "failed",
                                "created-at": "2024-01-02T00:00:00Z"}},
                {"attributes": {"title": "   ", "status": "passed"}}
            ]}"#,
        )
        .unwrap();
        std::fs::write(&b, r#"[{"title": "two", "status": "passed"}]"#).unwrap();

        let sink = MemorySink::new();
        let summary = scan(
            &[a, b],
            &FlakeEngine::default(),
            &OutputConfig::default(),
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            ScanSummary {
                tests_scored: 2,
                tests_flaky: 1,
                records_dropped: 1,
                rows_written: 2,
            }
        );
        let rows = sink.rows().await;
        assert_eq!(rows[0].title, "one");
        assert_eq!(rows[1].title, "two");
        assert_eq!(summary.to_string(), "scored 2 tests, 1 flaky (1 records dropped)");
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["rows_written"], 2);
        assert_eq!(json["records_dropped"], 1);
    }

    #[tokio::test]
    async fn test_load_failure_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"[{"title": "x", "status": "passed"}]"#).unwrap();
        let missing = dir.path().join("missing.json");

        let sink = MemorySink::new();
        let err = scan(
            &[good, missing],
            &FlakeEngine::default(),
            &OutputConfig::default(),
            &sink,
        )
        .await
        .unwrap_err();

        assert_eq!(err.stage, Stage::Load);
        assert!(err.to_string().starts_with("load stage failed"));
        assert!(sink.rows().await.is_empty());
    }
}
