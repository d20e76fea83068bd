//! Per-test run histories, most recent first.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ingest::record::RunRecord;

/// All runs of one test, ordered most-recent-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestHistory {
    test_id: String,
    records: Vec<RunRecord>,
}

impl TestHistory {
    /// Build a history from records of a single test, in any order.
    pub fn new(test_id: impl Into<String>, mut records: Vec<RunRecord>) -> Self {
        records.sort_by(most_recent_first);
        Self {
            test_id: test_id.into(),
            records,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&RunRecord> {
        self.records.first()
    }

    /// Up to `n` most recent runs, still most-recent-first.
    pub fn recent(&self, n: usize) -> &[RunRecord] {
        &self.records[..n.min(self.records.len())]
    }
}

/// Group records by `test_id`. Histories come back sorted by test id.
pub fn group_histories(records: Vec<RunRecord>) -> Vec<TestHistory> {
    let mut groups: BTreeMap<String, Vec<RunRecord>> = BTreeMap::new();
    for rec in records {
        groups.entry(rec.test_id.clone()).or_default().push(rec);
    }
    groups
        .into_iter()
        .map(|(test_id, recs)| TestHistory::new(test_id, recs))
        .collect()
}

/// Newest `run_at` first, then highest `run_id`. Unparseable timestamps
/// sort as the oldest. The remaining fields only make the order total so
/// that any input permutation yields the same history.
fn most_recent_first(a: &RunRecord, b: &RunRecord) -> Ordering {
    b.timestamp()
        .cmp(&a.timestamp())
        .then_with(|| compare_run_ids(&b.run_id, &a.run_id))
        .then_with(|| b.run_at.cmp(&a.run_at))
        .then_with(|| a.status.cmp(&b.status))
        .then_with(|| a.retries.cmp(&b.retries))
        .then_with(|| a.duration_ms.cmp(&b.duration_ms))
        .then_with(|| a.title.cmp(&b.title))
}

/// Numeric when both ids are unsigned integers, lexicographic otherwise.
fn compare_run_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::Status;

    fn rec(test: &str, run_id: &str, run_at: &str, status: Status) -> RunRecord {
        RunRecord::new(test, run_id, run_at, status)
    }

    #[test]
    fn test_orders_most_recent_first() {
        let history = TestHistory::new(
            "t",
            vec![
                rec("t", "1", "2024-01-01T00:00:00Z", Status::Passed),
                rec("t", "3", "2024-01-03T00:00:00Z", Status::Failed),
                rec("t", "2", "2024-01-02T00:00:00Z", Status::Passed),
            ],
        );
        let ids: Vec<_> = history.records().iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, ["3", "2", "1"]);
        assert_eq!(history.latest().unwrap().status, Status::Failed);
    }

    #[test]
    fn test_timestamp_ties_break_on_numeric_run_id() {
        let at = "2024-01-01T00:00:00Z";
        let history = TestHistory::new(
            "t",
            vec![rec("t", "9", at, Status::Passed), rec("t", "10", at, Status::Failed)],
        );
        assert_eq!(history.latest().unwrap().run_id, "10");
    }

    #[test]
    fn test_timestamp_ties_break_lexicographically() {
        let at = "2024-01-01T00:00:00Z";
        let history = TestHistory::new(
            "t",
            vec![rec("t", "run-a", at, Status::Passed), rec("t", "run-b", at, Status::Failed)],
        );
        assert_eq!(history.latest().unwrap().run_id, "run-b");
    }

    #[test]
    fn test_unparseable_timestamps_sort_oldest() {
        let history = TestHistory::new(
            "t",
            vec![
                rec("t", "x", "not a date", Status::Failed),
                rec("t", "y", "2020-01-01T00:00:00Z", Status::Passed),
            ],
        );
        assert_eq!(history.latest().unwrap().run_id, "y");
    }

    #[test]
    fn test_group_by_test_id() {
        let histories = group_histories(vec![
            rec("b", "1", "2024-01-01T00:00:00Z", Status::Passed),
            rec("a", "1", "2024-01-01T00:00:00Z", Status::Passed),
            rec("b", "2", "2024-01-02T00:00:00Z", Status::Failed),
        ]);
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].test_id(), "a");
        assert_eq!(histories[0].len(), 1);
        assert_eq!(histories[1].test_id(), "b");
        assert_eq!(histories[1].len(), 2);
    }

    #[test]
    fn test_recent_window() {
        let records = (0..8)
            .map(|i| {
                let run_at = format!("2024-01-0{}T00:00:00Z", i + 1);
                rec("t", &i.to_string(), &run_at, Status::Passed)
            })
            .collect();
        let history = TestHistory::new("t", records);
        let window = history.recent(5);
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].run_id, "7");
        assert_eq!(history.recent(20).len(), 8);
    }

    #[test]
    fn test_permutations_give_same_history() {
        let base = vec![
            rec("t", "1", "2024-01-01T00:00:00Z", Status::Passed),
            rec("t", "2", "2024-01-01T00:00:00Z", Status::Failed),
            rec("t", "3", "bogus", Status::Skipped),
            rec("t", "3", "bogus", Status::Passed).with_retries(2),
            rec("t", "4", "2024-01-02T00:00:00Z", Status::Other),
        ];
        let expected = TestHistory::new("t", base.clone());

        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(TestHistory::new("t", reversed), expected);

        let mut rotated = base;
        rotated.rotate_left(2);
        assert_eq!(TestHistory::new("t", rotated), expected);
    }
}
