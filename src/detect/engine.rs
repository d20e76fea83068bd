use tracing::debug;

use crate::config::ScoringConfig;
use crate::detect::anomaly::DurationWindow;
use crate::detect::history::TestHistory;
use crate::detect::{Rule, ScoredTest, TrendStyle};
use crate::ingest::record::{RunRecord, Status};

/// Points a scoring rule adds when it triggers.
pub const RULE_POINTS: u32 = 20;

/// A triggered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finding {
    pub rule: Rule,
    pub points: u32,
    /// Flaky regardless of the accumulated score.
    pub forces_flaky: bool,
}

/// One flaky-test rule evaluated against a whole history.
pub trait FlakeRule: Send + Sync {
    fn evaluate(&self, history: &TestHistory) -> Option<Finding>;
}

/// R1: at least `threshold` failures among the `window` most recent runs.
pub struct FailureFrequency {
    pub window: usize,
    pub threshold: usize,
}

impl FlakeRule for FailureFrequency {
    fn evaluate(&self, history: &TestHistory) -> Option<Finding> {
        let fails = history
            .recent(self.window)
            .iter()
            .filter(|r| r.status == Status::Failed)
            .count();
        (fails >= self.threshold).then_some(Finding {
            rule: Rule::FailureFrequency,
            points: 0,
            forces_flaky: true,
        })
    }
}

/// R3: the latest run passed, but needed more than `retry_threshold` retries.
pub struct RetryMaskedPass {
    pub retry_threshold: u32,
}

impl FlakeRule for RetryMaskedPass {
    fn evaluate(&self, history: &TestHistory) -> Option<Finding> {
        let latest = history.latest()?;
        (latest.status == Status::Passed && latest.retries > self.retry_threshold).then_some(
            Finding {
                rule: Rule::RetryMaskedPass,
                points: RULE_POINTS,
                forces_flaky: false,
            },
        )
    }
}

/// R4: durations in the window spike (max/median) or spread (stdev/mean).
pub struct DurationInstability {
    pub window: usize,
    pub spike_factor: f64,
    pub variation_threshold: f64,
}

impl FlakeRule for DurationInstability {
    fn evaluate(&self, history: &TestHistory) -> Option<Finding> {
        let durations = DurationWindow::new(
            history
                .recent(self.window)
                .iter()
                .map(|r| r.duration_ms),
        );
        // Fewer than two samples: nothing to compare against.
        let spike = durations.spike_ratio().ok()?;
        let variation = durations.variation().ok()?;

        if spike >= self.spike_factor || variation >= self.variation_threshold {
            debug!(
                test_id = history.test_id(),
                spike,
                variation,
                "duration instability"
            );
            Some(Finding {
                rule: Rule::DurationInstability,
                points: RULE_POINTS,
                forces_flaky: false,
            })
        } else {
            None
        }
    }
}

/// Applies an ordered rule set to test histories.
pub struct FlakeEngine {
    rules: Vec<Box<dyn FlakeRule>>,
    window: usize,
    flaky_score: u32,
    trend_style: TrendStyle,
}

impl FlakeEngine {
    /// Engine with the standard R1, R3, R4 rule set.
    pub fn new(scoring: &ScoringConfig, trend_style: TrendStyle) -> Self {
        let rules: Vec<Box<dyn FlakeRule>> = vec![
            Box::new(FailureFrequency {
                window: scoring.window,
                threshold: scoring.fail_threshold,
            }),
            Box::new(RetryMaskedPass {
                retry_threshold: scoring.retry_threshold,
            }),
            Box::new(DurationInstability {
                window: scoring.window,
                spike_factor: scoring.spike_factor,
                variation_threshold: scoring.variation_threshold,
            }),
        ];
        Self::with_rules(rules, scoring.window, scoring.flaky_score, trend_style)
    }

    pub fn with_rules(
        rules: Vec<Box<dyn FlakeRule>>,
        window: usize,
        flaky_score: u32,
        trend_style: TrendStyle,
    ) -> Self {
        Self {
            rules,
            window,
            flaky_score,
            trend_style,
        }
    }

    /// Score one history. `None` only for an empty history.
    pub fn score(&self, history: &TestHistory) -> Option<ScoredTest> {
        let latest = history.latest()?;

        let mut findings: Vec<Finding> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(history))
            .collect();
        findings.sort_by_key(|f| f.rule);
        findings.dedup_by_key(|f| f.rule);

        let score = findings.iter().map(|f| f.points).sum::<u32>();
        let forced = findings.iter().any(|f| f.forces_flaky);

        Some(ScoredTest {
            test_id: history.test_id().to_string(),
            run_at: latest.run_at.clone(),
            run_id: latest.run_id.clone(),
            title: latest.title.clone(),
            status: latest.status,
            retries: latest.retries,
            duration_ms: latest.duration_ms,
            trend_last5: trend(history.recent(self.window), self.trend_style),
            score,
            is_flaky: forced || score >= self.flaky_score,
            reasons: findings.into_iter().map(|f| f.rule).collect(),
        })
    }

    pub fn score_all(&self, histories: &[TestHistory]) -> Vec<ScoredTest> {
        histories.iter().filter_map(|h| self.score(h)).collect()
    }
}

impl Default for FlakeEngine {
    fn default() -> Self {
        Self::new(&ScoringConfig::default(), TrendStyle::default())
    }
}

/// Render a most-recent-first window oldest to newest, one marker per run.
pub fn trend(window: &[RunRecord], style: TrendStyle) -> String {
    window.iter().rev().map(|r| style.marker(r.status)).collect()
}
