//! TOML configuration for flakeradar.
//!
//! Every section is optional and falls back to compiled-in defaults. The
//! config file is taken from `--config` / `FLAKERADAR_CONFIG` when given,
//! otherwise from `./flakeradar.toml` if it exists. A config file that
//! fails to load or validate is fatal.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detect::TrendStyle;

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "flakeradar.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlakeRadarConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlakeRadarConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path wins, then a local `flakeradar.toml`. Whichever file
    /// is picked must load; a broken one is an error, never silently
    /// replaced by defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject values the scorer cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        if s.window == 0 {
            bail!("scoring.window must be at least 1");
        }
        if s.fail_threshold == 0 {
            bail!("scoring.fail_threshold must be at least 1");
        }
        if s.flaky_score == 0 {
            bail!("scoring.flaky_score must be at least 1");
        }
        if !(s.spike_factor.is_finite() && s.spike_factor > 0.0) {
            bail!("scoring.spike_factor must be a positive number");
        }
        if !(s.variation_threshold.is_finite() && s.variation_threshold > 0.0) {
            bail!("scoring.variation_threshold must be a positive number");
        }
        if self.output.reason_separator.is_empty() {
            bail!("output.reason_separator must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Rule thresholds. Rule weights are fixed and not configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Number of most recent runs used for the trend, R1 and R4.
    pub window: usize,
    /// R1 triggers at this many failures inside the window.
    pub fail_threshold: usize,
    /// R3 triggers when the latest pass needed more retries than this.
    pub retry_threshold: u32,
    /// R4 max/median trigger.
    pub spike_factor: f64,
    /// R4 stdev/mean trigger.
    pub variation_threshold: f64,
    /// Score at or above which a test is flaky.
    pub flaky_score: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window: 5,
            fail_threshold: 2,
            retry_threshold: 1,
            spike_factor: 5.0,
            variation_threshold: 0.6,
            flaky_score: 40,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Presentation of the output ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Joins reason labels inside the `reasons` column.
    pub reason_separator: String,
    pub trend_style: TrendStyle,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reason_separator: "; ".to_string(),
            trend_style: TrendStyle::Letters,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON log lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
