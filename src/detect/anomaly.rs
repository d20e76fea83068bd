use crate::detect::DetectError;

/// Minimum samples for spread statistics.
pub const MIN_SAMPLES: usize = 2;

/// Run durations of a recent window, in milliseconds.
pub struct DurationWindow {
    values: Vec<f64>,
}

impl DurationWindow {
    pub fn new(durations_ms: impl IntoIterator<Item = u64>) -> Self {
        Self {
            values: durations_ms.into_iter().map(|d| d as f64).collect(),
        }
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn median(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        if self.values.len() < MIN_SAMPLES {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / (self.values.len() - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// max / median. A zero median gives infinity when any run took time,
    /// zero otherwise.
    pub fn spike_ratio(&self) -> Result<f64, DetectError> {
        self.require_samples()?;
        Ok(guarded_ratio(self.max(), self.median(), self.max()))
    }

    /// Coefficient of variation, stdev / mean, with the same zero policy
    /// as [`DurationWindow::spike_ratio`].
    pub fn variation(&self) -> Result<f64, DetectError> {
        self.require_samples()?;
        Ok(guarded_ratio(self.std_dev(), self.mean(), self.max()))
    }

    fn require_samples(&self) -> Result<(), DetectError> {
        if self.values.len() < MIN_SAMPLES {
            return Err(DetectError::InsufficientWindow {
                needed: MIN_SAMPLES,
                have: self.values.len(),
            });
        }
        Ok(())
    }
}

fn guarded_ratio(numerator: f64, denominator: f64, max: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else if max > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}
