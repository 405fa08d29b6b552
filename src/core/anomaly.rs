use crate::io::RunLogger;
use crate::types::{ChangeError, ChangeResult, Grid, SpectralIndex};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Temporal anomaly parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    /// Index whose history is analysed
    pub index: SpectralIndex,
    /// Stabilizer added to the per-pixel standard deviation
    pub epsilon: f64,
    /// Minimum number of historical years
    pub min_history: usize,
    /// |Z| above which an anomaly is counted as strong
    pub strong_threshold: f64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            index: SpectralIndex::Ndvi,
            epsilon: 1e-6,
            min_history: 2,
            strong_threshold: 2.0,
        }
    }
}

/// Counts of strong anomalies among valid pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnomalySummary {
    /// Pixels with a finite target value
    pub valid_pixels: usize,
    pub strong_positive: usize,
    pub strong_negative: usize,
}

/// Per-pixel NaN-ignoring mean and population standard deviation of a stack.
///
/// Pixels without any finite value get NaN in both outputs.
pub fn history_statistics(history: &[&Grid]) -> ChangeResult<(Grid, Grid)> {
    let shape = history
        .first()
        .map(|g| g.dim())
        .ok_or_else(|| ChangeError::Processing("Empty history stack".to_string()))?;
    if let Some(bad) = history.iter().find(|g| g.dim() != shape) {
        return Err(ChangeError::Processing(format!(
            "History grid has shape {:?}, expected {:?}",
            bad.dim(),
            shape
        )));
    }

    let mut mean = Array2::<f64>::zeros(shape);
    let mut std = Array2::<f64>::zeros(shape);

    Zip::indexed(&mut mean)
        .and(&mut std)
        .par_for_each(|idx, m, s| {
            let mut count = 0usize;
            let mut sum = 0.0;
            for grid in history {
                let v = grid[idx];
                if v.is_finite() {
                    count += 1;
                    sum += v;
                }
            }
            if count == 0 {
                *m = f64::NAN;
                *s = f64::NAN;
                return;
            }
            let mu = sum / count as f64;
            let var = history
                .iter()
                .map(|grid| grid[idx])
                .filter(|v| v.is_finite())
                .map(|v| (v - mu).powi(2))
                .sum::<f64>()
                / count as f64;
            *m = mu;
            *s = var.sqrt();
        });

    Ok((mean, std))
}

/// Method 3: Z-score of a target year against the per-pixel history
#[derive(Debug, Clone, Default)]
pub struct TemporalAnomalyDetector {
    params: AnomalyParams,
}

impl TemporalAnomalyDetector {
    pub fn new(params: AnomalyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AnomalyParams {
        &self.params
    }

    /// Fail with `InsufficientHistory` unless enough years are available
    pub fn check_history(&self, target_year: i32, available: usize) -> ChangeResult<()> {
        if available < self.params.min_history.max(1) {
            return Err(ChangeError::InsufficientHistory {
                target_year,
                available,
            });
        }
        Ok(())
    }

    /// `Z = (target - mean) / (std + epsilon)` per pixel.
    ///
    /// NaN target pixels stay NaN. Any other non-finite result (no valid
    /// history, zero variance) is 0, meaning no anomaly.
    pub fn zscore(
        &self,
        target_year: i32,
        history: &[&Grid],
        target: &Grid,
    ) -> ChangeResult<(Array2<f32>, AnomalySummary)> {
        self.check_history(target_year, history.len())?;
        let (mean, std) = history_statistics(history)?;
        if target.dim() != mean.dim() {
            return Err(ChangeError::Processing(format!(
                "Target grid has shape {:?}, history {:?}",
                target.dim(),
                mean.dim()
            )));
        }

        let eps = self.params.epsilon;
        let mut z = Array2::<f32>::zeros(target.dim());
        Zip::from(&mut z)
            .and(target)
            .and(&mean)
            .and(&std)
            .par_for_each(|z, &t, &m, &s| {
                *z = if t.is_nan() {
                    f32::NAN
                } else {
                    let score = (t - m) / (s + eps);
                    if score.is_finite() {
                        score as f32
                    } else {
                        0.0
                    }
                };
            });

        let limit = self.params.strong_threshold as f32;
        let mut summary = AnomalySummary::default();
        for &v in z.iter().filter(|v| !v.is_nan()) {
            summary.valid_pixels += 1;
            if v > limit {
                summary.strong_positive += 1;
            } else if v < -limit {
                summary.strong_negative += 1;
            }
        }

        Ok((z, summary))
    }

    /// Write strong-anomaly counts to the run log
    pub fn log_summary(&self, summary: &AnomalySummary, logger: &RunLogger) {
        let t = self.params.strong_threshold;
        logger.record(format!(
            "Strong positive anomalies (Z > {}): {} px, strong negative (Z < -{}): {} px, of {} valid px",
            t, summary.strong_positive, t, summary.strong_negative, summary.valid_pixels
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn uniform(v: f64) -> Grid {
        Array2::from_elem((2, 2), v)
    }

    #[test]
    fn test_strong_positive_anomaly() {
        let history = [uniform(0.20), uniform(0.25), uniform(0.22)];
        let refs: Vec<&Grid> = history.iter().collect();
        let target = uniform(0.40);

        let (mean, std) = history_statistics(&refs).unwrap();
        assert_abs_diff_eq!(mean[[0, 0]], 0.67 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(std[[0, 0]], 0.0205480, epsilon = 1e-6);

        let detector = TemporalAnomalyDetector::default();
        let (z, summary) = detector.zscore(2025, &refs, &target).unwrap();
        assert!(z[[1, 1]] > 8.0 && z[[1, 1]] < 9.0, "Z = {}", z[[1, 1]]);
        assert_eq!(summary.strong_positive, 4);
        assert_eq!(summary.strong_negative, 0);
    }

    #[test]
    fn test_nan_values_are_ignored_in_history() {
        let a = array![[0.2, f64::NAN]];
        let b = array![[0.4, f64::NAN]];
        let c = array![[f64::NAN, f64::NAN]];
        let (mean, std) = history_statistics(&[&a, &b, &c]).unwrap();
        assert_abs_diff_eq!(mean[[0, 0]], 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(std[[0, 0]], 0.1, epsilon = 1e-12);
        assert!(mean[[0, 1]].is_nan());
        assert!(std[[0, 1]].is_nan());
    }

    #[test]
    fn test_degenerate_history_is_no_anomaly() {
        let a = array![[0.3, f64::NAN, 0.3]];
        let b = array![[0.3, f64::NAN, 0.3]];
        let target = array![[0.3, 0.5, f64::NAN]];

        let detector = TemporalAnomalyDetector::default();
        let (z, summary) = detector.zscore(2024, &[&a, &b], &target).unwrap();
        // Zero variance with equal target, then all-NaN history
        assert_eq!(z[[0, 0]], 0.0);
        assert_eq!(z[[0, 1]], 0.0);
        // Masked target stays nodata
        assert!(z[[0, 2]].is_nan());
        assert_eq!(summary.valid_pixels, 2);
    }

    #[test]
    fn test_insufficient_history() {
        let a = uniform(0.3);
        let target = uniform(0.3);
        let detector = TemporalAnomalyDetector::default();
        let result = detector.zscore(2025, &[&a], &target);
        assert!(matches!(
            result,
            Err(ChangeError::InsufficientHistory { target_year: 2025, available: 1 })
        ));
    }

    #[test]
    fn test_configurable_stabilizer() {
        let a = uniform(0.3);
        let b = uniform(0.3);
        let target = uniform(0.4);
        let detector = TemporalAnomalyDetector::new(AnomalyParams {
            epsilon: 0.05,
            ..AnomalyParams::default()
        });
        let (z, _) = detector.zscore(2025, &[&a, &b], &target).unwrap();
        assert_abs_diff_eq!(z[[0, 0]], 2.0, epsilon = 1e-5);
    }
}
