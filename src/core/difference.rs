use crate::io::RunLogger;
use crate::types::{ChangeError, ChangeResult, Grid, SpectralIndex};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Classes of the simple difference map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum DifferenceClass {
    Loss = -1,
    NoChange = 0,
    Gain = 1,
}

/// Parameters for index differencing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferenceParams {
    /// Index compared between the two years
    pub index: SpectralIndex,
    /// Minimum absolute change counted as gain or loss
    pub threshold: f64,
}

impl Default for DifferenceParams {
    fn default() -> Self {
        Self {
            index: SpectralIndex::Ndvi,
            threshold: 0.15,
        }
    }
}

/// Pixel counts of a difference map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifferenceSummary {
    /// Pixels with a finite difference
    pub valid_pixels: usize,
    pub gain_pixels: usize,
    pub loss_pixels: usize,
}

impl DifferenceSummary {
    pub fn gain_percent(&self) -> f64 {
        percent(self.gain_pixels, self.valid_pixels)
    }

    pub fn loss_percent(&self) -> f64 {
        percent(self.loss_pixels, self.valid_pixels)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

/// Method 1: thresholded difference of one index between two years
#[derive(Debug, Clone, Default)]
pub struct DifferenceClassifier {
    params: DifferenceParams,
}

impl DifferenceClassifier {
    pub fn new(params: DifferenceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DifferenceParams {
        &self.params
    }

    /// Classify `after - before` into gain (+1), loss (-1) or no change (0).
    ///
    /// Pixels invalid in either year stay 0.
    pub fn classify(
        &self,
        before: &Grid,
        after: &Grid,
    ) -> ChangeResult<(Array2<i8>, DifferenceSummary)> {
        if before.dim() != after.dim() {
            return Err(ChangeError::Processing(format!(
                "Difference inputs have shapes {:?} and {:?}",
                before.dim(),
                after.dim()
            )));
        }

        let threshold = self.params.threshold;
        let mut classes = Array2::<i8>::zeros(before.dim());
        let mut summary = DifferenceSummary::default();

        Zip::from(&mut classes)
            .and(before)
            .and(after)
            .for_each(|class, &b, &a| {
                let diff = a - b;
                if !diff.is_finite() {
                    return;
                }
                summary.valid_pixels += 1;
                if diff > threshold {
                    *class = DifferenceClass::Gain as i8;
                    summary.gain_pixels += 1;
                } else if diff < -threshold {
                    *class = DifferenceClass::Loss as i8;
                    summary.loss_pixels += 1;
                }
            });

        Ok((classes, summary))
    }

    /// Write gain and loss shares to the run log
    pub fn log_summary(&self, summary: &DifferenceSummary, logger: &RunLogger) {
        if summary.valid_pixels == 0 {
            logger.record("No valid pixels in both years, difference statistics skipped");
            return;
        }
        let t = self.params.threshold;
        logger.record(format!(
            "Gain (> {}): {} px ({:.1}%)",
            t,
            summary.gain_pixels,
            summary.gain_percent()
        ));
        logger.record(format!(
            "Loss (< -{}): {} px ({:.1}%)",
            t,
            summary.loss_pixels,
            summary.loss_percent()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_gain_loss_and_no_change() {
        let before = array![[0.5, 0.5, 0.5], [0.2, f64::NAN, 0.3]];
        let after = array![[0.8, 0.2, 0.6], [0.2, 0.9, f64::NAN]];

        let (classes, summary) = DifferenceClassifier::default()
            .classify(&before, &after)
            .unwrap();

        assert_eq!(classes, array![[1i8, -1, 0], [0, 0, 0]]);
        assert_eq!(summary.valid_pixels, 4);
        assert_eq!(summary.gain_pixels, 1);
        assert_eq!(summary.loss_pixels, 1);
        assert!((summary.gain_percent() - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_strict() {
        let before = array![[0.0, 0.0]];
        let after = array![[0.25, -0.25]];
        let classifier = DifferenceClassifier::new(DifferenceParams {
            index: SpectralIndex::Ndvi,
            threshold: 0.25,
        });
        let (classes, _) = classifier.classify(&before, &after).unwrap();
        assert_eq!(classes, array![[0i8, 0]]);
    }

    #[test]
    fn test_identical_grids_have_no_change() {
        let grid = array![[0.1, -0.4, 0.9], [0.33, f64::NAN, 0.0]];
        let (classes, summary) = DifferenceClassifier::default()
            .classify(&grid, &grid)
            .unwrap();
        assert!(classes.iter().all(|&c| c == 0));
        assert_eq!(summary.valid_pixels, 5);
        assert_eq!(summary.gain_pixels + summary.loss_pixels, 0);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::zeros((2, 3));
        assert!(DifferenceClassifier::default().classify(&a, &b).is_err());
    }
}
