use ndarray::ArrayView2;

/// Sample maximum above which a source is treated as scaled digital numbers
pub const DN_DETECTION_THRESHOLD: f64 = 1.5;

/// Divisor converting Sentinel-2 digital numbers to unit reflectance
pub const DN_SCALE_FACTOR: f64 = 10000.0;

/// Radiometric scale of a source composite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectanceScale {
    /// Values already in [0, 1]
    Unit,
    /// Reflectance multiplied by 10000
    DigitalNumber,
}

impl ReflectanceScale {
    /// Factor every band is divided by to obtain reflectance
    pub fn factor(self) -> f64 {
        match self {
            ReflectanceScale::Unit => 1.0,
            ReflectanceScale::DigitalNumber => DN_SCALE_FACTOR,
        }
    }
}

/// Infer the scale of a source from a small sample of one band.
///
/// NaN samples are ignored; an all-NaN or empty sample is taken as unit
/// reflectance.
pub fn detect_scale(sample: ArrayView2<f64>) -> ReflectanceScale {
    let max = sample
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);

    if max > DN_DETECTION_THRESHOLD {
        ReflectanceScale::DigitalNumber
    } else {
        ReflectanceScale::Unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_unit_reflectance() {
        let sample = Array2::from_elem((10, 10), 0.35);
        assert_eq!(detect_scale(sample.view()), ReflectanceScale::Unit);
        assert_eq!(detect_scale(sample.view()).factor(), 1.0);
    }

    #[test]
    fn test_digital_numbers() {
        let mut sample = Array2::from_elem((10, 10), 0.0);
        sample[[3, 7]] = 1523.0;
        let scale = detect_scale(sample.view());
        assert_eq!(scale, ReflectanceScale::DigitalNumber);
        assert_eq!(scale.factor(), 10000.0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let sample = Array2::from_elem((2, 2), 1.5);
        assert_eq!(detect_scale(sample.view()), ReflectanceScale::Unit);
    }

    #[test]
    fn test_nan_sample() {
        let sample = Array2::from_elem((3, 3), f64::NAN);
        assert_eq!(detect_scale(sample.view()), ReflectanceScale::Unit);

        let empty = Array2::<f64>::zeros((0, 0));
        assert_eq!(detect_scale(empty.view()), ReflectanceScale::Unit);
    }
}
