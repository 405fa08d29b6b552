//! Method 2: multi-index change classification
//!
//! Each pixel is tested against an ordered rule table. The first matching
//! rule assigns the class; later rules only see pixels still at class 0, so
//! classes are mutually exclusive and priority is the table order.

use crate::io::RunLogger;
use crate::types::{ChangeError, ChangeResult, Grid};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Land-cover change classes, in rule priority order after `NoChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ChangeClass {
    NoChange = 0,
    Urbanization = 1,
    VegetationLoss = 2,
    VegetationGain = 3,
    NewWater = 4,
}

impl ChangeClass {
    pub const ALL: [ChangeClass; 5] = [
        ChangeClass::NoChange,
        ChangeClass::Urbanization,
        ChangeClass::VegetationLoss,
        ChangeClass::VegetationGain,
        ChangeClass::NewWater,
    ];

    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn label(self) -> &'static str {
        match self {
            ChangeClass::NoChange => "No change",
            ChangeClass::Urbanization => "Urbanization",
            ChangeClass::VegetationLoss => "Vegetation loss",
            ChangeClass::VegetationGain => "Vegetation gain",
            ChangeClass::NewWater => "New water",
        }
    }
}

/// NDVI, NDBI and NDWI of one pixel in both years
#[derive(Debug, Clone, Copy)]
pub struct PixelPair {
    pub ndvi_a: f64,
    pub ndbi_a: f64,
    pub ndwi_a: f64,
    pub ndvi_b: f64,
    pub ndbi_b: f64,
    pub ndwi_b: f64,
}

impl PixelPair {
    /// Only pixels with finite NDVI in both years may leave class 0
    pub fn is_eligible(&self) -> bool {
        self.ndvi_a.is_finite() && self.ndvi_b.is_finite()
    }
}

/// Empirical thresholds of the rule table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// NDVI above which a pixel counts as vegetated
    pub vegetation_ndvi: f64,
    /// Minimum NDVI or NDBI change between years
    pub min_delta: f64,
    /// NDBI above which a pixel counts as built-up
    pub built_up_ndbi: f64,
    /// NDWI above which a pixel counts as water
    pub water_ndwi: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            vegetation_ndvi: 0.3,
            min_delta: 0.1,
            built_up_ndbi: 0.0,
            water_ndwi: 0.0,
        }
    }
}

/// One row of the rule table
#[derive(Clone, Copy)]
pub struct ChangeRule {
    pub class: ChangeClass,
    pub predicate: fn(&PixelPair, &RuleThresholds) -> bool,
}

impl std::fmt::Debug for ChangeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRule").field("class", &self.class).finish()
    }
}

fn urbanization(p: &PixelPair, t: &RuleThresholds) -> bool {
    p.ndvi_a > t.vegetation_ndvi
        && p.ndbi_b > t.built_up_ndbi
        && (p.ndbi_b - p.ndbi_a) > t.min_delta
}

fn vegetation_loss(p: &PixelPair, t: &RuleThresholds) -> bool {
    p.ndvi_a > t.vegetation_ndvi
        && (p.ndvi_a - p.ndvi_b) > t.min_delta
        && p.ndbi_b <= t.built_up_ndbi
}

fn vegetation_gain(p: &PixelPair, t: &RuleThresholds) -> bool {
    p.ndvi_b > t.vegetation_ndvi && (p.ndvi_b - p.ndvi_a) > t.min_delta
}

fn new_water(p: &PixelPair, t: &RuleThresholds) -> bool {
    p.ndwi_a < t.water_ndwi && p.ndwi_b > t.water_ndwi
}

/// Rules in priority order
pub const RULES: [ChangeRule; 4] = [
    ChangeRule { class: ChangeClass::Urbanization, predicate: urbanization },
    ChangeRule { class: ChangeClass::VegetationLoss, predicate: vegetation_loss },
    ChangeRule { class: ChangeClass::VegetationGain, predicate: vegetation_gain },
    ChangeRule { class: ChangeClass::NewWater, predicate: new_water },
];

/// Class of one pixel: the first matching rule, or `NoChange`
pub fn classify_pixel(pixel: &PixelPair, thresholds: &RuleThresholds) -> ChangeClass {
    if !pixel.is_eligible() {
        return ChangeClass::NoChange;
    }
    RULES
        .iter()
        .find(|rule| (rule.predicate)(pixel, thresholds))
        .map(|rule| rule.class)
        .unwrap_or(ChangeClass::NoChange)
}

/// NDVI, NDBI and NDWI grids of one year
#[derive(Debug, Clone, Copy)]
pub struct IndexTriplet<'a> {
    pub ndvi: &'a Grid,
    pub ndbi: &'a Grid,
    pub ndwi: &'a Grid,
}

impl<'a> IndexTriplet<'a> {
    fn check_shape(&self, shape: (usize, usize)) -> ChangeResult<()> {
        for (name, grid) in [("NDVI", self.ndvi), ("NDBI", self.ndbi), ("NDWI", self.ndwi)] {
            if grid.dim() != shape {
                return Err(ChangeError::Processing(format!(
                    "{} grid has shape {:?}, expected {:?}",
                    name,
                    grid.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }
}

/// Per-class statistics of a classification
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSummary {
    /// Pixel count per class code 0..=4 (class 0 counts eligible pixels only)
    pub counts: [usize; 5],
    /// Pixels with finite NDVI in both years
    pub eligible_pixels: usize,
    /// Area of one pixel in hectares
    pub pixel_area_ha: f64,
}

impl RuleSummary {
    pub fn count(&self, class: ChangeClass) -> usize {
        self.counts[class.code() as usize]
    }

    pub fn area_ha(&self, class: ChangeClass) -> f64 {
        self.count(class) as f64 * self.pixel_area_ha
    }

    pub fn analysed_area_ha(&self) -> f64 {
        self.eligible_pixels as f64 * self.pixel_area_ha
    }

    pub fn changed_area_ha(&self) -> f64 {
        RULES.iter().map(|rule| self.area_ha(rule.class)).sum()
    }

    /// Vegetation gain minus vegetation loss, in hectares
    pub fn net_vegetation_change_ha(&self) -> f64 {
        self.area_ha(ChangeClass::VegetationGain) - self.area_ha(ChangeClass::VegetationLoss)
    }
}

/// Method 2 classifier
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    thresholds: RuleThresholds,
    /// Area of one pixel in hectares (0.01 ha for 10 m pixels)
    pixel_area_ha: f64,
}

impl Default for RuleBasedClassifier {
    fn default() -> Self {
        Self::new(RuleThresholds::default(), 0.01)
    }
}

impl RuleBasedClassifier {
    pub fn new(thresholds: RuleThresholds, pixel_area_ha: f64) -> Self {
        Self {
            thresholds,
            pixel_area_ha,
        }
    }

    /// Classify every pixel from year A to year B
    pub fn classify(
        &self,
        year_a: IndexTriplet,
        year_b: IndexTriplet,
    ) -> ChangeResult<(Array2<i8>, RuleSummary)> {
        let shape = year_a.ndvi.dim();
        year_a.check_shape(shape)?;
        year_b.check_shape(shape)?;

        let mut classes = Array2::<i8>::zeros(shape);
        Zip::indexed(&mut classes).par_for_each(|idx, class| {
            let pixel = PixelPair {
                ndvi_a: year_a.ndvi[idx],
                ndbi_a: year_a.ndbi[idx],
                ndwi_a: year_a.ndwi[idx],
                ndvi_b: year_b.ndvi[idx],
                ndbi_b: year_b.ndbi[idx],
                ndwi_b: year_b.ndwi[idx],
            };
            *class = classify_pixel(&pixel, &self.thresholds).code();
        });

        let mut counts = [0usize; 5];
        let mut eligible_pixels = 0;
        Zip::from(&classes)
            .and(year_a.ndvi)
            .and(year_b.ndvi)
            .for_each(|&class, &a, &b| {
                if a.is_finite() && b.is_finite() {
                    eligible_pixels += 1;
                    counts[class as usize] += 1;
                }
            });

        let summary = RuleSummary {
            counts,
            eligible_pixels,
            pixel_area_ha: self.pixel_area_ha,
        };
        Ok((classes, summary))
    }

    /// Write per-class counts and approximate areas to the run log
    pub fn log_summary(&self, summary: &RuleSummary, logger: &RunLogger) {
        for rule in RULES.iter() {
            logger.record(format!(
                "Class {} ({}): {} px (~{:.1} ha)",
                rule.class.code(),
                rule.class.label(),
                summary.count(rule.class),
                summary.area_ha(rule.class)
            ));
        }
        logger.record(format!(
            "Analysed area: {:.1} ha, changed: {:.1} ha, net vegetation change: {:+.1} ha",
            summary.analysed_area_ha(),
            summary.changed_area_ha(),
            summary.net_vegetation_change_ha()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn pair(a: (f64, f64, f64), b: (f64, f64, f64)) -> PixelPair {
        PixelPair {
            ndvi_a: a.0,
            ndbi_a: a.1,
            ndwi_a: a.2,
            ndvi_b: b.0,
            ndbi_b: b.1,
            ndwi_b: b.2,
        }
    }

    #[test]
    fn test_urbanization_scenario() {
        let t = RuleThresholds::default();
        let p = pair((0.5, -0.2, -0.1), (0.1, 0.2, -0.1));
        assert_eq!(classify_pixel(&p, &t), ChangeClass::Urbanization);
    }

    #[test]
    fn test_each_class() {
        let t = RuleThresholds::default();
        let loss = pair((0.6, -0.3, -0.2), (0.3, -0.1, -0.2));
        assert_eq!(classify_pixel(&loss, &t), ChangeClass::VegetationLoss);

        let gain = pair((0.2, -0.1, -0.1), (0.5, -0.3, -0.2));
        assert_eq!(classify_pixel(&gain, &t), ChangeClass::VegetationGain);

        let water = pair((0.1, 0.0, -0.1), (0.05, -0.2, 0.3));
        assert_eq!(classify_pixel(&water, &t), ChangeClass::NewWater);

        let stable = pair((0.4, -0.1, -0.2), (0.42, -0.1, -0.2));
        assert_eq!(classify_pixel(&stable, &t), ChangeClass::NoChange);
    }

    #[test]
    fn test_priority_order() {
        let t = RuleThresholds::default();
        // Satisfies urbanization and new water; urbanization wins
        let p = pair((0.5, -0.2, -0.1), (0.1, 0.2, 0.1));
        assert!(new_water(&p, &t));
        assert_eq!(classify_pixel(&p, &t), ChangeClass::Urbanization);
    }

    #[test]
    fn test_ineligible_pixels_stay_zero() {
        let t = RuleThresholds::default();
        // NDWI alone would make this new water
        let p = pair((f64::NAN, 0.0, -0.5), (0.2, 0.0, 0.5));
        assert_eq!(classify_pixel(&p, &t), ChangeClass::NoChange);
    }

    #[test]
    fn test_assigned_class_matches_only_its_rule_and_later() {
        let t = RuleThresholds::default();
        let levels = [-0.4, -0.05, 0.0, 0.2, 0.35, 0.6];
        for &na in &levels {
            for &nb in &levels {
                for &ba in &levels {
                    for &bb in &levels {
                        let p = pair((na, ba, -na), (nb, bb, -nb));
                        let class = classify_pixel(&p, &t);
                        let position = RULES.iter().position(|r| r.class == class);
                        match position {
                            Some(k) => {
                                assert!((RULES[k].predicate)(&p, &t));
                                assert!(RULES[..k].iter().all(|r| !(r.predicate)(&p, &t)));
                            }
                            None => assert!(RULES.iter().all(|r| !(r.predicate)(&p, &t))),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_classify_grids() {
        let ndvi_a = array![[0.5, 0.6, 0.2], [0.1, f64::NAN, 0.4]];
        let ndbi_a = array![[-0.2, -0.3, -0.1], [0.0, 0.0, -0.1]];
        let ndwi_a = array![[-0.1, -0.2, -0.1], [-0.1, -0.3, -0.2]];
        let ndvi_b = array![[0.1, 0.3, 0.5], [0.05, 0.2, 0.42]];
        let ndbi_b = array![[0.2, -0.1, -0.3], [-0.2, 0.0, -0.1]];
        let ndwi_b = array![[-0.1, -0.2, -0.2], [0.3, 0.4, -0.2]];

        let classifier = RuleBasedClassifier::default();
        let (classes, summary) = classifier
            .classify(
                IndexTriplet { ndvi: &ndvi_a, ndbi: &ndbi_a, ndwi: &ndwi_a },
                IndexTriplet { ndvi: &ndvi_b, ndbi: &ndbi_b, ndwi: &ndwi_b },
            )
            .unwrap();

        assert_eq!(classes, array![[1i8, 2, 3], [4, 0, 0]]);
        assert_eq!(summary.eligible_pixels, 5);
        assert_eq!(summary.counts, [1, 1, 1, 1, 1]);
        assert!((summary.area_ha(ChangeClass::Urbanization) - 0.01).abs() < 1e-12);
        assert!((summary.analysed_area_ha() - 0.05).abs() < 1e-12);
        assert!(summary.net_vegetation_change_ha().abs() < 1e-12);
    }
}
