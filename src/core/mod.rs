//! Core processing modules for index computation and change detection

pub mod scale;
pub mod indices;
pub mod masking;
pub mod difference;
pub mod rule_classify;
pub mod anomaly;

// Re-export main processors
pub use scale::{detect_scale, ReflectanceScale};
pub use indices::{IndexEngine, IndexParams, BatchReport};
pub use masking::{BoundaryMasker, polygon_mask};
pub use difference::{DifferenceClassifier, DifferenceParams, DifferenceSummary, DifferenceClass};
pub use rule_classify::{RuleBasedClassifier, RuleThresholds, RuleSummary, ChangeClass};
pub use anomaly::{TemporalAnomalyDetector, AnomalyParams, AnomalySummary};
