use crate::core::anomaly::AnomalyParams;
use crate::core::difference::DifferenceParams;
use crate::core::indices::IndexParams;
use crate::core::rule_classify::RuleThresholds;
use crate::io::raster::Compression;
use crate::types::{ChangeError, ChangeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-wide configuration, loadable from JSON.
///
/// Every field is optional in the file; missing ones take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding the yearly 6-band composites
    pub raw_dir: PathBuf,
    /// Directory for index stacks, change rasters and run logs
    pub processed_dir: PathBuf,
    /// Study-area boundary vector
    pub boundary_path: PathBuf,
    /// Source composites are named `<source_prefix>_<YYYY>.tif`
    pub source_prefix: String,
    /// Inclusive bounds on the years accepted by change detection
    pub min_year: i32,
    pub max_year: i32,
    pub indices: IndexParams,
    pub difference: DifferenceParams,
    pub rules: RuleThresholds,
    /// Area of one pixel in hectares
    pub pixel_area_ha: f64,
    pub anomaly: AnomalyParams,
    pub compression: Compression,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            boundary_path: PathBuf::from("data/vector/study_area.gpkg"),
            source_prefix: "sentinel2".to_string(),
            min_year: 2019,
            max_year: 2025,
            indices: IndexParams::default(),
            difference: DifferenceParams::default(),
            rules: RuleThresholds::default(),
            pixel_area_ha: 0.01, // 10 m x 10 m
            anomaly: AnomalyParams::default(),
            compression: Compression::default(),
        }
    }
}

impl ProjectConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ChangeResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        if !path.exists() {
            return Err(ChangeError::InputMissing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: ProjectConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChangeResult<()> {
        if self.min_year > self.max_year {
            return Err(ChangeError::InvalidArgument(format!(
                "min_year {} is after max_year {}",
                self.min_year, self.max_year
            )));
        }
        if !(self.difference.threshold >= 0.0) {
            return Err(ChangeError::InvalidArgument(
                "difference threshold must be non-negative".to_string(),
            ));
        }
        if !(self.anomaly.epsilon > 0.0) {
            return Err(ChangeError::InvalidArgument(
                "anomaly epsilon must be positive".to_string(),
            ));
        }
        if !(self.pixel_area_ha > 0.0) {
            return Err(ChangeError::InvalidArgument(
                "pixel_area_ha must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpectralIndex;

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "processed_dir": "/tmp/processed",
                "max_year": 2030,
                "difference": { "threshold": 0.2, "index": "NDBI" },
                "anomaly": { "epsilon": 0.01 },
                "compression": "DEFLATE"
            }"#,
        )
        .unwrap();

        let config = ProjectConfig::from_json_file(&path).unwrap();
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/processed"));
        assert_eq!(config.min_year, 2019);
        assert_eq!(config.max_year, 2030);
        assert_eq!(config.difference.index, SpectralIndex::Ndbi);
        assert_eq!(config.difference.threshold, 0.2);
        assert_eq!(config.anomaly.epsilon, 0.01);
        assert_eq!(config.anomaly.min_history, 2);
        assert_eq!(config.rules.vegetation_ndvi, 0.3);
        assert_eq!(config.compression, Compression::Deflate);
    }

    #[test]
    fn test_invalid_year_bounds() {
        let config = ProjectConfig {
            min_year: 2025,
            max_year: 2019,
            ..ProjectConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChangeError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let result = ProjectConfig::from_json_file("/nonexistent/config.json");
        assert!(matches!(result, Err(ChangeError::InputMissing(_))));
    }
}
