//! Orchestration of index computation and change detection runs

use crate::config::ProjectConfig;
use crate::core::anomaly::{AnomalySummary, TemporalAnomalyDetector};
use crate::core::difference::{DifferenceClassifier, DifferenceSummary};
use crate::core::indices::{index_file_name, BatchReport, IndexEngine};
use crate::core::masking::BoundaryMasker;
use crate::core::rule_classify::{IndexTriplet, RuleBasedClassifier, RuleSummary};
use crate::io::boundary::BoundaryPolygon;
use crate::io::raster::{RasterWriter, WriteOptions};
use crate::io::RunLogger;
use crate::types::{ChangeError, ChangeResult, Grid, SpectralIndex};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Change-detection method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    Difference,
    Rules,
    Anomaly,
    All,
}

impl DetectionMethod {
    pub fn runs_difference(self) -> bool {
        matches!(self, DetectionMethod::Difference | DetectionMethod::All)
    }

    pub fn runs_rules(self) -> bool {
        matches!(self, DetectionMethod::Rules | DetectionMethod::All)
    }

    pub fn runs_anomaly(self) -> bool {
        matches!(self, DetectionMethod::Anomaly | DetectionMethod::All)
    }
}

impl std::str::FromStr for DetectionMethod {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "difference" | "diff" => Ok(DetectionMethod::Difference),
            "rules" | "rule-classification" | "urban" => Ok(DetectionMethod::Rules),
            "anomaly" => Ok(DetectionMethod::Anomaly),
            "all" => Ok(DetectionMethod::All),
            _ => Err(ChangeError::InvalidArgument(format!("Unknown method: {}", s))),
        }
    }
}

/// One change-detection invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRequest {
    pub start_year: i32,
    pub end_year: i32,
    pub method: DetectionMethod,
}

impl DetectionRequest {
    /// Years inside `[min_year, max_year]` and start strictly before end
    pub fn validate(&self, config: &ProjectConfig) -> ChangeResult<()> {
        let range = config.min_year..=config.max_year;
        if !range.contains(&self.start_year) || !range.contains(&self.end_year) {
            return Err(ChangeError::InvalidArgument(format!(
                "Years must be between {} and {}",
                config.min_year, config.max_year
            )));
        }
        if self.start_year >= self.end_year {
            return Err(ChangeError::InvalidArgument(format!(
                "Start year ({}) must precede end year ({})",
                self.start_year, self.end_year
            )));
        }
        Ok(())
    }
}

/// Names of every artifact inside the processed directory
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    processed_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new<P: Into<PathBuf>>(processed_dir: P) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn index_path(&self, year: i32) -> PathBuf {
        self.processed_dir.join(index_file_name(year))
    }

    pub fn difference_path(&self, year_a: i32, year_b: i32) -> PathBuf {
        self.processed_dir
            .join(format!("change_difference_{}_{}.tif", year_a, year_b))
    }

    pub fn rules_path(&self, year_a: i32, year_b: i32) -> PathBuf {
        self.processed_dir
            .join(format!("change_rules_{}_{}.tif", year_a, year_b))
    }

    pub fn anomaly_path(&self, year: i32) -> PathBuf {
        self.processed_dir.join(format!("anomaly_zscore_{}.tif", year))
    }

    pub fn index_log_path(&self) -> PathBuf {
        self.processed_dir.join("metadata.txt")
    }

    pub fn change_log_path(&self) -> PathBuf {
        self.processed_dir.join("metadata_changes.txt")
    }

    /// Every persisted index stack, keyed by year
    pub fn available_index_years(&self) -> ChangeResult<BTreeMap<i32, PathBuf>> {
        let mut years = BTreeMap::new();
        if !self.processed_dir.is_dir() {
            return Ok(years);
        }

        let pattern = Regex::new(r"^indices_(\d{4})\.tif$")
            .map_err(|e| ChangeError::Processing(e.to_string()))?;
        for entry in std::fs::read_dir(&self.processed_dir)? {
            let path = entry?.path();
            let year = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| pattern.captures(n))
                .and_then(|caps| caps[1].parse::<i32>().ok());
            if let Some(year) = year {
                years.insert(year, path);
            }
        }
        Ok(years)
    }

    /// Target stack and history stacks of an anomaly run on `target_year`
    pub fn anomaly_inputs(
        &self,
        target_year: i32,
        detector: &TemporalAnomalyDetector,
    ) -> ChangeResult<(PathBuf, BTreeMap<i32, PathBuf>)> {
        let mut history = self.available_index_years()?;
        let Some(target) = history.remove(&target_year) else {
            return Err(ChangeError::InsufficientHistory {
                target_year,
                available: history.len(),
            });
        };
        detector.check_history(target_year, history.len())?;
        Ok((target, history))
    }

    /// Check every input the request needs before anything is computed.
    ///
    /// Both index stacks must exist (`InputMissing`), and when the anomaly
    /// method is selected the end year needs enough history
    /// (`InsufficientHistory`).
    pub fn preflight(
        &self,
        request: &DetectionRequest,
        detector: &TemporalAnomalyDetector,
    ) -> ChangeResult<()> {
        for year in [request.start_year, request.end_year] {
            let path = self.index_path(year);
            if !path.exists() {
                return Err(ChangeError::InputMissing(path));
            }
        }
        if request.method.runs_anomaly() {
            self.anomaly_inputs(request.end_year, detector)?;
        }
        Ok(())
    }
}

/// Statistics of every method that ran
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub difference: Option<DifferenceSummary>,
    pub rules: Option<RuleSummary>,
    pub anomaly: Option<AnomalySummary>,
    pub outputs: Vec<PathBuf>,
}

/// Runs the change-detection methods on persisted index stacks
pub struct ChangePipeline<'a> {
    config: &'a ProjectConfig,
    layout: ArtifactLayout,
    boundary: &'a BoundaryPolygon,
    writer: RasterWriter,
}

impl<'a> ChangePipeline<'a> {
    pub fn new(config: &'a ProjectConfig, layout: ArtifactLayout, boundary: &'a BoundaryPolygon) -> Self {
        Self {
            config,
            layout,
            boundary,
            writer: RasterWriter::new(config.compression),
        }
    }

    fn masker(&self) -> BoundaryMasker<'a> {
        BoundaryMasker::new(self.boundary)
    }

    /// Run the requested methods; the first failure ends the invocation
    pub fn run(&self, request: &DetectionRequest, logger: &RunLogger) -> ChangeResult<DetectionReport> {
        logger.record(format!(
            "Change detection {} -> {} ({:?})",
            request.start_year, request.end_year, request.method
        ));

        let mut report = DetectionReport::default();
        let (a, b) = (request.start_year, request.end_year);

        if request.method.runs_difference() {
            let summary = logged(self.run_difference(a, b, logger), logger)?;
            report.difference = Some(summary);
            report.outputs.push(self.layout.difference_path(a, b));
        }
        if request.method.runs_rules() {
            let summary = logged(self.run_rules(a, b, logger), logger)?;
            report.rules = Some(summary);
            report.outputs.push(self.layout.rules_path(a, b));
        }
        if request.method.runs_anomaly() {
            let summary = logged(self.run_anomaly(b, logger), logger)?;
            report.anomaly = Some(summary);
            report.outputs.push(self.layout.anomaly_path(b));
        }

        Ok(report)
    }

    /// Method 1 between two years
    pub fn run_difference(&self, year_a: i32, year_b: i32, logger: &RunLogger) -> ChangeResult<DifferenceSummary> {
        let classifier = DifferenceClassifier::new(self.config.difference.clone());
        let index = classifier.params().index;
        logger.record(format!("--- Method 1: simple difference ({}) ---", index));

        let bands = [index.band_number()];
        let before = self.masker().load_masked(self.layout.index_path(year_a), &bands)?;
        let after = self.masker().load_masked(self.layout.index_path(year_b), &bands)?;
        before.grid.ensure_comparable(
            &after.grid,
            &index_file_name(year_a),
            &index_file_name(year_b),
        )?;

        let (classes, summary) = classifier.classify(&before.bands[0], &after.bands[0])?;
        classifier.log_summary(&summary, logger);

        let output = self.layout.difference_path(year_a, year_b);
        let description = format!("Diff {}", index);
        self.save(&output, &before.grid, &[classes.view()], &description, logger)?;
        Ok(summary)
    }

    /// Method 2 between two years
    pub fn run_rules(&self, year_a: i32, year_b: i32, logger: &RunLogger) -> ChangeResult<RuleSummary> {
        logger.record("--- Method 2: rule-based change classification ---");
        let classifier = RuleBasedClassifier::new(self.config.rules.clone(), self.config.pixel_area_ha);

        let bands = [
            SpectralIndex::Ndvi.band_number(),
            SpectralIndex::Ndbi.band_number(),
            SpectralIndex::Ndwi.band_number(),
        ];
        let first = self.masker().load_masked(self.layout.index_path(year_a), &bands)?;
        let second = self.masker().load_masked(self.layout.index_path(year_b), &bands)?;
        first.grid.ensure_comparable(
            &second.grid,
            &index_file_name(year_a),
            &index_file_name(year_b),
        )?;

        let (classes, summary) = classifier.classify(triplet(&first.bands), triplet(&second.bands))?;
        classifier.log_summary(&summary, logger);

        let output = self.layout.rules_path(year_a, year_b);
        self.save(
            &output,
            &first.grid,
            &[classes.view()],
            "Land Cover Change Classification",
            logger,
        )?;
        Ok(summary)
    }

    /// Method 3 for a target year against every other persisted year
    pub fn run_anomaly(&self, target_year: i32, logger: &RunLogger) -> ChangeResult<AnomalySummary> {
        let detector = TemporalAnomalyDetector::new(self.config.anomaly.clone());
        let index = detector.params().index;
        logger.record(format!(
            "--- Method 3: temporal anomalies ({}, target {}) ---",
            index, target_year
        ));

        let (target_path, available) = self.layout.anomaly_inputs(target_year, &detector)?;
        let history_years: Vec<i32> = available.keys().copied().collect();
        logger.record(format!("History years: {:?}", history_years));

        let bands = [index.band_number()];
        let target = self.masker().load_masked(&target_path, &bands)?;
        let mut history = Vec::with_capacity(available.len());
        for (year, path) in &available {
            let layer = self.masker().load_masked(path, &bands)?;
            layer.grid.ensure_comparable(
                &target.grid,
                &index_file_name(*year),
                &index_file_name(target_year),
            )?;
            history.extend(layer.bands);
        }

        let history_refs: Vec<&Grid> = history.iter().collect();
        let (z, summary) = detector.zscore(target_year, &history_refs, &target.bands[0])?;
        detector.log_summary(&summary, logger);

        let output = self.layout.anomaly_path(target_year);
        let description = format!("{} Z-Score {}", index, target_year);
        self.save(&output, &target.grid, &[z.view()], &description, logger)?;
        Ok(summary)
    }

    fn save<T: crate::io::raster::RasterSample>(
        &self,
        output: &Path,
        grid: &crate::types::RasterGrid,
        bands: &[ndarray::ArrayView2<T>],
        description: &str,
        logger: &RunLogger,
    ) -> ChangeResult<()> {
        let mut grid = grid.clone();
        grid.band_count = bands.len();
        self.writer.write(
            output,
            &grid,
            bands,
            &WriteOptions {
                description: Some(description),
                band_descriptions: &[],
            },
        )?;
        logger.record(format!(
            "Saved: {}",
            output.file_name().unwrap_or_default().to_string_lossy()
        ));
        Ok(())
    }
}

/// Bands loaded in NDVI, NDBI, NDWI order
fn triplet(bands: &[Grid]) -> IndexTriplet<'_> {
    IndexTriplet {
        ndvi: &bands[0],
        ndbi: &bands[1],
        ndwi: &bands[2],
    }
}

/// Record a failure in the run log before handing it back
fn logged<T>(result: ChangeResult<T>, logger: &RunLogger) -> ChangeResult<T> {
    if let Err(e) = &result {
        logger.record(format!("Error: {}", e));
    }
    result
}

/// Batch index computation over the configured raw directory
pub fn run_indices(config: &ProjectConfig) -> ChangeResult<BatchReport> {
    let layout = ArtifactLayout::new(&config.processed_dir);
    std::fs::create_dir_all(layout.processed_dir())?;
    let logger = RunLogger::create(layout.index_log_path(), "SPECTRAL INDEX METADATA")?;
    logger.record(format!(
        "Source: {} | Destination: {}",
        config.raw_dir.display(),
        layout.processed_dir().display()
    ));

    let engine = IndexEngine::new(config.indices.clone(), RasterWriter::new(config.compression));
    let report = logged(
        engine.process_directory(&config.raw_dir, layout.processed_dir(), &config.source_prefix, &logger),
        &logger,
    )?;

    logger.record(format!(
        "Completed: {} year(s) processed, {} failed",
        report.processed.len(),
        report.failed.len()
    ));
    Ok(report)
}

/// Validate, check inputs and run change detection for one request
pub fn run_detection(config: &ProjectConfig, request: &DetectionRequest) -> ChangeResult<DetectionReport> {
    request.validate(config)?;

    let layout = ArtifactLayout::new(&config.processed_dir);
    std::fs::create_dir_all(layout.processed_dir())?;
    let logger = RunLogger::create(layout.change_log_path(), "CHANGE DETECTION METADATA")?;

    let detector = TemporalAnomalyDetector::new(config.anomaly.clone());
    logged(layout.preflight(request, &detector), &logger)?;
    let boundary = logged(BoundaryPolygon::open(&config.boundary_path), &logger)?;

    let pipeline = ChangePipeline::new(config, layout, &boundary);
    let report = pipeline.run(request, &logger)?;
    logger.record(format!("Finished, {} output(s) written", report.outputs.len()));
    Ok(report)
}
