use crate::core::scale::{detect_scale, ReflectanceScale};
use crate::io::raster::{read_band, read_grid, read_window, RasterWriter, WriteOptions};
use crate::io::RunLogger;
use crate::types::{
    ChangeError, ChangeResult, Grid, IndexGrid, IndexMeans, IndexStack, SpectralBand,
    SpectralBandSet, SpectralIndex,
};
use gdal::Dataset;
use ndarray::{Array2, Zip};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bands the index formulas depend on (SWIR2 is optional)
pub const REQUIRED_BANDS: usize = 5;

/// Tolerance beyond [-1, 1] before an index value is reported as suspicious
const INDEX_RANGE_TOLERANCE: f32 = 1e-6;

/// Index computation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Stabilizer added to every normalized-difference denominator
    pub epsilon: f64,
    /// Side of the top-left window sampled for scale detection
    pub sample_window: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-10,
            sample_window: 10,
        }
    }
}

/// Result of processing a directory of yearly composites
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successfully processed years with their index means, sorted by year
    pub processed: Vec<(i32, IndexMeans)>,
    /// Source files that failed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Computes NDVI, NDBI, NDWI and BSI stacks from 6-band reflectance composites
#[derive(Debug, Clone, Default)]
pub struct IndexEngine {
    params: IndexParams,
    writer: RasterWriter,
}

impl IndexEngine {
    pub fn new(params: IndexParams, writer: RasterWriter) -> Self {
        Self { params, writer }
    }

    /// Compute the four indices of a reflectance band set.
    ///
    /// Pixels where Blue+Green+Red+NIR+SWIR1 is exactly zero are outside the
    /// sensor footprint and become NaN in every index.
    pub fn compute(&self, bands: &SpectralBandSet) -> IndexStack {
        let eps = self.params.epsilon;

        let mut footprint = Array2::from_elem(bands.shape(), true);
        Zip::from(&mut footprint)
            .and(&bands.blue)
            .and(&bands.green)
            .and(&bands.red)
            .and(&bands.nir)
            .and(&bands.swir1)
            .par_for_each(|valid, &b, &g, &r, &n, &s| {
                *valid = b + g + r + n + s != 0.0;
            });

        let normalized = |a: &Grid, b: &Grid| -> IndexGrid {
            let mut out = Array2::<f32>::zeros(a.dim());
            Zip::from(&mut out)
                .and(a)
                .and(b)
                .and(&footprint)
                .par_for_each(|o, &a, &b, &valid| {
                    *o = if valid {
                        ((a - b) / (a + b + eps)) as f32
                    } else {
                        f32::NAN
                    };
                });
            out
        };

        let ndvi = normalized(&bands.nir, &bands.red);
        let ndbi = normalized(&bands.swir1, &bands.nir);
        let ndwi = normalized(&bands.green, &bands.nir);

        // BSI contrasts (SWIR1 + Red) against (NIR + Blue)
        let soil = &bands.swir1 + &bands.red;
        let cover = &bands.nir + &bands.blue;
        let bsi = normalized(&soil, &cover);

        IndexStack { ndvi, ndbi, ndwi, bsi }
    }

    /// Read a source composite as a scaled reflectance band set
    pub fn read_source<P: AsRef<Path>>(&self, source: P) -> ChangeResult<(Dataset, SpectralBandSet)> {
        let source = source.as_ref();
        let dataset = Dataset::open(source).map_err(|e| ChangeError::SourceUnreadable {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;

        let band_count = dataset.raster_count().max(0) as usize;
        if band_count < REQUIRED_BANDS {
            return Err(ChangeError::BandCountMismatch {
                path: source.to_path_buf(),
                expected: REQUIRED_BANDS,
                found: band_count,
            });
        }

        let window = self.params.sample_window;
        let sample = read_window(&dataset, SpectralBand::Blue.band_number(), (window, window))?;
        let scale = detect_scale(sample.view());
        if scale == ReflectanceScale::DigitalNumber {
            log::debug!("{} holds digital numbers, scaling by {}", source.display(), scale.factor());
        }

        let raw = SpectralBand::ORDER
            .iter()
            .filter(|band| (band.band_number() as usize) <= band_count)
            .map(|band| read_band(&dataset, band.band_number()))
            .collect::<ChangeResult<Vec<_>>>()?;

        let bands = SpectralBandSet::from_raw(raw, scale.factor())?;
        Ok((dataset, bands))
    }

    /// Compute and persist the index stack of one source composite.
    ///
    /// Returns the NaN-ignoring mean of every index.
    pub fn process_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        destination: Q,
    ) -> ChangeResult<IndexMeans> {
        let source = source.as_ref();
        let destination = destination.as_ref();
        log::info!("Computing spectral indices for {}", source.display());

        let (dataset, bands) = self.read_source(source)?;
        let mut grid = read_grid(&dataset)?;
        drop(dataset);

        let stack = self.compute(&bands);
        warn_out_of_range(&stack, source);

        grid.band_count = SpectralIndex::ORDER.len();
        let descriptions: Vec<&str> = SpectralIndex::ORDER.iter().map(|i| i.name()).collect();
        let views: Vec<_> = SpectralIndex::ORDER.iter().map(|&i| stack.get(i).view()).collect();
        self.writer.write(
            destination,
            &grid,
            &views,
            &WriteOptions {
                description: Some("Spectral indices NDVI, NDBI, NDWI, BSI"),
                band_descriptions: &descriptions,
            },
        )?;

        Ok(stack.means())
    }

    /// Process every `<prefix>_<YYYY>.tif` in `raw_dir` into `indices_<YYYY>.tif`.
    ///
    /// A failing year is logged and skipped; the remaining years still run.
    pub fn process_directory<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        raw_dir: P,
        processed_dir: Q,
        source_prefix: &str,
        logger: &RunLogger,
    ) -> ChangeResult<BatchReport> {
        let processed_dir = processed_dir.as_ref();
        std::fs::create_dir_all(processed_dir)?;

        let sources = find_sources(raw_dir.as_ref(), source_prefix)?;
        log::info!("Found {} source composite(s)", sources.len());

        let process = |(year, source): &(i32, PathBuf)| {
            let name = index_file_name(*year);
            let result = self.process_file(source, processed_dir.join(&name));
            match &result {
                Ok(means) => log_index_means(logger, &name, *year, means),
                Err(e) => logger.record(format!(
                    "Error processing {}: {}",
                    source.file_name().unwrap_or_default().to_string_lossy(),
                    e
                )),
            }
            (*year, source.clone(), result)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = {
            use rayon::prelude::*;
            sources.par_iter().map(process).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = sources.iter().map(process).collect();

        let mut report = BatchReport::default();
        for (year, source, result) in results {
            match result {
                Ok(means) => report.processed.push((year, means)),
                Err(e) => report.failed.push((source, e.to_string())),
            }
        }

        log::info!(
            "Index computation finished: {} processed, {} failed",
            report.processed.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// File name of the index stack of `year`
pub fn index_file_name(year: i32) -> String {
    format!("indices_{}.tif", year)
}

/// Source composites `<prefix>_<YYYY>.tif` in `raw_dir`, sorted by year
pub fn find_sources(raw_dir: &Path, prefix: &str) -> ChangeResult<Vec<(i32, PathBuf)>> {
    if !raw_dir.is_dir() {
        return Err(ChangeError::InputMissing(raw_dir.to_path_buf()));
    }

    let pattern = Regex::new(&format!(r"^{}_(\d{{4}})\.tif$", regex::escape(prefix)))
        .map_err(|e| ChangeError::InvalidArgument(e.to_string()))?;

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(raw_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(year) = pattern
            .captures(name)
            .and_then(|caps| caps[1].parse::<i32>().ok())
        {
            sources.push((year, path));
        }
    }

    sources.sort();
    Ok(sources)
}

fn log_index_means(logger: &RunLogger, file_name: &str, year: i32, means: &IndexMeans) {
    logger.record(format!(
        "File: {} | Year: {} | Bands: 1:NDVI, 2:NDBI, 3:NDWI, 4:BSI | Mean NDVI {:.3}, NDBI {:.3}, NDWI {:.3}, BSI {:.3}",
        file_name, year, means.ndvi, means.ndbi, means.ndwi, means.bsi
    ));
}

fn warn_out_of_range(stack: &IndexStack, source: &Path) {
    let limit = 1.0 + INDEX_RANGE_TOLERANCE;
    for index in SpectralIndex::ORDER {
        let outside = stack
            .get(index)
            .iter()
            .filter(|v| v.is_finite() && v.abs() > limit)
            .count();
        if outside > 0 {
            log::warn!(
                "{}: {} {} value(s) outside [-1, 1], check source scaling and grid",
                source.display(),
                outside,
                index
            );
        }
    }
}
