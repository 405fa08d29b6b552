use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reflectance or index values as read from disk and used in arithmetic
pub type Grid = Array2<f64>;

/// Index values as persisted (float32 on disk)
pub type IndexGrid = Array2<f32>;

/// Spectral bands of the yearly composite, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralBand {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl SpectralBand {
    /// All bands in the order they appear in the source raster
    pub const ORDER: [SpectralBand; 6] = [
        SpectralBand::Blue,
        SpectralBand::Green,
        SpectralBand::Red,
        SpectralBand::Nir,
        SpectralBand::Swir1,
        SpectralBand::Swir2,
    ];

    /// 1-based band number in the source raster
    pub fn band_number(self) -> isize {
        match self {
            SpectralBand::Blue => 1,
            SpectralBand::Green => 2,
            SpectralBand::Red => 3,
            SpectralBand::Nir => 4,
            SpectralBand::Swir1 => 5,
            SpectralBand::Swir2 => 6,
        }
    }
}

/// Normalized-difference indices stored in an index stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpectralIndex {
    Ndvi,
    Ndbi,
    Ndwi,
    Bsi,
}

impl SpectralIndex {
    /// Band order of the index stack artifact
    pub const ORDER: [SpectralIndex; 4] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndbi,
        SpectralIndex::Ndwi,
        SpectralIndex::Bsi,
    ];

    /// 1-based band number inside an index stack
    pub fn band_number(self) -> isize {
        match self {
            SpectralIndex::Ndvi => 1,
            SpectralIndex::Ndbi => 2,
            SpectralIndex::Ndwi => 3,
            SpectralIndex::Bsi => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Bsi => "BSI",
        }
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SpectralIndex {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NDVI" => Ok(SpectralIndex::Ndvi),
            "NDBI" => Ok(SpectralIndex::Ndbi),
            "NDWI" => Ok(SpectralIndex::Ndwi),
            "BSI" => Ok(SpectralIndex::Bsi),
            _ => Err(ChangeError::InvalidArgument(format!("Unknown spectral index: {}", s))),
        }
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }
}

/// Grid description of a raster: CRS, affine transform and dimensions.
///
/// Two rasters may only be combined pixel by pixel when their grids are
/// comparable, i.e. CRS, transform and dimensions match exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    /// Coordinate reference system as WKT
    pub crs_wkt: String,
    pub geo_transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub nodata: Option<f64>,
}

impl RasterGrid {
    /// Array shape (rows, cols) of one band
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn is_comparable(&self, other: &RasterGrid) -> bool {
        self.mismatch_reason(other).is_none()
    }

    fn mismatch_reason(&self, other: &RasterGrid) -> Option<String> {
        if self.width != other.width || self.height != other.height {
            return Some(format!(
                "dimensions {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            ));
        }
        if self.geo_transform != other.geo_transform {
            return Some(format!(
                "transform {:?} vs {:?}",
                self.geo_transform.to_gdal(),
                other.geo_transform.to_gdal()
            ));
        }
        if self.crs_wkt != other.crs_wkt {
            return Some("coordinate reference systems differ".to_string());
        }
        None
    }

    /// Fail with `GridMismatch` unless both grids are comparable
    pub fn ensure_comparable(
        &self,
        other: &RasterGrid,
        left: &str,
        right: &str,
    ) -> ChangeResult<()> {
        match self.mismatch_reason(other) {
            None => Ok(()),
            Some(reason) => Err(ChangeError::GridMismatch {
                left: left.to_string(),
                right: right.to_string(),
                reason,
            }),
        }
    }
}

/// Reflectance bands of one yearly composite, scaled to [0, 1]
#[derive(Debug, Clone)]
pub struct SpectralBandSet {
    pub blue: Grid,
    pub green: Grid,
    pub red: Grid,
    pub nir: Grid,
    pub swir1: Grid,
    /// Not used by any index formula; absent in 5-band sources
    pub swir2: Option<Grid>,
}

impl SpectralBandSet {
    /// Build a band set from raw bands in file order, dividing by `scale_factor`
    pub fn from_raw(mut raw: Vec<Grid>, scale_factor: f64) -> ChangeResult<Self> {
        if raw.len() < 5 {
            return Err(ChangeError::Processing(format!(
                "Expected at least 5 bands, got {}",
                raw.len()
            )));
        }
        let shape = raw[0].dim();
        if raw.iter().any(|band| band.dim() != shape) {
            return Err(ChangeError::Processing(
                "Source bands have inconsistent shapes".to_string(),
            ));
        }

        for band in raw.iter_mut() {
            band.mapv_inplace(|v| v / scale_factor);
        }

        let mut bands = raw.into_iter();
        let mut next = || bands.next().unwrap_or_default();
        let blue = next();
        let green = next();
        let red = next();
        let nir = next();
        let swir1 = next();
        let swir2 = bands.next();

        Ok(Self { blue, green, red, nir, swir1, swir2 })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.blue.dim()
    }
}

/// The four indices of one year, aligned to one grid
#[derive(Debug, Clone)]
pub struct IndexStack {
    pub ndvi: IndexGrid,
    pub ndbi: IndexGrid,
    pub ndwi: IndexGrid,
    pub bsi: IndexGrid,
}

impl IndexStack {
    pub fn get(&self, index: SpectralIndex) -> &IndexGrid {
        match index {
            SpectralIndex::Ndvi => &self.ndvi,
            SpectralIndex::Ndbi => &self.ndbi,
            SpectralIndex::Ndwi => &self.ndwi,
            SpectralIndex::Bsi => &self.bsi,
        }
    }

    /// NaN-ignoring mean of every index, in stack order
    pub fn means(&self) -> IndexMeans {
        IndexMeans {
            ndvi: nan_mean(self.ndvi.iter().map(|&v| v as f64)),
            ndbi: nan_mean(self.ndbi.iter().map(|&v| v as f64)),
            ndwi: nan_mean(self.ndwi.iter().map(|&v| v as f64)),
            bsi: nan_mean(self.bsi.iter().map(|&v| v as f64)),
        }
    }
}

/// Mean value of each index, NaN when a band has no valid pixel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexMeans {
    pub ndvi: f64,
    pub ndbi: f64,
    pub ndwi: f64,
    pub bsi: f64,
}

/// Mean of the finite values of an iterator
pub fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Error types for index computation and change detection
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Source raster {path} cannot be read: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Source raster {path} has {found} bands, at least {expected} required")]
    BandCountMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Required input is missing: {0}")]
    InputMissing(PathBuf),

    #[error("Boundary vector is missing: {0}")]
    MissingBoundary(PathBuf),

    #[error("Invalid boundary: {0}")]
    InvalidBoundary(String),

    #[error("Grids of {left} and {right} are not comparable: {reason}")]
    GridMismatch {
        left: String,
        right: String,
        reason: String,
    },

    #[error("Insufficient history for target year {target_year}: {available} historical year(s) available")]
    InsufficientHistory { target_year: i32, available: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for change detection operations
pub type ChangeResult<T> = Result<T, ChangeError>;
