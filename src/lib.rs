//! landchange: multi-year land-cover change detection from Sentinel-2 composites
//!
//! Yearly 6-band reflectance composites are turned into NDVI, NDBI, NDWI and BSI
//! stacks, which are then compared with three methods: thresholded index
//! differencing, rule-based change classification and per-pixel temporal
//! Z-score anomalies. Every analysis is restricted to a study-area boundary.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    ChangeError, ChangeResult, Grid, IndexGrid, GeoTransform, RasterGrid,
    SpectralBand, SpectralBandSet, SpectralIndex, IndexStack, IndexMeans,
};

pub use config::ProjectConfig;
pub use io::{BoundaryPolygon, RasterWriter, RunLogger};
pub use pipeline::{
    run_detection, run_indices, ArtifactLayout, ChangePipeline, DetectionMethod,
    DetectionReport, DetectionRequest,
};
