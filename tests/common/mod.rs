#![allow(dead_code)]

use gdal::spatial_ref::SpatialRef;
use landchange::io::raster::{RasterWriter, WriteOptions};
use landchange::types::{GeoTransform, RasterGrid};
use ndarray::{Array2, ArrayView2};
use std::path::Path;

pub const ORIGIN_X: f64 = 300_000.0;
pub const ORIGIN_Y: f64 = 6_300_000.0;
pub const PIXEL: f64 = 10.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// WGS 84 / UTM zone 19S
pub fn utm_wkt() -> String {
    SpatialRef::from_epsg(32719)
        .and_then(|srs| srs.to_wkt())
        .expect("EPSG:32719 should be known to PROJ")
}

pub fn utm_grid(rows: usize, cols: usize, band_count: usize) -> RasterGrid {
    RasterGrid {
        crs_wkt: utm_wkt(),
        geo_transform: GeoTransform::from_gdal([ORIGIN_X, PIXEL, 0.0, ORIGIN_Y, 0.0, -PIXEL]),
        width: cols,
        height: rows,
        band_count,
        nodata: None,
    }
}

pub fn write_bands<T: landchange::io::raster::RasterSample>(
    path: &Path,
    grid: &RasterGrid,
    bands: &[Array2<T>],
) {
    let views: Vec<ArrayView2<T>> = bands.iter().map(|b| b.view()).collect();
    let mut grid = grid.clone();
    grid.band_count = bands.len();
    RasterWriter::default()
        .write(path, &grid, &views, &WriteOptions::default())
        .expect("Failed to write test raster");
}

/// Index stack with NDVI, NDBI, NDWI, BSI in band order
pub fn write_index_stack(
    path: &Path,
    grid: &RasterGrid,
    ndvi: Array2<f32>,
    ndbi: Array2<f32>,
    ndwi: Array2<f32>,
) {
    let bsi = Array2::<f32>::zeros(ndvi.dim());
    write_bands(path, grid, &[ndvi, ndbi, ndwi, bsi]);
}

/// GeoJSON polygon with an explicit projected CRS member
pub fn write_utm_boundary(path: &Path, ring: &[(f64, f64)]) {
    let coords: Vec<String> = ring.iter().map(|(x, y)| format!("[{}, {}]", x, y)).collect();
    let json = format!(
        r#"{{
  "type": "FeatureCollection",
  "crs": {{ "type": "name", "properties": {{ "name": "urn:ogc:def:crs:EPSG::32719" }} }},
  "features": [
    {{ "type": "Feature", "properties": {{ "name": "study area" }},
       "geometry": {{ "type": "Polygon", "coordinates": [[{}]] }} }}
  ]
}}"#,
        coords.join(", ")
    );
    std::fs::write(path, json).expect("Failed to write boundary");
}

/// GeoJSON polygon in WGS 84 longitude/latitude
pub fn write_lonlat_boundary(path: &Path, ring: &[(f64, f64)]) {
    let coords: Vec<String> = ring.iter().map(|(x, y)| format!("[{}, {}]", x, y)).collect();
    let json = format!(
        r#"{{
  "type": "FeatureCollection",
  "features": [
    {{ "type": "Feature", "properties": {{}},
       "geometry": {{ "type": "Polygon", "coordinates": [[{}]] }} }}
  ]
}}"#,
        coords.join(", ")
    );
    std::fs::write(path, json).expect("Failed to write boundary");
}

/// Closed rectangle ring covering the first `cols` columns of every row
pub fn column_strip(rows: usize, cols: usize) -> Vec<(f64, f64)> {
    let x1 = ORIGIN_X + cols as f64 * PIXEL;
    let y1 = ORIGIN_Y - rows as f64 * PIXEL;
    vec![
        (ORIGIN_X, ORIGIN_Y),
        (x1, ORIGIN_Y),
        (x1, y1),
        (ORIGIN_X, y1),
        (ORIGIN_X, ORIGIN_Y),
    ]
}

/// Int8 classes read back as f64, nodata already NaN
pub fn signed_class(v: f64) -> i8 {
    if v.is_nan() {
        0
    } else if v > 127.0 {
        (v - 256.0) as i8
    } else {
        v as i8
    }
}
