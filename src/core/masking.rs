//! Boundary masking of index rasters
//!
//! Every change-detection method runs on grids masked to the study area:
//! pixels whose centre lies outside the boundary polygon become NaN. The grid
//! keeps its full extent; nothing is cropped.

use crate::io::boundary::BoundaryPolygon;
use crate::io::raster::{read_raster, RasterLayer};
use crate::types::{ChangeResult, GeoTransform, Grid, RasterGrid};
use geo::{BoundingRect, Intersects, MultiPolygon, Point};
use ndarray::{Array2, Zip};
use std::path::Path;

/// Inside/outside mask of a grid: `true` where the pixel centre is inside
/// the polygon or on its edge
pub fn polygon_mask(
    polygons: &MultiPolygon<f64>,
    transform: &GeoTransform,
    shape: (usize, usize),
) -> Array2<bool> {
    let mut mask = Array2::from_elem(shape, false);
    let Some(bounds) = polygons.bounding_rect() else {
        return mask;
    };

    Zip::indexed(&mut mask).par_for_each(|(row, col), inside| {
        let (x, y) = transform.pixel_center(row, col);
        if x < bounds.min().x || x > bounds.max().x || y < bounds.min().y || y > bounds.max().y {
            return;
        }
        *inside = polygons.intersects(&Point::new(x, y));
    });
    mask
}

/// Set every pixel outside `mask` to NaN, returning how many were masked
pub fn apply_mask(data: &mut Grid, mask: &Array2<bool>) -> usize {
    let mut masked = 0;
    Zip::from(data).and(mask).for_each(|v, &inside| {
        if !inside {
            *v = f64::NAN;
            masked += 1;
        }
    });
    masked
}

/// Clips rasters to the study boundary.
///
/// Holds a shared reference to the boundary; the polygon is reprojected to
/// each raster's CRS on demand.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryMasker<'a> {
    boundary: &'a BoundaryPolygon,
}

impl<'a> BoundaryMasker<'a> {
    pub fn new(boundary: &'a BoundaryPolygon) -> Self {
        Self { boundary }
    }

    /// Inside/outside mask of `grid`
    pub fn mask_for(&self, grid: &RasterGrid) -> ChangeResult<Array2<bool>> {
        let boundary = self.boundary.to_crs(&grid.crs_wkt)?;
        Ok(polygon_mask(boundary.polygons(), &grid.geo_transform, grid.shape()))
    }

    /// Mask every band of an in-memory raster in place
    pub fn mask_layer(&self, layer: &mut RasterLayer) -> ChangeResult<()> {
        let mask = self.mask_for(&layer.grid)?;
        let mut masked = 0;
        for band in layer.bands.iter_mut() {
            masked = apply_mask(band, &mask);
        }
        log::debug!(
            "Boundary mask: {} of {} pixels outside the study area",
            masked,
            mask.len()
        );
        Ok(())
    }

    /// Read the requested bands of a raster and mask them to the boundary
    pub fn load_masked<P: AsRef<Path>>(
        &self,
        path: P,
        band_numbers: &[isize],
    ) -> ChangeResult<RasterLayer> {
        let path = path.as_ref();
        log::debug!("Loading {} masked to study boundary", path.display());
        let mut layer = read_raster(path, band_numbers)?;
        self.mask_layer(&mut layer)?;
        Ok(layer)
    }
}
