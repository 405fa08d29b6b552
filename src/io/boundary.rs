use crate::types::{ChangeError, ChangeResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{Geometry, MapCoords, MultiPolygon, Polygon};
use std::path::Path;

/// Study-area polygon together with the CRS its coordinates are expressed in.
///
/// Immutable once loaded; detectors share one instance per invocation.
#[derive(Debug, Clone)]
pub struct BoundaryPolygon {
    polygons: MultiPolygon<f64>,
    crs_wkt: String,
}

impl BoundaryPolygon {
    pub fn new(polygons: MultiPolygon<f64>, crs_wkt: impl Into<String>) -> Self {
        Self {
            polygons,
            crs_wkt: crs_wkt.into(),
        }
    }

    /// Load every polygon of the first layer of a vector dataset
    pub fn open<P: AsRef<Path>>(path: P) -> ChangeResult<Self> {
        let path = path.as_ref();
        log::info!("Reading study boundary from: {}", path.display());

        if !path.exists() {
            return Err(ChangeError::MissingBoundary(path.to_path_buf()));
        }

        let dataset = Dataset::open(path)?;
        if dataset.layer_count() < 1 {
            return Err(ChangeError::InvalidBoundary(format!(
                "{} contains no vector layer",
                path.display()
            )));
        }
        let mut layer = dataset.layer(0)?;
        let crs_wkt = layer
            .spatial_ref()
            .map(|srs| srs.to_wkt())
            .transpose()?
            .ok_or_else(|| {
                ChangeError::InvalidBoundary(format!("{} has no defined CRS", path.display()))
            })?;

        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        for feature in layer.features() {
            match feature.geometry_by_index(0)?.to_geo()? {
                Geometry::Polygon(polygon) => polygons.push(polygon),
                Geometry::MultiPolygon(multi) => polygons.extend(multi.0),
                other => log::warn!("Skipping non-polygon boundary geometry: {:?}", other),
            }
        }

        if polygons.is_empty() {
            return Err(ChangeError::InvalidBoundary(format!(
                "{} contains no polygon geometry",
                path.display()
            )));
        }

        log::debug!("Loaded {} boundary polygon(s)", polygons.len());
        Ok(Self::new(MultiPolygon(polygons), crs_wkt))
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    pub fn crs_wkt(&self) -> &str {
        &self.crs_wkt
    }

    /// The same boundary expressed in `target_wkt`, reprojecting when needed
    pub fn to_crs(&self, target_wkt: &str) -> ChangeResult<BoundaryPolygon> {
        if self.crs_wkt == target_wkt {
            return Ok(self.clone());
        }

        let source = traditional_srs(&self.crs_wkt)?;
        let target = traditional_srs(target_wkt)?;
        if source == target {
            return Ok(Self::new(self.polygons.clone(), target_wkt));
        }

        log::debug!("Reprojecting boundary to raster CRS");
        let transform = CoordTransform::new(&source, &target)?;
        let reprojected = self.polygons.try_map_coords(|coord| {
            let mut x = [coord.x];
            let mut y = [coord.y];
            let mut z = [0.0];
            transform.transform_coords(&mut x, &mut y, &mut z)?;
            Ok::<_, ChangeError>(geo::Coord { x: x[0], y: y[0] })
        })?;

        Ok(Self::new(reprojected, target_wkt))
    }
}

/// Spatial reference with x = easting/longitude regardless of the authority axis order
fn traditional_srs(wkt: &str) -> ChangeResult<SpatialRef> {
    let srs = SpatialRef::from_wkt(wkt)?;
    srs.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );
    Ok(srs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_missing_boundary() {
        let result = BoundaryPolygon::open("/nonexistent/boundary.gpkg");
        assert!(matches!(result, Err(ChangeError::MissingBoundary(_))));
    }

    #[test]
    fn test_same_crs_is_not_reprojected() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let boundary = BoundaryPolygon::new(MultiPolygon(vec![square]), "LOCAL_CS[\"test\"]");
        let same = boundary.to_crs("LOCAL_CS[\"test\"]").unwrap();
        assert_eq!(same.polygons(), boundary.polygons());
    }
}
