use crate::types::{ChangeError, ChangeResult, GeoTransform, Grid, RasterGrid};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, ArrayView2};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lossless compression applied to every written GeoTIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compression {
    Lzw,
    Deflate,
}

impl Compression {
    pub fn gdal_name(self) -> &'static str {
        match self {
            Compression::Lzw => "LZW",
            Compression::Deflate => "DEFLATE",
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Lzw
    }
}

/// On-disk encoding chosen for an output raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterEncoding {
    Int8,
    Int16,
    Float32,
}

impl RasterEncoding {
    /// Nodata value attached to every band of this encoding
    pub fn nodata(self) -> f64 {
        match self {
            RasterEncoding::Int8 | RasterEncoding::Int16 => 0.0,
            RasterEncoding::Float32 => f64::NAN,
        }
    }
}

/// Element types that can be written through [`RasterWriter`]
pub trait RasterSample: Copy + Send + Sync + ToPrimitive {
    const IS_INTEGER: bool;
}

macro_rules! raster_sample {
    ($($t:ty => $int:expr),* $(,)?) => {
        $(impl RasterSample for $t {
            const IS_INTEGER: bool = $int;
        })*
    };
}

raster_sample!(i8 => true, i16 => true, i32 => true, i64 => true, u8 => true, u16 => true, f32 => false, f64 => false);

/// Choose the output encoding from the array content.
///
/// Integer data uses int8 when every value fits in [-128, 127] and int16
/// otherwise; floating data is always float32.
pub fn infer_encoding<T: RasterSample>(bands: &[ArrayView2<T>]) -> ChangeResult<RasterEncoding> {
    if !T::IS_INTEGER {
        return Ok(RasterEncoding::Float32);
    }

    let mut min = i64::MAX;
    let mut max = i64::MIN;
    for value in bands.iter().flat_map(|band| band.iter()) {
        let v = value
            .to_i64()
            .ok_or_else(|| ChangeError::Encoding("Integer value out of range".to_string()))?;
        min = min.min(v);
        max = max.max(v);
    }

    if min > max {
        // No pixels at all
        return Ok(RasterEncoding::Int8);
    }
    if min >= i8::MIN as i64 && max <= i8::MAX as i64 {
        Ok(RasterEncoding::Int8)
    } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
        Ok(RasterEncoding::Int16)
    } else {
        Err(ChangeError::Encoding(format!(
            "Values in [{}, {}] do not fit a 16-bit integer raster",
            min, max
        )))
    }
}

/// Optional tags attached to a written raster
#[derive(Debug, Clone, Default)]
pub struct WriteOptions<'a> {
    /// Dataset level `DESCRIPTION` metadata item
    pub description: Option<&'a str>,
    /// Per-band descriptions, in band order
    pub band_descriptions: &'a [&'a str],
}

/// Writes numeric grids as compressed GeoTIFFs with inferred encoding
#[derive(Debug, Clone, Default)]
pub struct RasterWriter {
    compression: Compression,
}

impl RasterWriter {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// Write one or more bands aligned to `grid`, replacing any existing file
    pub fn write<T: RasterSample, P: AsRef<Path>>(
        &self,
        output_path: P,
        grid: &RasterGrid,
        bands: &[ArrayView2<T>],
        options: &WriteOptions,
    ) -> ChangeResult<RasterEncoding> {
        let output_path = output_path.as_ref();
        if bands.is_empty() {
            return Err(ChangeError::Processing("No bands to write".to_string()));
        }
        for band in bands {
            if band.dim() != grid.shape() {
                return Err(ChangeError::Processing(format!(
                    "Band shape {:?} does not match grid shape {:?}",
                    band.dim(),
                    grid.shape()
                )));
            }
        }

        let encoding = infer_encoding(bands)?;
        log::debug!(
            "Writing {} band(s) to {} as {:?}",
            bands.len(),
            output_path.display(),
            encoding
        );

        match encoding {
            RasterEncoding::Int8 => self.write_encoded::<u8, T>(
                output_path,
                grid,
                bands,
                encoding,
                options,
                // GTiff stores int8 as two's complement bytes
                |v| v.to_i64().map(|i| i as i8 as u8).unwrap_or(0),
                &[("PIXELTYPE", "SIGNEDBYTE")],
            )?,
            RasterEncoding::Int16 => self.write_encoded::<i16, T>(
                output_path,
                grid,
                bands,
                encoding,
                options,
                |v| v.to_i64().map(|i| i as i16).unwrap_or(0),
                &[],
            )?,
            RasterEncoding::Float32 => self.write_encoded::<f32, T>(
                output_path,
                grid,
                bands,
                encoding,
                options,
                |v| v.to_f32().unwrap_or(f32::NAN),
                &[],
            )?,
        }

        log::info!("Saved {}", output_path.display());
        Ok(encoding)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_encoded<E: GdalType + Copy, T: RasterSample>(
        &self,
        output_path: &Path,
        grid: &RasterGrid,
        bands: &[ArrayView2<T>],
        encoding: RasterEncoding,
        options: &WriteOptions,
        convert: impl Fn(T) -> E,
        extra_options: &[(&str, &str)],
    ) -> ChangeResult<()> {
        let (height, width) = grid.shape();

        let mut creation_options = vec![RasterCreationOption {
            key: "COMPRESS",
            value: self.compression.gdal_name(),
        }];
        creation_options.extend(
            extra_options
                .iter()
                .map(|&(key, value)| RasterCreationOption { key, value }),
        );

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type_with_options::<E, _>(
            output_path,
            width as isize,
            height as isize,
            bands.len() as isize,
            &creation_options,
        )?;

        dataset.set_geo_transform(&grid.geo_transform.to_gdal())?;
        if !grid.crs_wkt.is_empty() {
            dataset.set_projection(&grid.crs_wkt)?;
        }

        for (i, band) in bands.iter().enumerate() {
            let mut rasterband = dataset.rasterband(i as isize + 1)?;
            let flat_data: Vec<E> = band.iter().map(|&v| convert(v)).collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(encoding.nodata()))?;
            if let Some(description) = options.band_descriptions.get(i) {
                rasterband.set_description(description)?;
            }
        }

        if let Some(description) = options.description {
            dataset.set_metadata_item("DESCRIPTION", description, "")?;
        }

        Ok(())
    }
}

/// Bands of one raster together with its grid
#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub grid: RasterGrid,
    pub bands: Vec<Grid>,
}

/// Open an existing raster, failing with `InputMissing` when absent
pub fn open_raster<P: AsRef<Path>>(path: P) -> ChangeResult<Dataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ChangeError::InputMissing(path.to_path_buf()));
    }
    Ok(Dataset::open(path)?)
}

/// Grid description of an open dataset
pub fn read_grid(dataset: &Dataset) -> ChangeResult<RasterGrid> {
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count().max(0) as usize;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let nodata = if band_count > 0 {
        dataset.rasterband(1)?.no_data_value()
    } else {
        None
    };

    Ok(RasterGrid {
        crs_wkt: dataset.projection(),
        geo_transform,
        width,
        height,
        band_count,
        nodata,
    })
}

/// Read one band as f64, turning the declared nodata value into NaN
pub fn read_band(dataset: &Dataset, band_number: isize) -> ChangeResult<Grid> {
    let (width, height) = dataset.raster_size();
    read_window(dataset, band_number, (height, width))
}

/// Read the top-left `rows x cols` window of one band (clamped to the raster)
pub fn read_window(
    dataset: &Dataset,
    band_number: isize,
    window: (usize, usize),
) -> ChangeResult<Grid> {
    let (width, height) = dataset.raster_size();
    let rows = window.0.min(height);
    let cols = window.1.min(width);

    let rasterband = dataset.rasterband(band_number)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;

    let mut array = Array2::from_shape_vec((rows, cols), band_data.data)
        .map_err(|e| ChangeError::Processing(format!("Failed to reshape band data: {}", e)))?;

    if let Some(nodata) = nodata.filter(|v| !v.is_nan()) {
        array.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }
    Ok(array)
}

/// Read the requested 1-based bands of a raster file
pub fn read_raster<P: AsRef<Path>>(path: P, band_numbers: &[isize]) -> ChangeResult<RasterLayer> {
    let path = path.as_ref();
    let dataset = open_raster(path)?;
    let grid = read_grid(&dataset)?;

    if let Some(&missing) = band_numbers
        .iter()
        .find(|&&b| b < 1 || b as usize > grid.band_count)
    {
        return Err(ChangeError::Processing(format!(
            "{} has {} band(s), band {} requested",
            path.display(),
            grid.band_count,
            missing
        )));
    }

    let bands = band_numbers
        .iter()
        .map(|&b| read_band(&dataset, b))
        .collect::<ChangeResult<Vec<_>>>()?;

    Ok(RasterLayer { grid, bands })
}
