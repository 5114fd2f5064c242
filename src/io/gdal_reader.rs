//! GDAL raster backend and CRS mapper

use crate::core::projection::CoordinateMapper;
use crate::io::geotiff::{RasterReader, RasterStack};
use crate::types::{GeoTransform, GlofError, GlofResult, GridSpec, SpatialReference};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Reads any GDAL-supported raster
#[derive(Debug, Clone, Default)]
pub struct GdalRasterReader;

impl RasterReader for GdalRasterReader {
    fn read(&self, path: &Path) -> GlofResult<RasterStack> {
        log::info!("Reading raster with GDAL: {}", path.display());
        let gdal_err = |e: gdal::errors::GdalError| GlofError::data_access(path, e);

        let dataset = Dataset::open(path).map_err(gdal_err)?;
        let geo_transform = dataset.geo_transform().map_err(gdal_err)?;
        let (width, height) = dataset.raster_size();
        let crs = dataset
            .spatial_ref()
            .ok()
            .and_then(|srs| spatial_reference(&srs));

        log::debug!("Raster size: {}x{}", width, height);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let mut bands = Vec::with_capacity(dataset.raster_count());
        let mut nodata = None;
        for index in 1..=dataset.raster_count() {
            let band = dataset.rasterband(index).map_err(gdal_err)?;
            if index == 1 {
                nodata = band.no_data_value();
            }
            let buffer = band
                .read_as::<f32>((0, 0), (width, height), (width, height), None)
                .map_err(gdal_err)?;
            let (_, data) = buffer.into_shape_and_vec();
            let array = Array2::from_shape_vec((height, width), data)
                .map_err(|e| GlofError::data_access(path, format!("band {}: {}", index, e)))?;
            bands.push(array);
        }

        Ok(RasterStack {
            path: path.to_path_buf(),
            grid: GridSpec {
                height,
                width,
                transform: GeoTransform::from_gdal(geo_transform),
                crs,
            },
            nodata,
            bands,
        })
    }
}

fn spatial_reference(srs: &SpatialRef) -> Option<SpatialReference> {
    match srs.auth_code() {
        Ok(code) if code > 0 => Some(SpatialReference::Epsg(code as u32)),
        _ => srs.to_wkt().ok().filter(|w| !w.is_empty()).map(SpatialReference::Wkt),
    }
}

fn to_gdal(reference: &SpatialReference) -> GlofResult<SpatialRef> {
    let mut srs = match reference {
        SpatialReference::Epsg(code) => SpatialRef::from_epsg(*code)?,
        SpatialReference::Wkt(wkt) => SpatialRef::from_wkt(wkt)?,
    };
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// Maps coordinates through GDAL/PROJ for reference pairs the built-in
/// formulas do not cover.
///
/// GDAL transforms are not thread-safe, so one is built per `map` call.
#[derive(Debug, Clone)]
pub struct GdalCoordinateMapper {
    from: SpatialReference,
    to: SpatialReference,
}

impl GdalCoordinateMapper {
    pub fn new(from: SpatialReference, to: SpatialReference) -> GlofResult<Self> {
        // Fail early on references PROJ cannot resolve
        CoordTransform::new(&to_gdal(&from)?, &to_gdal(&to)?).map_err(|e| {
            GlofError::Alignment(format!("no transformation from {} to {}: {}", from, to, e))
        })?;
        Ok(Self { from, to })
    }
}

impl CoordinateMapper for GdalCoordinateMapper {
    fn map(&self, xs: &mut [f64], ys: &mut [f64]) -> GlofResult<()> {
        let transform = CoordTransform::new(&to_gdal(&self.from)?, &to_gdal(&self.to)?)?;
        let mut zs = vec![0.0; xs.len()];
        transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| GlofError::Alignment(format!("coordinate transform failed: {}", e)))
    }
}
