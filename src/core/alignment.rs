use crate::core::projection::{mapper_for, CoordinateMapper};
use crate::types::{GlofError, GlofResult, GridSpec, RasterGrid, RasterImage};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Resampling kernels supported by the aligner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    Bilinear,
    Nearest,
}

/// Parameters for grid alignment
#[derive(Debug, Clone)]
pub struct AlignmentParams {
    /// Kernel used to sample the source grid
    pub method: ResamplingMethod,
    /// Fail when no destination pixel receives a valid value
    pub require_overlap: bool,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            method: ResamplingMethod::Bilinear,
            require_overlap: true,
        }
    }
}

/// Resamples a raster onto the exact pixel grid of another raster
pub struct GridAligner {
    params: AlignmentParams,
}

impl GridAligner {
    pub fn new(params: AlignmentParams) -> Self {
        Self { params }
    }

    /// Bilinear aligner that rejects non-overlapping grids
    pub fn standard() -> Self {
        Self::new(AlignmentParams::default())
    }

    /// Resample `source` onto `target`, choosing the coordinate mapping from
    /// the two reference systems.
    pub fn align(&self, source: &RasterGrid, target: &GridSpec) -> GlofResult<RasterGrid> {
        let mapper = match mapper_for(target.crs.as_ref(), source.grid.crs.as_ref()) {
            Ok(mapper) => mapper,
            #[cfg(feature = "gdal")]
            Err(GlofError::Alignment(reason)) => match (&target.crs, &source.grid.crs) {
                (Some(to), Some(from)) => {
                    log::debug!("{}; falling back to GDAL", reason);
                    Box::new(crate::io::GdalCoordinateMapper::new(to.clone(), from.clone())?)
                }
                _ => return Err(GlofError::Alignment(reason)),
            },
            Err(e) => return Err(e),
        };
        self.align_with_mapper(source, target, mapper.as_ref())
    }

    /// Resample `source` onto `target` using an explicit mapper taking
    /// target coordinates into source coordinates.
    pub fn align_with_mapper(
        &self,
        source: &RasterGrid,
        target: &GridSpec,
        mapper: &dyn CoordinateMapper,
    ) -> GlofResult<RasterGrid> {
        log::info!(
            "Aligning {}x{} source grid onto {}x{} target grid",
            source.grid.height,
            source.grid.width,
            target.height,
            target.width
        );
        log::debug!("Source transform: {:?}", source.grid.transform);
        log::debug!("Target transform: {:?}", target.transform);

        if !source.grid.transform.is_invertible() {
            return Err(GlofError::Alignment(
                "source geotransform is singular".to_string(),
            ));
        }
        let (source_height, source_width) = source.data.dim();
        if source_height == 0 || source_width == 0 {
            return Err(GlofError::Alignment("source grid is empty".to_string()));
        }

        let source_data = mask_nodata(&source.data, source.nodata);
        let mut aligned = Array2::<f32>::from_elem(target.shape(), f32::NAN);

        aligned
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .try_for_each(|(row, mut out_row)| -> GlofResult<()> {
                let mut xs = Vec::with_capacity(target.width);
                let mut ys = Vec::with_capacity(target.width);
                for col in 0..target.width {
                    let (x, y) = target
                        .transform
                        .pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
                    xs.push(x);
                    ys.push(y);
                }
                mapper.map(&mut xs, &mut ys)?;

                for col in 0..target.width {
                    // geo_to_pixel cannot fail here: invertibility checked above
                    if let Some((src_col, src_row)) =
                        source.grid.transform.geo_to_pixel(xs[col], ys[col])
                    {
                        out_row[col] = match self.params.method {
                            ResamplingMethod::Bilinear => {
                                sample_bilinear(&source_data, src_col - 0.5, src_row - 0.5)
                            }
                            ResamplingMethod::Nearest => {
                                sample_nearest(&source_data, src_col, src_row)
                            }
                        };
                    }
                }
                Ok(())
            })?;

        let valid = aligned.iter().filter(|v| !v.is_nan()).count();
        log::info!(
            "Alignment produced {} valid pixels of {}",
            valid,
            target.pixel_count()
        );
        if self.params.require_overlap && valid == 0 && target.pixel_count() > 0 {
            return Err(GlofError::degenerate(
                "grid alignment",
                "source raster does not overlap the target grid (every aligned pixel is undefined)",
            ));
        }

        Ok(RasterGrid {
            data: aligned,
            grid: target.clone(),
            nodata: None,
        })
    }
}

fn mask_nodata(data: &RasterImage, nodata: Option<f64>) -> RasterImage {
    match nodata {
        Some(value) if !value.is_nan() => {
            let nodata = value as f32;
            data.mapv(|v| if v == nodata { f32::NAN } else { v })
        }
        _ => data.clone(),
    }
}

/// Bilinear sample at fractional pixel-centre coordinates.
///
/// Positions inside the half-pixel border clamp to the edge samples; positions
/// further out are undefined. A NaN neighbour with non-zero weight yields NaN.
fn sample_bilinear(data: &RasterImage, x: f64, y: f64) -> f32 {
    let (height, width) = data.dim();
    if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
        return f32::NAN;
    }

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);

    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let taps = [
        (data[[y1, x1]], (1.0 - dx) * (1.0 - dy)),
        (data[[y1, x2]], dx * (1.0 - dy)),
        (data[[y2, x1]], (1.0 - dx) * dy),
        (data[[y2, x2]], dx * dy),
    ];

    let mut interpolated = 0.0f64;
    for (value, weight) in taps {
        if weight == 0.0 {
            continue;
        }
        if value.is_nan() {
            return f32::NAN;
        }
        interpolated += value as f64 * weight;
    }
    interpolated as f32
}

fn sample_nearest(data: &RasterImage, col: f64, row: f64) -> f32 {
    let (height, width) = data.dim();
    if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
        return f32::NAN;
    }
    data[[row.floor() as usize, col.floor() as usize]]
}
