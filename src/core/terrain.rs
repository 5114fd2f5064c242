use crate::types::{GlofError, GlofResult, RasterImage};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use std::f32::consts::PI;

/// Parameters for terrain derivative computation
#[derive(Debug, Clone)]
pub struct TerrainParams {
    /// NDSI value above which a pixel counts as glacier
    pub glacier_ndsi_threshold: f32,
    /// Treat a constant elevation surface as an error instead of warning
    pub reject_flat_surface: bool,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            glacier_ndsi_threshold: 0.4,
            reject_flat_surface: false,
        }
    }
}

/// Terrain fields derived from the aligned elevation and NDSI
#[derive(Debug, Clone)]
pub struct TerrainDerivatives {
    pub slope: RasterImage,
    /// Radians in (-pi, pi]
    pub aspect: RasterImage,
    /// Pixels to the nearest glacier pixel; NaN everywhere when no glacier
    pub dist_to_glacier: RasterImage,
}

/// Sobel slope/aspect and glacier distance
pub struct TerrainAnalyzer {
    params: TerrainParams,
}

impl TerrainAnalyzer {
    pub fn new(params: TerrainParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(TerrainParams::default())
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Compute all terrain fields for one grid
    pub fn compute(&self, dem: &RasterImage, ndsi: &RasterImage) -> GlofResult<TerrainDerivatives> {
        log::info!("Computing terrain derivatives");
        if dem.dim() != ndsi.dim() {
            return Err(GlofError::Alignment(format!(
                "elevation shape {:?} differs from NDSI shape {:?}",
                dem.dim(),
                ndsi.dim()
            )));
        }

        let (slope, aspect) = self.slope_aspect(dem)?;
        let dist_to_glacier = self.distance_to_glacier(ndsi);

        Ok(TerrainDerivatives {
            slope,
            aspect,
            dist_to_glacier,
        })
    }

    /// Slope magnitude `hypot(gx, gy)` and aspect `atan2(gy, gx)`
    pub fn slope_aspect(&self, dem: &RasterImage) -> GlofResult<(RasterImage, RasterImage)> {
        let (height, width) = dem.dim();
        if height == 0 || width == 0 {
            return Err(GlofError::degenerate(
                "terrain derivatives",
                "elevation grid is empty",
            ));
        }

        if is_flat(dem) {
            if self.params.reject_flat_surface {
                return Err(GlofError::degenerate(
                    "terrain derivatives",
                    "elevation surface is constant",
                ));
            }
            log::warn!("Elevation surface is constant; slope and aspect will be zero everywhere");
        }

        let (gx, gy) = sobel_gradients(dem);
        let mut slope = Array2::zeros((height, width));
        let mut aspect = Array2::zeros((height, width));

        for i in 0..height {
            for j in 0..width {
                let dx = gx[[i, j]];
                let dy = gy[[i, j]];
                slope[[i, j]] = dx.hypot(dy);

                let a = dy.atan2(dx);
                aspect[[i, j]] = if a == -PI { PI } else { a };
            }
        }

        Ok((slope, aspect))
    }

    /// Glacier mask `ndsi > threshold`; NaN never counts as glacier
    pub fn glacier_mask(&self, ndsi: &RasterImage) -> Array2<bool> {
        let threshold = self.params.glacier_ndsi_threshold;
        ndsi.mapv(|v| v > threshold)
    }

    /// Euclidean distance in pixels to the nearest glacier pixel
    pub fn distance_to_glacier(&self, ndsi: &RasterImage) -> RasterImage {
        let mask = self.glacier_mask(ndsi);
        let glacier_pixels = mask.iter().filter(|m| **m).count();
        if glacier_pixels == 0 {
            log::warn!(
                "No pixel exceeds the glacier NDSI threshold {}; distance field is undefined",
                self.params.glacier_ndsi_threshold
            );
            return Array2::from_elem(ndsi.dim(), f32::NAN);
        }

        log::debug!("Glacier mask covers {} of {} pixels", glacier_pixels, mask.len());
        euclidean_distance_transform(&mask).mapv(|d| d as f32)
    }
}

/// Sobel gradients with reflected borders.
///
/// `gx` differentiates along columns and smooths along rows, `gy` the
/// transpose. Neither is scaled by pixel spacing.
pub fn sobel_gradients(dem: &RasterImage) -> (RasterImage, RasterImage) {
    let (height, width) = dem.dim();
    let mut gx = Array2::zeros((height, width));
    let mut gy = Array2::zeros((height, width));

    // reflect mode: index -1 -> 0, n -> n-1
    let up = |i: usize| i.saturating_sub(1);
    let down = |i: usize, n: usize| (i + 1).min(n - 1);

    for i in 0..height {
        let (im, ip) = (up(i), down(i, height));
        for j in 0..width {
            let (jm, jp) = (up(j), down(j, width));

            gx[[i, j]] = (dem[[im, jp]] - dem[[im, jm]])
                + 2.0 * (dem[[i, jp]] - dem[[i, jm]])
                + (dem[[ip, jp]] - dem[[ip, jm]]);

            gy[[i, j]] = (dem[[ip, jm]] - dem[[im, jm]])
                + 2.0 * (dem[[ip, j]] - dem[[im, j]])
                + (dem[[ip, jp]] - dem[[im, jp]]);
        }
    }

    (gx, gy)
}

fn is_flat(dem: &RasterImage) -> bool {
    let mut finite = dem.iter().filter(|v| v.is_finite());
    match finite.next() {
        Some(first) => finite.all(|v| v == first),
        None => false,
    }
}

/// Exact Euclidean distance transform: distance from each pixel to the
/// nearest `true` pixel. Every pixel is `inf` when the mask is empty.
pub fn euclidean_distance_transform(mask: &Array2<bool>) -> Array2<f64> {
    let (height, width) = mask.dim();
    let mut squared = mask.mapv(|m| if m { 0.0 } else { f64::INFINITY });

    // Columns first, then rows; each pass is independent per lane
    squared
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each(|mut column| {
            let f: Vec<f64> = column.iter().copied().collect();
            let mut out = vec![0.0; height];
            squared_edt_1d(&f, &mut out);
            for (dst, src) in column.iter_mut().zip(out) {
                *dst = src;
            }
        });

    squared
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let f: Vec<f64> = row.iter().copied().collect();
            let mut out = vec![0.0; width];
            squared_edt_1d(&f, &mut out);
            for (dst, src) in row.iter_mut().zip(out) {
                *dst = src;
            }
        });

    squared.mapv_inplace(f64::sqrt);
    squared
}

/// Felzenszwalb-Huttenlocher lower envelope of parabolas over one lane.
/// Infinite samples contribute no parabola.
fn squared_edt_1d(f: &[f64], out: &mut [f64]) {
    let mut vertices: Vec<usize> = Vec::with_capacity(f.len());
    let mut bounds: Vec<f64> = Vec::with_capacity(f.len());

    let intersect = |p: usize, q: usize| -> f64 {
        let (pf, qf) = (p as f64, q as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * (qf - pf))
    };

    for q in 0..f.len() {
        if !f[q].is_finite() {
            continue;
        }
        let mut s = f64::NEG_INFINITY;
        while let Some(&p) = vertices.last() {
            s = intersect(p, q);
            if s <= bounds[bounds.len() - 1] {
                vertices.pop();
                bounds.pop();
                s = f64::NEG_INFINITY;
            } else {
                break;
            }
        }
        vertices.push(q);
        bounds.push(s);
    }

    if vertices.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (q, value) in out.iter_mut().enumerate() {
        while k + 1 < vertices.len() && bounds[k + 1] < q as f64 {
            k += 1;
        }
        let d = q as f64 - vertices[k] as f64;
        *value = d * d + f[vertices[k]];
    }
}
