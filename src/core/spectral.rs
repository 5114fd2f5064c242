use crate::types::{GlofError, GlofResult, RasterImage};
use ndarray::{Array2, Zip};
use num_traits::Float;

/// Reflectance bands consumed by the index engine, all on one grid
#[derive(Debug, Clone)]
pub struct BandSet {
    pub blue: RasterImage,
    pub green: RasterImage,
    pub red: RasterImage,
    pub nir: RasterImage,
    pub swir1: RasterImage,
    pub swir2: RasterImage,
}

impl BandSet {
    pub fn shape(&self) -> (usize, usize) {
        self.green.dim()
    }

    /// Check that every band shares the grid shape of the green band
    pub fn validate(&self) -> GlofResult<()> {
        let shape = self.shape();
        let bands = [
            ("blue", &self.blue),
            ("red", &self.red),
            ("nir", &self.nir),
            ("swir1", &self.swir1),
            ("swir2", &self.swir2),
        ];
        for (name, band) in bands {
            if band.dim() != shape {
                return Err(GlofError::Alignment(format!(
                    "band '{}' has shape {:?}, expected {:?}",
                    name,
                    band.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }
}

/// Normalized-difference indices derived from a band set
#[derive(Debug, Clone)]
pub struct SpectralIndices {
    /// (green - nir) / (green + nir)
    pub ndwi: RasterImage,
    /// (nir - red) / (nir + red)
    pub ndvi: RasterImage,
    /// (green - swir1) / (green + swir1)
    pub ndsi: RasterImage,
}

/// Element-wise `(a - b) / (a + b)`.
///
/// A denominator of exactly zero yields `0`, never NaN: zero is an in-range
/// clustering input while NaN is not.
pub fn normalized_difference<F>(a: &Array2<F>, b: &Array2<F>) -> GlofResult<Array2<F>>
where
    F: Float + Send + Sync,
{
    if a.dim() != b.dim() {
        return Err(GlofError::Alignment(format!(
            "normalized difference operands differ in shape: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }

    Ok(Zip::from(a).and(b).par_map_collect(|&a, &b| {
        let denominator = a + b;
        if denominator == F::zero() {
            F::zero()
        } else {
            (a - b) / denominator
        }
    }))
}

/// Computes NDWI, NDVI and NDSI for a band set
pub struct SpectralIndexEngine;

impl SpectralIndexEngine {
    pub fn compute(bands: &BandSet) -> GlofResult<SpectralIndices> {
        log::info!("Computing spectral indices");
        bands.validate()?;

        let ndwi = normalized_difference(&bands.green, &bands.nir)?;
        let ndvi = normalized_difference(&bands.nir, &bands.red)?;
        let ndsi = normalized_difference(&bands.green, &bands.swir1)?;

        log::debug!(
            "NDSI range: [{:.3}, {:.3}]",
            ndsi.iter().cloned().fold(f32::INFINITY, f32::min),
            ndsi.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
        );

        Ok(SpectralIndices { ndwi, ndvi, ndsi })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ndwi_scenario() {
        let green = array![[10.0f32, 20.0], [0.0, 5.0]];
        let nir = array![[10.0f32, 0.0], [0.0, 5.0]];

        let ndwi = normalized_difference(&green, &nir).unwrap();
        assert_eq!(ndwi, array![[0.0f32, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_zero_denominator_is_zero_not_nan() {
        let a = array![[0.0f64, -3.0, 2.0]];
        let b = array![[0.0f64, 3.0, -2.0]];

        let nd = normalized_difference(&a, &b).unwrap();
        assert!(nd.iter().all(|v| *v == 0.0));
        assert!(nd.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_index_range() {
        let a = Array2::from_shape_fn((5, 5), |(i, j)| (i * 3 + j) as f32 * 0.01);
        let b = Array2::from_shape_fn((5, 5), |(i, j)| (j * 2 + i) as f32 * 0.02);

        let nd = normalized_difference(&a, &b).unwrap();
        assert!(nd.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array2::<f32>::zeros((2, 3));
        let b = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            normalized_difference(&a, &b),
            Err(GlofError::Alignment(_))
        ));
    }

    #[test]
    fn test_engine_computes_all_indices() {
        let band = |v: f32| Array2::from_elem((2, 2), v);
        let bands = BandSet {
            blue: band(0.1),
            green: band(0.3),
            red: band(0.2),
            nir: band(0.1),
            swir1: band(0.05),
            swir2: band(0.04),
        };

        let indices = SpectralIndexEngine::compute(&bands).unwrap();
        assert!((indices.ndwi[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((indices.ndvi[[0, 0]] + 1.0 / 3.0).abs() < 1e-6);
        assert!((indices.ndsi[[0, 0]] - 0.25 / 0.35).abs() < 1e-6);
    }
}
