use crate::types::{GlofError, GlofResult, RasterImage};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-pixel features, in schema order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    Ndwi,
    Ndvi,
    Ndsi,
    Elevation,
    Slope,
    Aspect,
    DistToGlacier,
}

/// Column names of the feature schema, in order
pub const FEATURE_COLUMNS: [&str; 7] = [
    "NDWI",
    "NDVI",
    "NDSI",
    "Elevation",
    "Slope",
    "Aspect",
    "DistToGlacier",
];

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Ndwi,
        Feature::Ndvi,
        Feature::Ndsi,
        Feature::Elevation,
        Feature::Slope,
        Feature::Aspect,
        Feature::DistToGlacier,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        FEATURE_COLUMNS[self.index()]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FEATURE_COLUMNS
            .iter()
            .position(|c| *c == name)
            .map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The seven co-registered feature fields of one epoch
#[derive(Debug, Clone)]
pub struct FeatureFields {
    pub ndwi: RasterImage,
    pub ndvi: RasterImage,
    pub ndsi: RasterImage,
    pub elevation: RasterImage,
    pub slope: RasterImage,
    pub aspect: RasterImage,
    pub dist_to_glacier: RasterImage,
}

impl FeatureFields {
    fn in_schema_order(&self) -> [&RasterImage; 7] {
        [
            &self.ndwi,
            &self.ndvi,
            &self.ndsi,
            &self.elevation,
            &self.slope,
            &self.aspect,
            &self.dist_to_glacier,
        ]
    }
}

/// Row-per-pixel feature table.
///
/// Every row carries its pixel key, the row-major index of the pixel in the
/// grid it was flattened from.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    shape: Option<(usize, usize)>,
    pixels: Vec<usize>,
    values: Array2<f64>,
}

impl FeatureTable {
    /// Flatten the fields row-major into a table
    pub fn from_fields(fields: &FeatureFields) -> GlofResult<Self> {
        let columns = fields.in_schema_order();
        let shape = columns[0].dim();
        for (feature, column) in Feature::ALL.iter().zip(columns.iter()) {
            if column.dim() != shape {
                return Err(GlofError::Alignment(format!(
                    "feature field '{}' has shape {:?}, expected {:?}",
                    feature,
                    column.dim(),
                    shape
                )));
            }
        }

        let n = shape.0 * shape.1;
        let mut values = Array2::<f64>::zeros((n, FEATURE_COLUMNS.len()));
        for (c, column) in columns.iter().enumerate() {
            // iter() on a standard-layout array is row-major
            for (r, v) in column.iter().enumerate() {
                values[[r, c]] = *v as f64;
            }
        }

        log::info!(
            "Assembled feature table: {} rows from a {}x{} grid",
            n,
            shape.0,
            shape.1
        );
        Ok(Self {
            shape: Some(shape),
            pixels: (0..n).collect(),
            values,
        })
    }

    /// Table from a row-major matrix, keyed `0..n`
    pub fn from_rows(values: Array2<f64>, shape: Option<(usize, usize)>) -> GlofResult<Self> {
        let pixels = (0..values.nrows()).collect();
        Self::with_pixels(values, pixels, shape)
    }

    /// Table with explicit pixel keys
    pub fn with_pixels(
        values: Array2<f64>,
        pixels: Vec<usize>,
        shape: Option<(usize, usize)>,
    ) -> GlofResult<Self> {
        if values.ncols() != FEATURE_COLUMNS.len() {
            return Err(GlofError::schema(
                "feature table",
                format!(
                    "expected {} columns, found {}",
                    FEATURE_COLUMNS.len(),
                    values.ncols()
                ),
            ));
        }
        if pixels.len() != values.nrows() {
            return Err(GlofError::schema(
                "feature table",
                format!(
                    "{} pixel keys for {} rows",
                    pixels.len(),
                    values.nrows()
                ),
            ));
        }
        if let Some((height, width)) = shape {
            if values.nrows() != height * width {
                return Err(GlofError::schema(
                    "feature table",
                    format!(
                        "{} rows do not cover a {}x{} grid ({} pixels)",
                        values.nrows(),
                        height,
                        width,
                        height * width
                    ),
                ));
            }
        }
        Ok(Self {
            shape,
            pixels,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    pub fn pixels(&self) -> &[usize] {
        &self.pixels
    }

    /// Feature matrix, one row per pixel, columns in schema order
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn column(&self, feature: Feature) -> ArrayView1<'_, f64> {
        self.values.index_axis(Axis(1), feature.index())
    }

    /// Place one column back onto the grid by pixel key
    pub fn reshape_column(&self, feature: Feature) -> GlofResult<Array2<f64>> {
        let column: Vec<f64> = self.column(feature).to_vec();
        reshape_by_key(&column, &self.pixels, self.shape, f64::NAN)
    }
}

/// Scatter keyed values onto a `(height, width)` grid.
///
/// Pixels without a row receive `fill`.
pub fn reshape_by_key<T: Clone>(
    values: &[T],
    pixels: &[usize],
    shape: Option<(usize, usize)>,
    fill: T,
) -> GlofResult<Array2<T>> {
    let (height, width) = shape.ok_or_else(|| {
        GlofError::schema("reshape", "grid shape of the table is unknown")
    })?;
    if values.len() != pixels.len() {
        return Err(GlofError::schema(
            "reshape",
            format!("{} values for {} pixel keys", values.len(), pixels.len()),
        ));
    }

    let mut grid = Array2::from_elem((height, width), fill);
    for (value, &pixel) in values.iter().zip(pixels) {
        if pixel >= height * width {
            return Err(GlofError::schema(
                "reshape",
                format!(
                    "pixel key {} outside a {}x{} grid",
                    pixel, height, width
                ),
            ));
        }
        grid[[pixel / width, pixel % width]] = value.clone();
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(height: usize, width: usize) -> FeatureFields {
        let field = |offset: f32| {
            Array2::from_shape_fn((height, width), |(i, j)| offset + (i * width + j) as f32)
        };
        FeatureFields {
            ndwi: field(0.0),
            ndvi: field(100.0),
            ndsi: field(200.0),
            elevation: field(300.0),
            slope: field(400.0),
            aspect: field(500.0),
            dist_to_glacier: field(600.0),
        }
    }

    #[test]
    fn test_row_count_matches_grid() {
        for (h, w) in [(1, 1), (1, 7), (5, 1), (43, 54)] {
            let table = FeatureTable::from_fields(&fields(h, w)).unwrap();
            assert_eq!(table.n_rows(), h * w);
            assert_eq!(table.shape(), Some((h, w)));
        }
    }

    #[test]
    fn test_row_major_order() {
        let table = FeatureTable::from_fields(&fields(2, 3)).unwrap();
        // Row 4 is pixel (1, 1)
        assert_eq!(table.values()[[4, Feature::Elevation.index()]], 304.0);
        assert_eq!(table.column(Feature::Ndvi)[5], 105.0);
    }

    #[test]
    fn test_reshape_round_trip() {
        for (h, w) in [(1, 1), (3, 4), (7, 2)] {
            let f = fields(h, w);
            let table = FeatureTable::from_fields(&f).unwrap();
            let slope = table.reshape_column(Feature::Slope).unwrap();
            assert_eq!(slope, f.slope.mapv(|v| v as f64));
        }
    }

    #[test]
    fn test_reshape_places_by_key() {
        let values = Array2::from_shape_fn((4, 7), |(r, c)| (r * 10 + c) as f64);
        let table = FeatureTable::with_pixels(values, vec![3, 2, 1, 0], Some((2, 2))).unwrap();
        let ndwi = table.reshape_column(Feature::Ndwi).unwrap();
        assert_eq!(ndwi[[0, 0]], 30.0);
        assert_eq!(ndwi[[1, 1]], 0.0);
    }

    #[test]
    fn test_mismatched_field_is_alignment_error() {
        let mut f = fields(3, 3);
        f.aspect = Array2::zeros((3, 4));
        match FeatureTable::from_fields(&f) {
            Err(GlofError::Alignment(msg)) => assert!(msg.contains("Aspect")),
            other => panic!("expected alignment error, got {:?}", other),
        }
    }

    #[test]
    fn test_row_count_checked_against_shape() {
        let values = Array2::zeros((5, 7));
        assert!(matches!(
            FeatureTable::from_rows(values, Some((2, 3))),
            Err(GlofError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_feature_names() {
        assert_eq!(Feature::DistToGlacier.name(), "DistToGlacier");
        assert_eq!(Feature::from_name("NDSI"), Some(Feature::Ndsi));
        assert_eq!(Feature::from_name("Risk"), None);
    }
}
