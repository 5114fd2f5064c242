use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Real-valued raster sample (reflectance, elevation)
pub type RasterValue = f32;

/// 2D raster array (rows x cols)
pub type RasterImage = Array2<RasterValue>;

/// Spatial reference of a raster grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialReference {
    /// EPSG authority code (e.g. 4326, 32645)
    Epsg(u32),
    /// Well-known text for references without an authority code
    Wkt(String),
}

impl SpatialReference {
    pub fn epsg(&self) -> Option<u32> {
        match self {
            SpatialReference::Epsg(code) => Some(*code),
            SpatialReference::Wkt(_) => None,
        }
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialReference::Epsg(code) => write!(f, "EPSG:{}", code),
            SpatialReference::Wkt(wkt) => {
                let head: String = wkt.chars().take(48).collect();
                write!(f, "WKT[{}...]", head)
            }
        }
    }
}

/// Affine pixel <-> coordinate transform, GDAL coefficient order.
///
/// `x = top_left_x + col * pixel_width + row * rotation_x`
/// `y = top_left_y + col * rotation_y + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map fractional pixel coordinates (col, row) to georeferenced (x, y)
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Inverse of `pixel_to_geo`; `None` when the transform is singular
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((col, row))
    }

    pub fn is_invertible(&self) -> bool {
        self.geo_to_pixel(self.top_left_x, self.top_left_y).is_some()
    }
}

impl Default for GeoTransform {
    /// Identity pixel grid (GDAL's default for ungeoreferenced rasters)
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }
}

/// Geometry of a raster grid: shape, transform and spatial reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub height: usize,
    pub width: usize,
    pub transform: GeoTransform,
    pub crs: Option<SpatialReference>,
}

impl GridSpec {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.height * self.width
    }
}

/// A single-quantity raster together with its grid metadata
#[derive(Debug, Clone)]
pub struct RasterGrid {
    pub data: RasterImage,
    pub grid: GridSpec,
    pub nodata: Option<f64>,
}

impl RasterGrid {
    pub fn new(data: RasterImage, transform: GeoTransform, crs: Option<SpatialReference>) -> Self {
        let (height, width) = data.dim();
        Self {
            data,
            grid: GridSpec {
                height,
                width,
                transform,
                crs,
            },
            nodata: None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Ordinal GLOF risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe = 0,
    Moderate = 1,
    High = 2,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Safe, RiskLevel::Moderate, RiskLevel::High];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "Safe"),
            RiskLevel::Moderate => write!(f, "Moderate"),
            RiskLevel::High => write!(f, "High"),
        }
    }
}

/// Error types for GLOF risk processing
#[derive(Debug, thiserror::Error)]
pub enum GlofError {
    #[error("data access error ({path}): {reason}")]
    DataAccess { path: String, reason: String },

    #[error("alignment error: {0}")]
    Alignment(String),

    #[error("schema mismatch in {context}: {reason}")]
    SchemaMismatch { context: String, reason: String },

    #[error("degenerate input in {stage}: {reason}")]
    DegenerateInput { stage: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl GlofError {
    pub fn data_access(path: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        GlofError::DataAccess {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(context: impl Into<String>, reason: impl Into<String>) -> Self {
        GlofError::SchemaMismatch {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn degenerate(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        GlofError::DegenerateInput {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for GLOF operations
pub type GlofResult<T> = Result<T, GlofError>;
