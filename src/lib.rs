//! glofrisk: per-pixel glacial lake outburst flood risk mapping
//!
//! Derives spectral and terrain features from a multispectral raster and a
//! DEM, labels a historical epoch by clustering against a curated
//! cluster-to-risk mapping, and trains a random forest that classifies new
//! epochs as Safe, Moderate or High risk.

pub mod types;
pub mod io;
pub mod core;
pub mod config;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    GeoTransform, GlofError, GlofResult, GridSpec, RasterGrid, RasterImage, RiskLevel,
    SpatialReference,
};

pub use config::PipelineConfig;
pub use crate::core::{FeatureExtractor, FeatureTable, GlofPipeline, RiskModel};
pub use io::{GeoTiffReader, RasterReader};
