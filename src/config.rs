//! TOML configuration of a GLOF risk run
//!
//! Every section falls back to the reference defaults, so an empty file is a
//! valid configuration.

use crate::core::alignment::{AlignmentParams, ResamplingMethod};
use crate::core::calibration::{CalibrationParams, ClusterRiskMapping};
use crate::core::classifier::ClassifierParams;
use crate::core::forest::ForestParams;
use crate::core::kmeans::KMeansParams;
use crate::core::preprocess::ImputationStrategy;
use crate::core::terrain::TerrainParams;
use crate::io::geotiff::BandIndices;
use crate::types::{GlofError, GlofResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Input rasters and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Multi-band raster of the calibration epoch
    pub historical_bands: Option<PathBuf>,
    pub historical_dem: Option<PathBuf>,
    /// Multi-band raster of the epoch to predict
    pub new_bands: Option<PathBuf>,
    /// Elevation for the new epoch; the historical DEM when unset
    pub new_dem: Option<PathBuf>,
    pub historical_features: PathBuf,
    pub new_features: PathBuf,
    pub calibrated: PathBuf,
    pub predictions: PathBuf,
    pub model: PathBuf,
    pub mapping_template: PathBuf,
    /// Optional single-band GeoTIFF of the predicted risk grid
    pub risk_raster: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            historical_bands: None,
            historical_dem: None,
            new_bands: None,
            new_dem: None,
            historical_features: PathBuf::from("features_historical.csv"),
            new_features: PathBuf::from("features_new.csv"),
            calibrated: PathBuf::from("calibrated_historical.csv"),
            predictions: PathBuf::from("predictions.csv"),
            model: PathBuf::from("glof_model.json"),
            mapping_template: PathBuf::from("mapping_template.toml"),
            risk_raster: None,
        }
    }
}

/// Feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub bands: BandIndices,
    pub resampling: ResamplingMethod,
    pub glacier_ndsi_threshold: f32,
    pub reject_flat_surface: bool,
    /// Treat band values equal to the raster's nodata as missing
    pub mask_band_nodata: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let terrain = TerrainParams::default();
        Self {
            bands: BandIndices::default(),
            resampling: ResamplingMethod::Bilinear,
            glacier_ndsi_threshold: terrain.glacier_ndsi_threshold,
            reject_flat_surface: terrain.reject_flat_surface,
            mask_band_nodata: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub imputation: ImputationStrategy,
    pub kmeans: KMeansParams,
    pub mapping: ClusterRiskMapping,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let params = CalibrationParams::default();
        Self {
            imputation: params.imputation,
            kmeans: params.kmeans,
            mapping: params.mapping,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let params = ClassifierParams::default();
        Self {
            test_fraction: params.test_fraction,
            split_seed: params.split_seed,
            forest: params.forest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub imputation: ImputationStrategy,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            imputation: ImputationStrategy::Zero,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    /// `[height, width]` of the grid behind CSV tables, when known
    pub grid_shape: Option<[usize; 2]>,
    pub extraction: ExtractionConfig,
    pub calibration: CalibrationConfig,
    pub classifier: ClassifierConfig,
    pub prediction: PredictionConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> GlofResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GlofError::data_access(path, e))?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| GlofError::Config(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> GlofResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GlofError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> GlofResult<String> {
        toml::to_string_pretty(self).map_err(|e| GlofError::Config(e.to_string()))
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> GlofResult<()> {
        for (name, index) in self.extraction.bands.named() {
            if index == 0 {
                return Err(GlofError::Config(format!(
                    "band index for {} is 1-based, got 0",
                    name
                )));
            }
        }
        if !self.extraction.glacier_ndsi_threshold.is_finite() {
            return Err(GlofError::Config("glacier NDSI threshold must be finite".to_string()));
        }
        if let Some([height, width]) = self.grid_shape {
            if height == 0 || width == 0 {
                return Err(GlofError::Config(format!(
                    "grid shape must be positive, got [{}, {}]",
                    height, width
                )));
            }
        }

        let kmeans = &self.calibration.kmeans;
        if kmeans.n_clusters == 0 {
            return Err(GlofError::Config("cluster count must be positive".to_string()));
        }
        if kmeans.n_init == 0 || kmeans.max_iter == 0 {
            return Err(GlofError::Config(
                "k-means n_init and max_iter must be positive".to_string(),
            ));
        }
        if !(kmeans.tol.is_finite() && kmeans.tol >= 0.0) {
            return Err(GlofError::Config(format!(
                "k-means tolerance must be non-negative, got {}",
                kmeans.tol
            )));
        }
        self.calibration.mapping.validate(kmeans.n_clusters)?;

        let fraction = self.classifier.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(GlofError::Config(format!(
                "test fraction must lie in (0, 1), got {}",
                fraction
            )));
        }
        self.classifier.forest.validate()?;

        if self.calibration.imputation != self.prediction.imputation {
            log::debug!(
                "Calibration imputes with {}, prediction with {}",
                self.calibration.imputation,
                self.prediction.imputation
            );
        }
        Ok(())
    }

    pub fn grid_shape(&self) -> Option<(usize, usize)> {
        self.grid_shape.map(|[h, w]| (h, w))
    }

    pub fn alignment_params(&self) -> AlignmentParams {
        AlignmentParams {
            method: self.extraction.resampling,
            ..Default::default()
        }
    }

    pub fn terrain_params(&self) -> TerrainParams {
        TerrainParams {
            glacier_ndsi_threshold: self.extraction.glacier_ndsi_threshold,
            reject_flat_surface: self.extraction.reject_flat_surface,
        }
    }

    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams {
            imputation: self.calibration.imputation,
            kmeans: self.calibration.kmeans.clone(),
            mapping: self.calibration.mapping.clone(),
        }
    }

    pub fn classifier_params(&self) -> ClassifierParams {
        ClassifierParams {
            test_fraction: self.classifier.test_fraction,
            split_seed: self.classifier.split_seed,
            forest: self.classifier.forest.clone(),
            prediction_imputation: self.prediction.imputation,
        }
    }
}
