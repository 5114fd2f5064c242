//! End-to-end orchestration: extraction, calibration, training, prediction

use crate::config::PipelineConfig;
use crate::core::alignment::{AlignmentParams, GridAligner};
use crate::core::calibration::{CalibrationOutcome, RiskCalibrator};
use crate::core::classifier::{PredictionTable, RiskClassifier, RiskModel};
use crate::core::features::{FeatureFields, FeatureTable};
use crate::core::metrics::EvaluationReport;
use crate::core::spectral::{BandSet, SpectralIndexEngine};
use crate::core::terrain::{TerrainAnalyzer, TerrainParams};
use crate::io::geotiff::{write_geotiff, BandIndices, GeoTiffReader, RasterReader};
use crate::io::{
    load_model, read_feature_table, save_model, write_atomically, write_calibrated_table,
    write_feature_table, write_prediction_table,
};
use crate::types::{GlofError, GlofResult, GridSpec, RasterGrid};
use std::io::Write;
use std::path::Path;

/// Nodata value of the written risk raster
pub const RISK_RASTER_NODATA: f64 = -1.0;

/// Features of one epoch with the band grid they were sampled on
#[derive(Debug, Clone)]
pub struct ExtractedFeatures {
    pub table: FeatureTable,
    pub grid: GridSpec,
}

/// Builds the per-pixel feature table of one epoch from raster files
pub struct FeatureExtractor {
    reader: Box<dyn RasterReader>,
    bands: BandIndices,
    aligner: GridAligner,
    terrain: TerrainAnalyzer,
    mask_band_nodata: bool,
}

impl FeatureExtractor {
    pub fn new(
        reader: Box<dyn RasterReader>,
        bands: BandIndices,
        alignment: AlignmentParams,
        terrain: TerrainParams,
    ) -> Self {
        Self {
            reader,
            bands,
            aligner: GridAligner::new(alignment),
            terrain: TerrainAnalyzer::new(terrain),
            mask_band_nodata: false,
        }
    }

    /// Turn band values equal to the declared nodata into NaN before the
    /// indices are computed. Off by default: raw values are used.
    pub fn with_band_nodata_mask(mut self, mask: bool) -> Self {
        self.mask_band_nodata = mask;
        self
    }

    /// GeoTIFF reader, default band layout, bilinear alignment
    pub fn standard() -> Self {
        Self::new(
            Box::new(GeoTiffReader),
            BandIndices::default(),
            AlignmentParams::default(),
            TerrainParams::default(),
        )
    }

    /// Read the six reflectance bands, masking declared nodata only when enabled
    pub fn load_bands(&self, path: &Path) -> GlofResult<(BandSet, GridSpec)> {
        let stack = self.reader.read(path)?;
        log::debug!(
            "{} has {} band(s) on a {}x{} grid",
            path.display(),
            stack.band_count(),
            stack.grid.height,
            stack.grid.width
        );

        let band = |index: usize| -> GlofResult<_> {
            let grid = stack.band(index)?;
            Ok(match grid.nodata {
                Some(nodata) if self.mask_band_nodata => {
                    let nodata = nodata as f32;
                    grid.data.mapv(|v| if v == nodata { f32::NAN } else { v })
                }
                _ => grid.data,
            })
        };

        let bands = BandSet {
            blue: band(self.bands.blue)?,
            green: band(self.bands.green)?,
            red: band(self.bands.red)?,
            nir: band(self.bands.nir)?,
            swir1: band(self.bands.swir1)?,
            swir2: band(self.bands.swir2)?,
        };
        Ok((bands, stack.grid))
    }

    /// First band of the elevation raster with its own grid metadata
    pub fn load_dem(&self, path: &Path) -> GlofResult<RasterGrid> {
        self.reader.read(path)?.band(1)
    }

    pub fn extract(&self, bands_path: &Path, dem_path: &Path) -> GlofResult<ExtractedFeatures> {
        log::info!(
            "Extracting features from {} and {}",
            bands_path.display(),
            dem_path.display()
        );
        let (bands, grid) = self.load_bands(bands_path)?;
        let dem = self.load_dem(dem_path)?;
        let elevation = self.aligner.align(&dem, &grid)?.data;

        let indices = SpectralIndexEngine::compute(&bands)?;
        let terrain = self.terrain.compute(&elevation, &indices.ndsi)?;

        let fields = FeatureFields {
            ndwi: indices.ndwi,
            ndvi: indices.ndvi,
            ndsi: indices.ndsi,
            elevation,
            slope: terrain.slope,
            aspect: terrain.aspect,
            dist_to_glacier: terrain.dist_to_glacier,
        };
        let table = FeatureTable::from_fields(&fields)?;
        Ok(ExtractedFeatures { table, grid })
    }
}

/// Calibration epoch or prediction epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    Historical,
    New,
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Epoch::Historical => write!(f, "historical"),
            Epoch::New => write!(f, "new"),
        }
    }
}

/// Everything one full run produced
#[derive(Debug)]
pub struct RunSummary {
    pub calibration: CalibrationOutcome,
    pub model: RiskModel,
    pub evaluation: EvaluationReport,
    pub predictions: PredictionTable,
}

/// Runs the configured stages and writes their outputs
pub struct GlofPipeline {
    config: PipelineConfig,
    extractor: FeatureExtractor,
}

impl GlofPipeline {
    pub fn new(config: PipelineConfig) -> GlofResult<Self> {
        Self::with_reader(config, Box::new(GeoTiffReader))
    }

    pub fn with_reader(config: PipelineConfig, reader: Box<dyn RasterReader>) -> GlofResult<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new(
            reader,
            config.extraction.bands.clone(),
            config.alignment_params(),
            config.terrain_params(),
        )
        .with_band_nodata_mask(config.extraction.mask_band_nodata);
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn epoch_inputs(&self, epoch: Epoch) -> GlofResult<Option<(&Path, &Path)>> {
        let paths = &self.config.paths;
        let (bands, dem) = match epoch {
            Epoch::Historical => (&paths.historical_bands, &paths.historical_dem),
            Epoch::New => (
                &paths.new_bands,
                if paths.new_dem.is_some() {
                    &paths.new_dem
                } else {
                    &paths.historical_dem
                },
            ),
        };
        match (bands, dem) {
            (Some(bands), Some(dem)) => Ok(Some((bands.as_path(), dem.as_path()))),
            (None, _) => Ok(None),
            (Some(_), None) => Err(GlofError::Config(format!(
                "{} epoch has a band raster but no elevation raster",
                epoch
            ))),
        }
    }

    fn features_path(&self, epoch: Epoch) -> &Path {
        match epoch {
            Epoch::Historical => &self.config.paths.historical_features,
            Epoch::New => &self.config.paths.new_features,
        }
    }

    /// Extract one epoch's features and write its table.
    ///
    /// Returns `None` when no band raster is configured for the epoch.
    pub fn extract_epoch(&self, epoch: Epoch) -> GlofResult<Option<ExtractedFeatures>> {
        let (bands, dem) = match self.epoch_inputs(epoch)? {
            Some(inputs) => inputs,
            None => {
                log::debug!("No {} band raster configured; skipping extraction", epoch);
                return Ok(None);
            }
        };
        let extracted = self.extractor.extract(bands, dem)?;
        if let Some(expected) = self.config.grid_shape() {
            if expected != extracted.grid.shape() {
                log::warn!(
                    "Configured grid shape {:?} differs from the {} band grid {:?}",
                    expected,
                    epoch,
                    extracted.grid.shape()
                );
            }
        }
        write_feature_table(self.features_path(epoch), &extracted.table)?;
        Ok(Some(extracted))
    }

    /// Extract every epoch that has rasters configured
    pub fn extract(&self) -> GlofResult<Vec<(Epoch, ExtractedFeatures)>> {
        let mut extracted = Vec::new();
        for epoch in [Epoch::Historical, Epoch::New] {
            if let Some(features) = self.extract_epoch(epoch)? {
                extracted.push((epoch, features));
            }
        }
        if extracted.is_empty() {
            return Err(GlofError::Config(
                "no band raster configured for either epoch".to_string(),
            ));
        }
        Ok(extracted)
    }

    fn read_features(&self, epoch: Epoch) -> GlofResult<FeatureTable> {
        read_feature_table(self.features_path(epoch), self.config.grid_shape())
    }

    /// Calibrate the historical table read from disk
    pub fn calibrate(&self) -> GlofResult<CalibrationOutcome> {
        let table = self.read_features(Epoch::Historical)?;
        self.calibrate_table(&table)
    }

    /// Cluster and label `table`, writing the calibrated table and a signed
    /// mapping template of the fitted clustering.
    pub fn calibrate_table(&self, table: &FeatureTable) -> GlofResult<CalibrationOutcome> {
        let outcome = RiskCalibrator::new(self.config.calibration_params()).calibrate(table)?;
        write_calibrated_table(&self.config.paths.calibrated, &outcome.table)?;

        let template = self
            .config
            .calibration
            .mapping
            .signed_from(&outcome.clustering)
            .to_toml_string()?;
        let path = &self.config.paths.mapping_template;
        write_atomically(path, |out| {
            out.write_all(template.as_bytes())
                .map_err(|e| GlofError::data_access(path, e))
        })?;
        log::info!("Wrote cluster mapping template to {}", path.display());
        Ok(outcome)
    }

    /// Calibrate then fit and save the classifier
    pub fn train(&self) -> GlofResult<(RiskModel, EvaluationReport)> {
        let outcome = self.calibrate()?;
        self.train_outcome(&outcome)
    }

    pub fn train_outcome(
        &self,
        outcome: &CalibrationOutcome,
    ) -> GlofResult<(RiskModel, EvaluationReport)> {
        let (model, evaluation) =
            RiskClassifier::new(self.config.classifier_params()).train(outcome)?;
        save_model(&self.config.paths.model, &model)?;
        Ok((model, evaluation))
    }

    /// Predict the new-epoch table read from disk with the saved model
    pub fn predict(&self) -> GlofResult<PredictionTable> {
        let model = load_model(&self.config.paths.model)?;
        let grid = match (&self.config.paths.risk_raster, &self.config.paths.new_bands) {
            (Some(_), Some(bands)) => Some(self.extractor.reader.read(bands)?.grid),
            _ => None,
        };
        let shape = self
            .config
            .grid_shape()
            .or_else(|| grid.as_ref().map(GridSpec::shape));
        let table = read_feature_table(self.features_path(Epoch::New), shape)?;
        self.predict_table(&model, &table, grid.as_ref())
    }

    /// Classify `table` and write the prediction outputs
    pub fn predict_table(
        &self,
        model: &RiskModel,
        table: &FeatureTable,
        grid: Option<&GridSpec>,
    ) -> GlofResult<PredictionTable> {
        let predictions = model.predict(table)?;
        write_prediction_table(&self.config.paths.predictions, &predictions)?;

        if let Some(path) = &self.config.paths.risk_raster {
            match grid {
                Some(grid) => write_risk_raster(path, &predictions, grid)?,
                None => {
                    return Err(GlofError::Config(
                        "risk raster output needs the new-epoch band raster for its grid"
                            .to_string(),
                    ))
                }
            }
        }
        Ok(predictions)
    }

    /// Extract, calibrate, train and predict in one pass.
    ///
    /// Epochs without configured rasters are read from their feature tables.
    pub fn run(&self) -> GlofResult<RunSummary> {
        let historical = match self.extract_epoch(Epoch::Historical)? {
            Some(extracted) => extracted.table,
            None => self.read_features(Epoch::Historical)?,
        };
        let (new_table, new_grid) = match self.extract_epoch(Epoch::New)? {
            Some(extracted) => (extracted.table, Some(extracted.grid)),
            None => (self.read_features(Epoch::New)?, None),
        };

        let calibration = self.calibrate_table(&historical)?;
        let (model, evaluation) = self.train_outcome(&calibration)?;
        let predictions = self.predict_table(&model, &new_table, new_grid.as_ref())?;

        log::info!("Pipeline complete: {} pixels classified", predictions.predicted().len());
        Ok(RunSummary {
            calibration,
            model,
            evaluation,
            predictions,
        })
    }
}

/// Risk indices as a single-band raster; pixels without a row are nodata
pub fn write_risk_raster(path: &Path, predictions: &PredictionTable, grid: &GridSpec) -> GlofResult<()> {
    let risk = predictions.risk_grid()?;
    if risk.dim() != grid.shape() {
        return Err(GlofError::schema(
            "risk raster",
            format!(
                "prediction grid {:?} does not match band grid {:?}",
                risk.dim(),
                grid.shape()
            ),
        ));
    }
    let data = risk.mapv(|r| match r {
        Some(level) => level.index() as f32,
        None => RISK_RASTER_NODATA as f32,
    });
    let raster = RasterGrid {
        data,
        grid: grid.clone(),
        nodata: Some(RISK_RASTER_NODATA),
    };
    write_geotiff(path, &raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::io::geotiff::RasterStack;
    use crate::types::{GeoTransform, RasterImage, SpatialReference};
    use ndarray::Array2;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const SIZE: usize = 16;

    /// Serves synthetic stacks keyed by file name
    struct MemoryReader;

    fn grid() -> GridSpec {
        GridSpec {
            height: SIZE,
            width: SIZE,
            transform: GeoTransform::north_up(500_000.0, 3_100_000.0, 30.0, -30.0),
            crs: Some(SpatialReference::Epsg(32645)),
        }
    }

    fn band_stack(path: &Path, shift: f32) -> RasterStack {
        let bands: Vec<RasterImage> = (0..7)
            .map(|b| {
                Array2::from_shape_fn((SIZE, SIZE), |(i, j)| {
                    let lake = i > 10 && j < 5;
                    let glacier = i < 4;
                    let base = match b {
                        2 if glacier => 0.8,
                        5 if glacier => 0.1,
                        4 if lake => 0.05,
                        2 if lake => 0.3,
                        _ => 0.2 + 0.01 * ((i * 7 + j * 3 + b) % 11) as f32,
                    };
                    base + shift
                })
            })
            .collect();
        RasterStack {
            path: path.to_path_buf(),
            grid: grid(),
            nodata: None,
            bands,
        }
    }

    impl RasterReader for MemoryReader {
        fn read(&self, path: &Path) -> GlofResult<RasterStack> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            match name {
                "hist.tif" => Ok(band_stack(path, 0.0)),
                "new.tif" => Ok(band_stack(path, 0.02)),
                "dem.tif" => Ok(RasterStack {
                    path: path.to_path_buf(),
                    grid: grid(),
                    nodata: Some(-9999.0),
                    bands: vec![Array2::from_shape_fn((SIZE, SIZE), |(i, j)| {
                        4000.0 + 25.0 * i as f32 + 3.0 * ((i * j) % 5) as f32
                    })],
                }),
                _ => Err(GlofError::data_access(path, "no such raster")),
            }
        }
    }

    fn config_in(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths = PathsConfig {
            historical_bands: Some(PathBuf::from("hist.tif")),
            historical_dem: Some(PathBuf::from("dem.tif")),
            new_bands: Some(PathBuf::from("new.tif")),
            new_dem: None,
            historical_features: dir.join("hist.csv"),
            new_features: dir.join("new.csv"),
            calibrated: dir.join("calibrated.csv"),
            predictions: dir.join("predictions.csv"),
            model: dir.join("model.json"),
            mapping_template: dir.join("mapping.toml"),
            risk_raster: Some(dir.join("risk.tif")),
        };
        config.classifier.forest.n_trees = 10;
        config.calibration.kmeans.n_init = 3;
        config
    }

    #[test]
    fn test_extract_uses_band_grid() {
        let extractor = FeatureExtractor::new(
            Box::new(MemoryReader),
            BandIndices::default(),
            AlignmentParams::default(),
            TerrainParams::default(),
        );
        let extracted = extractor
            .extract(Path::new("hist.tif"), Path::new("dem.tif"))
            .unwrap();
        assert_eq!(extracted.grid.shape(), (SIZE, SIZE));
        assert_eq!(extracted.table.n_rows(), SIZE * SIZE);
        assert_eq!(extracted.table.shape(), Some((SIZE, SIZE)));
    }

    /// Zero-filled 2x2 stack declaring 0 as nodata
    struct ZeroFillReader;

    impl RasterReader for ZeroFillReader {
        fn read(&self, path: &Path) -> GlofResult<RasterStack> {
            let green = Array2::from_shape_vec((2, 2), vec![10.0, 20.0, 0.0, 5.0]).unwrap();
            let nir = Array2::from_shape_vec((2, 2), vec![10.0, 0.0, 0.0, 5.0]).unwrap();
            let mut bands = vec![Array2::from_elem((2, 2), 1.0f32); 7];
            bands[2] = green;
            bands[4] = nir;
            Ok(RasterStack {
                path: path.to_path_buf(),
                grid: GridSpec {
                    height: 2,
                    width: 2,
                    transform: GeoTransform::north_up(500_000.0, 3_100_000.0, 30.0, -30.0),
                    crs: Some(SpatialReference::Epsg(32645)),
                },
                nodata: Some(0.0),
                bands,
            })
        }
    }

    fn zero_fill_extractor() -> FeatureExtractor {
        FeatureExtractor::new(
            Box::new(ZeroFillReader),
            BandIndices::default(),
            AlignmentParams::default(),
            TerrainParams::default(),
        )
    }

    #[test]
    fn test_declared_band_nodata_keeps_raw_values() {
        let (bands, _) = zero_fill_extractor().load_bands(Path::new("zero.tif")).unwrap();
        let indices = SpectralIndexEngine::compute(&bands).unwrap();
        assert_eq!(indices.ndwi.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_band_nodata_mask_is_opt_in() {
        let extractor = zero_fill_extractor().with_band_nodata_mask(true);
        let (bands, _) = extractor.load_bands(Path::new("zero.tif")).unwrap();
        let indices = SpectralIndexEngine::compute(&bands).unwrap();
        assert_eq!(indices.ndwi[[0, 0]], 0.0);
        assert!(indices.ndwi[[0, 1]].is_nan());
        assert!(indices.ndwi[[1, 0]].is_nan());
    }

    #[test]
    fn test_missing_band_names_file() {
        let mut bands = BandIndices::default();
        bands.swir2 = 9;
        let extractor = FeatureExtractor::new(
            Box::new(MemoryReader),
            bands,
            AlignmentParams::default(),
            TerrainParams::default(),
        );
        match extractor.extract(Path::new("hist.tif"), Path::new("dem.tif")) {
            Err(GlofError::DataAccess { path, .. }) => assert!(path.contains("hist.tif")),
            other => panic!("expected data access error, got {:?}", other.map(|e| e.grid)),
        }
    }

    #[test]
    fn test_full_run_writes_outputs() {
        let dir = tempdir().unwrap();
        let pipeline = GlofPipeline::with_reader(config_in(dir.path()), Box::new(MemoryReader)).unwrap();

        let summary = pipeline.run().unwrap();
        assert_eq!(summary.predictions.predicted().len(), SIZE * SIZE);
        assert_eq!(summary.evaluation.n_test, (SIZE * SIZE) / 4);

        for name in ["hist.csv", "new.csv", "calibrated.csv", "predictions.csv", "model.json", "mapping.toml", "risk.tif"] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
    }

    #[test]
    fn test_stages_match_single_run() {
        let dir = tempdir().unwrap();
        let pipeline = GlofPipeline::with_reader(config_in(dir.path()), Box::new(MemoryReader)).unwrap();
        let summary = pipeline.run().unwrap();

        let (model, evaluation) = pipeline.train().unwrap();
        assert_eq!(evaluation.confusion, summary.evaluation.confusion);
        assert_eq!(model, summary.model);

        let predictions = pipeline.predict().unwrap();
        assert_eq!(predictions.predicted(), summary.predictions.predicted());
    }

    #[test]
    fn test_band_raster_without_dem_is_config_error() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.paths.historical_dem = None;
        let pipeline = GlofPipeline::with_reader(config, Box::new(MemoryReader)).unwrap();
        assert!(matches!(pipeline.extract(), Err(GlofError::Config(_))));
    }
}
