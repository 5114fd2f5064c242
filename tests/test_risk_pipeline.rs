mod common;

use common::*;
use glofrisk::core::calibration::ClusterRiskMapping;
use glofrisk::core::pipeline::Epoch;
use glofrisk::io::geotiff::read_geotiff;
use glofrisk::io::{load_model, read_feature_table};
use glofrisk::{GlofError, GlofPipeline, PipelineConfig, RiskLevel};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const SIZE: usize = 24;

/// Write both epochs' rasters and a config pointing every path into `dir`
fn prepare(dir: &Path) -> PipelineConfig {
    write_band_stack(&dir.join("hist.tif"), &synthetic_scene(SIZE, 1.0), scene_transform());
    write_band_stack(&dir.join("new.tif"), &synthetic_scene(SIZE, 1.08), scene_transform());
    write_dem(&dir.join("dem.tif"), synthetic_dem(SIZE), scene_transform(), UTM_45N, None);

    let text = format!(
        r#"
            [paths]
            historical_bands = "{d}/hist.tif"
            historical_dem = "{d}/dem.tif"
            new_bands = "{d}/new.tif"
            historical_features = "{d}/features_historical.csv"
            new_features = "{d}/features_new.csv"
            calibrated = "{d}/calibrated.csv"
            predictions = "{d}/predictions.csv"
            model = "{d}/model.json"
            mapping_template = "{d}/mapping_template.toml"
            risk_raster = "{d}/risk.tif"

            [calibration.kmeans]
            n_init = 4

            [classifier.forest]
            n_trees = 20
        "#,
        d = dir.display()
    );
    PipelineConfig::from_toml_str(&text).expect("Failed to parse config")
}

#[test]
fn test_full_run_outputs() {
    init_logging();
    let dir = tempdir().unwrap();
    let config = prepare(dir.path());
    let pipeline = GlofPipeline::new(config).unwrap();

    let summary = pipeline.run().expect("Pipeline run failed");
    println!("{}", summary.evaluation);

    let n = SIZE * SIZE;
    assert_eq!(summary.predictions.predicted().len(), n);
    assert_eq!(summary.evaluation.n_train + summary.evaluation.n_test, n);
    assert_eq!(summary.evaluation.confusion.total(), n / 4);

    // Prediction table keeps the feature schema plus the predicted column
    let text = fs::read_to_string(dir.path().join("predictions.csv")).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        "NDWI,NDVI,NDSI,Elevation,Slope,Aspect,DistToGlacier,Predicted_Risk"
    );
    assert_eq!(text.lines().count(), n + 1);

    let calibrated = fs::read_to_string(dir.path().join("calibrated.csv")).unwrap();
    assert!(calibrated.lines().next().unwrap().ends_with("Cluster,Risk"));

    // Risk raster sits on the band grid
    let risk = read_geotiff(&dir.path().join("risk.tif")).unwrap();
    assert_eq!(risk.grid.shape(), (SIZE, SIZE));
    let grid = summary.predictions.risk_grid().unwrap();
    for ((i, j), level) in grid.indexed_iter() {
        assert_eq!(risk.bands[0][[i, j]], level.unwrap().index() as f32);
    }
}

#[test]
fn test_same_seed_same_evaluation() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = GlofPipeline::new(prepare(dir_a.path())).unwrap().run().unwrap();
    let b = GlofPipeline::new(prepare(dir_b.path())).unwrap().run().unwrap();

    assert_eq!(a.evaluation.confusion.counts(), b.evaluation.confusion.counts());
    assert_eq!(a.predictions.predicted(), b.predictions.predicted());
}

#[test]
fn test_reloaded_model_predicts_identically() {
    let dir = tempdir().unwrap();
    let pipeline = GlofPipeline::new(prepare(dir.path())).unwrap();
    let summary = pipeline.run().unwrap();

    let model = load_model(&dir.path().join("model.json")).unwrap();
    assert_eq!(model, summary.model);

    let new_table = read_feature_table(&dir.path().join("features_new.csv"), Some((SIZE, SIZE))).unwrap();
    let predictions = model.predict(&new_table).unwrap();
    assert_eq!(predictions.predicted(), summary.predictions.predicted());
}

#[test]
fn test_staged_commands_reuse_tables() {
    let dir = tempdir().unwrap();
    let pipeline = GlofPipeline::new(prepare(dir.path())).unwrap();

    let extracted = pipeline.extract().unwrap();
    assert_eq!(extracted.len(), 2);
    assert_eq!(extracted[0].0, Epoch::Historical);

    let outcome = pipeline.calibrate().unwrap();
    assert_eq!(outcome.risks().len(), SIZE * SIZE);

    let (_, evaluation) = pipeline.train().unwrap();
    assert!(evaluation.report.accuracy > 0.5);

    let predictions = pipeline.predict().unwrap();
    assert_eq!(predictions.predicted().len(), SIZE * SIZE);
    assert!(dir.path().join("risk.tif").exists());
}

#[test]
fn test_signed_template_reproduces_labels() {
    let dir = tempdir().unwrap();
    let config = prepare(dir.path());
    let pipeline = GlofPipeline::new(config.clone()).unwrap();
    pipeline.extract_epoch(Epoch::Historical).unwrap();
    let first = pipeline.calibrate().unwrap();

    let template = fs::read_to_string(dir.path().join("mapping_template.toml")).unwrap();
    let mapping: ClusterRiskMapping = toml::from_str(&template).unwrap();
    assert!(mapping.is_signed());

    let mut signed = config;
    signed.calibration.mapping = mapping;
    let second = GlofPipeline::new(signed).unwrap().calibrate().unwrap();

    assert_eq!(first.risks(), second.risks());
}

#[test]
fn test_foreign_signatures_rejected() {
    let dir = tempdir().unwrap();
    let mut config = prepare(dir.path());
    let pipeline = GlofPipeline::new(config.clone()).unwrap();
    pipeline.extract_epoch(Epoch::Historical).unwrap();

    for (k, entry) in config.calibration.mapping.clusters.iter_mut().enumerate() {
        entry.centroid = Some(vec![40.0 + k as f64; 7]);
    }
    let result = GlofPipeline::new(config).unwrap().calibrate();
    assert!(matches!(result, Err(GlofError::SchemaMismatch { .. })));
}

#[test]
fn test_missing_model_is_data_access_error() {
    let dir = tempdir().unwrap();
    let pipeline = GlofPipeline::new(prepare(dir.path())).unwrap();
    pipeline.extract().unwrap();
    assert!(matches!(pipeline.predict(), Err(GlofError::DataAccess { .. })));
    assert!(!dir.path().join("predictions.csv").exists());
}

#[test]
fn test_every_level_is_a_known_class() {
    let dir = tempdir().unwrap();
    let summary = GlofPipeline::new(prepare(dir.path())).unwrap().run().unwrap();
    assert!(summary
        .calibration
        .risks()
        .iter()
        .all(|r| RiskLevel::ALL.contains(r)));
}
