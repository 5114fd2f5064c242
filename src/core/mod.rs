//! Core GLOF risk processing modules

pub mod projection;
pub mod alignment;
pub mod spectral;
pub mod terrain;
pub mod features;
pub mod preprocess;
pub mod kmeans;
pub mod calibration;
pub mod forest;
pub mod metrics;
pub mod classifier;
pub mod pipeline;

// Re-export main types
pub use projection::{mapper_for, CoordinateMapper, EpsgMapper, IdentityMapper, Projection};
pub use alignment::{AlignmentParams, GridAligner, ResamplingMethod};
pub use spectral::{normalized_difference, BandSet, SpectralIndexEngine, SpectralIndices};
pub use terrain::{TerrainAnalyzer, TerrainDerivatives, TerrainParams};
pub use features::{Feature, FeatureFields, FeatureTable, FEATURE_COLUMNS};
pub use preprocess::{ImputationStrategy, Imputer, StandardScaler};
pub use kmeans::{KMeans, KMeansModel, KMeansParams};
pub use calibration::{
    CalibratedTable, CalibrationOutcome, CalibrationParams, ClusterRiskEntry, ClusterRiskMapping,
    RiskCalibrator,
};
pub use forest::{ForestParams, MaxFeatures, RandomForest};
pub use metrics::{ClassificationReport, ConfusionMatrix, EvaluationReport};
pub use classifier::{ClassifierParams, PredictionTable, RiskClassifier, RiskModel};
pub use pipeline::{Epoch, ExtractedFeatures, FeatureExtractor, GlofPipeline, RunSummary};
