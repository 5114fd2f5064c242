use crate::core::features::FeatureTable;
use crate::core::kmeans::{KMeans, KMeansModel, KMeansParams};
use crate::core::preprocess::{ImputationStrategy, Imputer, StandardScaler};
use crate::types::{GlofError, GlofResult, RiskLevel};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// One curated cluster id -> risk assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRiskEntry {
    pub cluster: usize,
    pub risk: RiskLevel,
    /// Centroid in standardised feature space identifying the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f64>>,
}

/// Versioned mapping from clusters to risk levels.
///
/// When every entry carries a centroid signature, fitted clusters are matched
/// to entries by nearest signature rather than by their numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRiskMapping {
    pub version: String,
    /// Largest accepted distance between a fitted centroid and its signature
    pub signature_tolerance: f64,
    pub clusters: Vec<ClusterRiskEntry>,
}

impl Default for ClusterRiskMapping {
    fn default() -> Self {
        let entry = |cluster, risk| ClusterRiskEntry {
            cluster,
            risk,
            centroid: None,
        };
        Self {
            version: "curated-v1".to_string(),
            signature_tolerance: 1.0,
            clusters: vec![
                entry(0, RiskLevel::Safe),
                entry(1, RiskLevel::High),
                entry(2, RiskLevel::Moderate),
                entry(3, RiskLevel::Safe),
            ],
        }
    }
}

impl ClusterRiskMapping {
    pub fn is_signed(&self) -> bool {
        !self.clusters.is_empty() && self.clusters.iter().all(|e| e.centroid.is_some())
    }

    /// Check the mapping covers exactly the ids `0..n_clusters`
    pub fn validate(&self, n_clusters: usize) -> GlofResult<()> {
        let mut seen = vec![false; n_clusters];
        for entry in &self.clusters {
            if entry.cluster >= n_clusters {
                return Err(GlofError::Config(format!(
                    "mapping '{}' names cluster {} but only {} clusters are fitted",
                    self.version, entry.cluster, n_clusters
                )));
            }
            if seen[entry.cluster] {
                return Err(GlofError::Config(format!(
                    "mapping '{}' lists cluster {} twice",
                    self.version, entry.cluster
                )));
            }
            seen[entry.cluster] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(GlofError::Config(format!(
                "mapping '{}' has no entry for cluster {}",
                self.version, missing
            )));
        }

        let signed = self.clusters.iter().filter(|e| e.centroid.is_some()).count();
        if signed != 0 && signed != self.clusters.len() {
            return Err(GlofError::Config(format!(
                "mapping '{}' mixes signed and unsigned entries",
                self.version
            )));
        }
        if !(self.signature_tolerance.is_finite() && self.signature_tolerance > 0.0) {
            return Err(GlofError::Config(format!(
                "signature tolerance must be positive, got {}",
                self.signature_tolerance
            )));
        }
        Ok(())
    }

    /// Risk level for each fitted cluster id of `model`
    pub fn resolve(&self, model: &KMeansModel) -> GlofResult<Vec<RiskLevel>> {
        let k = model.n_clusters();
        self.validate(k)?;

        if !self.is_signed() {
            log::warn!(
                "Mapping '{}' has no centroid signatures; applying it by raw cluster id",
                self.version
            );
            let mut risks = vec![RiskLevel::Safe; k];
            for entry in &self.clusters {
                risks[entry.cluster] = entry.risk;
            }
            return Ok(risks);
        }

        let centroids = model.centroids();
        let mut matched: Vec<Option<usize>> = vec![None; self.clusters.len()];
        let mut risks = Vec::with_capacity(k);

        for (fitted, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
            let mut nearest = (0, f64::INFINITY);
            for (e, entry) in self.clusters.iter().enumerate() {
                let signature = entry.centroid.as_deref().unwrap_or_default();
                if signature.len() != centroid.len() {
                    return Err(GlofError::schema(
                        "cluster mapping",
                        format!(
                            "signature of cluster {} has {} features, clustering has {}",
                            entry.cluster,
                            signature.len(),
                            centroid.len()
                        ),
                    ));
                }
                let d = signature
                    .iter()
                    .zip(centroid.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                if d < nearest.1 {
                    nearest = (e, d);
                }
            }

            let (e, distance) = nearest;
            if distance > self.signature_tolerance {
                return Err(GlofError::schema(
                    "cluster mapping",
                    format!(
                        "fitted cluster {} is {:.4} from the nearest signature (tolerance {})",
                        fitted, distance, self.signature_tolerance
                    ),
                ));
            }
            if let Some(other) = matched[e] {
                return Err(GlofError::schema(
                    "cluster mapping",
                    format!(
                        "fitted clusters {} and {} both match signature of cluster {}",
                        other, fitted, self.clusters[e].cluster
                    ),
                ));
            }
            matched[e] = Some(fitted);
            log::debug!(
                "Fitted cluster {} -> curated cluster {} ({}) at distance {:.4}",
                fitted,
                self.clusters[e].cluster,
                self.clusters[e].risk,
                distance
            );
            risks.push(self.clusters[e].risk);
        }

        Ok(risks)
    }

    /// Signed template of the current clustering for manual curation.
    ///
    /// Risks are carried over from `self` by cluster id.
    pub fn signed_from(&self, model: &KMeansModel) -> Self {
        let clusters = model
            .centroids()
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(cluster, centroid)| ClusterRiskEntry {
                cluster,
                risk: self
                    .clusters
                    .iter()
                    .find(|e| e.cluster == cluster)
                    .map(|e| e.risk)
                    .unwrap_or(RiskLevel::Safe),
                centroid: Some(centroid.to_vec()),
            })
            .collect();

        Self {
            version: self.version.clone(),
            signature_tolerance: self.signature_tolerance,
            clusters,
        }
    }

    pub fn to_toml_string(&self) -> GlofResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GlofError::Config(format!("cannot render mapping: {}", e)))
    }
}

/// Features of the calibration epoch with their cluster and risk labels
#[derive(Debug, Clone)]
pub struct CalibratedTable {
    features: FeatureTable,
    clusters: Vec<usize>,
    risks: Vec<RiskLevel>,
}

impl CalibratedTable {
    /// Join labels onto `features`; `pixels` must key the same rows
    pub fn join(
        features: FeatureTable,
        pixels: &[usize],
        clusters: Vec<usize>,
        risks: Vec<RiskLevel>,
    ) -> GlofResult<Self> {
        if pixels != features.pixels() {
            return Err(GlofError::schema(
                "calibrated table",
                "label pixel keys differ from feature pixel keys",
            ));
        }
        if clusters.len() != pixels.len() || risks.len() != pixels.len() {
            return Err(GlofError::schema(
                "calibrated table",
                format!(
                    "{} rows, {} clusters, {} risks",
                    pixels.len(),
                    clusters.len(),
                    risks.len()
                ),
            ));
        }
        Ok(Self {
            features,
            clusters,
            risks,
        })
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    pub fn risks(&self) -> &[RiskLevel] {
        &self.risks
    }
}

/// Parameters for risk calibration
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    pub imputation: ImputationStrategy,
    pub kmeans: KMeansParams,
    pub mapping: ClusterRiskMapping,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            imputation: ImputationStrategy::Mean,
            kmeans: KMeansParams::default(),
            mapping: ClusterRiskMapping::default(),
        }
    }
}

/// Everything a calibration run produces
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub imputer: Imputer,
    pub scaler: StandardScaler,
    /// Imputed and standardised historical matrix
    pub scaled: Array2<f64>,
    pub clustering: KMeansModel,
    pub table: CalibratedTable,
    pub mapping_version: String,
}

impl CalibrationOutcome {
    pub fn risks(&self) -> &[RiskLevel] {
        self.table.risks()
    }
}

/// Labels a historical feature table through clustering and a curated mapping
pub struct RiskCalibrator {
    params: CalibrationParams,
}

impl RiskCalibrator {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(CalibrationParams::default())
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    pub fn calibrate(&self, table: &FeatureTable) -> GlofResult<CalibrationOutcome> {
        log::info!("Calibrating risk labels on {} rows", table.n_rows());

        let imputer = Imputer::fit(self.params.imputation, table.values())?;
        let filled = imputer.transform(table.values())?;
        let scaler = StandardScaler::fit(&filled)?;
        let scaled = scaler.transform(&filled)?;

        let clustering = KMeans::new(self.params.kmeans.clone()).fit(&scaled)?;
        let clusters = clustering.predict(&scaled)?;
        let cluster_risk = self.params.mapping.resolve(&clustering)?;
        let risks: Vec<RiskLevel> = clusters.iter().map(|c| cluster_risk[*c]).collect();

        for level in RiskLevel::ALL {
            log::info!(
                "  {}: {} pixels",
                level,
                risks.iter().filter(|r| **r == level).count()
            );
        }

        let pixels = table.pixels().to_vec();
        let calibrated = CalibratedTable::join(table.clone(), &pixels, clusters, risks)?;

        Ok(CalibrationOutcome {
            imputer,
            scaler,
            scaled,
            clustering,
            table: calibrated,
            mapping_version: self.params.mapping.version.clone(),
        })
    }
}
