use crate::core::calibration::CalibrationOutcome;
use crate::core::features::{reshape_by_key, FeatureTable, FEATURE_COLUMNS};
use crate::core::forest::{ForestParams, RandomForest};
use crate::core::metrics::EvaluationReport;
use crate::core::preprocess::{ImputationStrategy, Imputer, StandardScaler};
use crate::types::{GlofError, GlofResult, RiskLevel};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Parameters for classifier training and prediction
#[derive(Debug, Clone)]
pub struct ClassifierParams {
    /// Share of calibrated rows held out for evaluation
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
    /// Fill policy for missing values in tables passed to `predict`
    pub prediction_imputation: ImputationStrategy,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            test_fraction: 0.25,
            split_seed: 42,
            forest: ForestParams::default(),
            prediction_imputation: ImputationStrategy::Zero,
        }
    }
}

/// Seeded shuffle split into `(train, test)` row indices.
///
/// The test partition takes `ceil(test_fraction * n)` rows.
pub fn train_test_split(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> GlofResult<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(GlofError::Config(format!(
            "test fraction must lie in (0, 1), got {}",
            test_fraction
        )));
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(GlofError::degenerate(
            "train/test split",
            format!(
                "{} rows cannot be split with test fraction {}",
                n, test_fraction
            ),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut rng);
    let train = permutation.split_off(n_test);
    Ok((train, permutation))
}

/// Trained classifier artifact.
///
/// The fitted scaler and forest travel together: predictions always
/// standardise with the statistics of the calibration epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    schema: Vec<String>,
    mapping_version: String,
    calibration_imputation: ImputationStrategy,
    imputer: Imputer,
    scaler: StandardScaler,
    forest: RandomForest,
}

impl RiskModel {
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn mapping_version(&self) -> &str {
        &self.mapping_version
    }

    pub fn prediction_imputation(&self) -> ImputationStrategy {
        self.imputer.strategy()
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn n_trees(&self) -> usize {
        self.forest.n_trees()
    }

    fn check_schema(&self) -> GlofResult<()> {
        if self.schema.iter().map(String::as_str).ne(FEATURE_COLUMNS.iter().copied()) {
            return Err(GlofError::schema(
                "risk model",
                format!(
                    "model schema {:?} differs from feature schema {:?}",
                    self.schema, FEATURE_COLUMNS
                ),
            ));
        }
        Ok(())
    }

    /// Classify already imputed and standardised rows
    pub(crate) fn classify_scaled(&self, scaled: &Array2<f64>) -> GlofResult<Vec<RiskLevel>> {
        self.forest
            .predict(scaled)?
            .into_iter()
            .map(|class| {
                RiskLevel::from_index(class).ok_or_else(|| {
                    GlofError::schema("risk model", format!("forest produced class {}", class))
                })
            })
            .collect()
    }

    /// Risk level for every row of a new-epoch table
    pub fn predict(&self, table: &FeatureTable) -> GlofResult<PredictionTable> {
        self.check_schema()?;
        log::info!("Predicting risk for {} rows", table.n_rows());
        if self.imputer.strategy() != self.calibration_imputation {
            log::warn!(
                "Prediction imputation ({}) differs from calibration imputation ({})",
                self.imputer.strategy(),
                self.calibration_imputation
            );
        }

        let filled = self.imputer.transform(table.values())?;
        let scaled = self.scaler.transform(&filled)?;
        let predicted = self.classify_scaled(&scaled)?;

        for level in RiskLevel::ALL {
            log::info!(
                "  {}: {} pixels",
                level,
                predicted.iter().filter(|r| **r == level).count()
            );
        }

        PredictionTable::new(table.clone(), predicted)
    }
}

/// New-epoch features with their predicted risk
#[derive(Debug, Clone)]
pub struct PredictionTable {
    features: FeatureTable,
    predicted: Vec<RiskLevel>,
}

impl PredictionTable {
    pub fn new(features: FeatureTable, predicted: Vec<RiskLevel>) -> GlofResult<Self> {
        if predicted.len() != features.n_rows() {
            return Err(GlofError::schema(
                "prediction table",
                format!(
                    "{} predictions for {} rows",
                    predicted.len(),
                    features.n_rows()
                ),
            ));
        }
        Ok(Self {
            features,
            predicted,
        })
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn predicted(&self) -> &[RiskLevel] {
        &self.predicted
    }

    /// Predicted risk placed back onto the grid; `None` where no row exists
    pub fn risk_grid(&self) -> GlofResult<Array2<Option<RiskLevel>>> {
        let values: Vec<Option<RiskLevel>> = self.predicted.iter().map(|r| Some(*r)).collect();
        reshape_by_key(
            &values,
            self.features.pixels(),
            self.features.shape(),
            None,
        )
    }
}

/// Trains the random forest on calibrated labels
pub struct RiskClassifier {
    params: ClassifierParams,
}

impl RiskClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ClassifierParams::default())
    }

    /// Fit on a calibration outcome and evaluate on the held-out split
    pub fn train(&self, outcome: &CalibrationOutcome) -> GlofResult<(RiskModel, EvaluationReport)> {
        let x = &outcome.scaled;
        let y: Vec<usize> = outcome.risks().iter().map(|r| r.index()).collect();
        let (train, test) =
            train_test_split(x.nrows(), self.params.test_fraction, self.params.split_seed)?;
        log::info!(
            "Split {} calibrated rows into {} train / {} test (seed {})",
            x.nrows(),
            train.len(),
            test.len(),
            self.params.split_seed
        );

        let x_train = x.select(Axis(0), &train);
        let y_train: Vec<usize> = train.iter().map(|&i| y[i]).collect();
        let forest = RandomForest::fit(&self.params.forest, &x_train, &y_train, RiskLevel::ALL.len())?;

        let imputer = match self.params.prediction_imputation {
            ImputationStrategy::Zero => {
                Imputer::from_fill(ImputationStrategy::Zero, vec![0.0; x.ncols()])
            }
            ImputationStrategy::Mean if outcome.imputer.strategy() == ImputationStrategy::Mean => {
                outcome.imputer.clone()
            }
            ImputationStrategy::Mean => {
                Imputer::fit(ImputationStrategy::Mean, outcome.table.features().values())?
            }
        };

        let model = RiskModel {
            schema: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            mapping_version: outcome.mapping_version.clone(),
            calibration_imputation: outcome.imputer.strategy(),
            imputer,
            scaler: outcome.scaler.clone(),
            forest,
        };

        let x_test = x.select(Axis(0), &test);
        let truth: Vec<RiskLevel> = test.iter().map(|&i| outcome.risks()[i]).collect();
        let predicted = model.classify_scaled(&x_test)?;
        let evaluation = EvaluationReport::new(train.len(), &truth, &predicted)?;
        evaluation.log();

        Ok((model, evaluation))
    }
}
