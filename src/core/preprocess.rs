use crate::core::features::FEATURE_COLUMNS;
use crate::types::{GlofError, GlofResult};
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How missing feature values are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputationStrategy {
    /// Column mean of the table the imputer was fit on
    Mean,
    /// Constant zero
    Zero,
}

impl fmt::Display for ImputationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImputationStrategy::Mean => write!(f, "mean"),
            ImputationStrategy::Zero => write!(f, "zero"),
        }
    }
}

fn column_name(index: usize) -> String {
    FEATURE_COLUMNS
        .get(index)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("column {}", index))
}

fn check_width(context: &str, expected: usize, found: usize) -> GlofResult<()> {
    if expected != found {
        return Err(GlofError::schema(
            context,
            format!("fitted on {} columns, got {}", expected, found),
        ));
    }
    Ok(())
}

/// Fitted per-column fill values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imputer {
    strategy: ImputationStrategy,
    fill: Vec<f64>,
}

impl Imputer {
    /// Fit fill values on `values`, ignoring NaN.
    ///
    /// Mean imputation of a column with no defined value is an error.
    pub fn fit(strategy: ImputationStrategy, values: &Array2<f64>) -> GlofResult<Self> {
        let fill = match strategy {
            ImputationStrategy::Zero => vec![0.0; values.ncols()],
            ImputationStrategy::Mean => {
                let mut means = Vec::with_capacity(values.ncols());
                for (c, column) in values.axis_iter(Axis(1)).enumerate() {
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for v in column.iter().filter(|v| !v.is_nan()) {
                        sum += v;
                        count += 1;
                    }
                    if count == 0 {
                        return Err(GlofError::degenerate(
                            "mean imputation",
                            format!("column '{}' has no defined values", column_name(c)),
                        ));
                    }
                    means.push(sum / count as f64);
                }
                means
            }
        };
        log::debug!("Imputation ({}) fill values: {:?}", strategy, fill);
        Ok(Self { strategy, fill })
    }

    /// Reuse previously fitted fill values under a known strategy
    pub fn from_fill(strategy: ImputationStrategy, fill: Vec<f64>) -> Self {
        Self { strategy, fill }
    }

    pub fn strategy(&self) -> ImputationStrategy {
        self.strategy
    }

    pub fn fill_values(&self) -> &[f64] {
        &self.fill
    }

    pub fn transform(&self, values: &Array2<f64>) -> GlofResult<Array2<f64>> {
        check_width("imputation", self.fill.len(), values.ncols())?;
        let mut out = values.clone();
        let mut filled = 0usize;
        for (mut column, fill) in out.axis_iter_mut(Axis(1)).zip(self.fill.iter()) {
            for v in column.iter_mut() {
                if v.is_nan() {
                    *v = *fill;
                    filled += 1;
                }
            }
        }
        if filled > 0 {
            log::debug!("Imputed {} missing values ({})", filled, self.strategy);
        }
        Ok(out)
    }
}

/// Zero-mean, unit population variance scaling.
///
/// Immutable once fitted: there is no way to refit in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(values: &Array2<f64>) -> GlofResult<Self> {
        let n = values.nrows();
        if n == 0 {
            return Err(GlofError::degenerate("standardisation", "table has no rows"));
        }

        let mut mean = Vec::with_capacity(values.ncols());
        let mut scale = Vec::with_capacity(values.ncols());
        for (c, column) in values.axis_iter(Axis(1)).enumerate() {
            let m = column.iter().sum::<f64>() / n as f64;
            let var = column.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n as f64;
            if !m.is_finite() || !var.is_finite() {
                return Err(GlofError::degenerate(
                    "standardisation",
                    format!("column '{}' contains undefined values", column_name(c)),
                ));
            }
            let std = var.sqrt();
            if std == 0.0 {
                log::warn!("Column '{}' has zero variance; scale set to 1", column_name(c));
            }
            mean.push(m);
            scale.push(if std == 0.0 { 1.0 } else { std });
        }

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, values: &Array2<f64>) -> GlofResult<Array2<f64>> {
        check_width("standard scaler", self.mean.len(), values.ncols())?;
        let mut out = values.clone();
        for ((mut column, m), s) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter())
            .zip(self.scale.iter())
        {
            Zip::from(&mut column).par_for_each(|v| *v = (*v - m) / s);
        }
        Ok(out)
    }
}
