use crate::types::{GlofError, GlofResult, RiskLevel};
use serde::Serialize;
use std::fmt;

const N_LEVELS: usize = RiskLevel::ALL.len();

/// Confusion counts over all risk levels; rows are true, columns predicted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    counts: [[usize; N_LEVELS]; N_LEVELS],
}

impl ConfusionMatrix {
    pub fn from_labels(truth: &[RiskLevel], predicted: &[RiskLevel]) -> GlofResult<Self> {
        if truth.len() != predicted.len() {
            return Err(GlofError::schema(
                "evaluation",
                format!(
                    "{} true labels for {} predictions",
                    truth.len(),
                    predicted.len()
                ),
            ));
        }
        let mut counts = [[0; N_LEVELS]; N_LEVELS];
        for (t, p) in truth.iter().zip(predicted) {
            counts[t.index()][p.index()] += 1;
        }
        Ok(Self { counts })
    }

    pub fn get(&self, truth: RiskLevel, predicted: RiskLevel) -> usize {
        self.counts[truth.index()][predicted.index()]
    }

    pub fn counts(&self) -> &[[usize; N_LEVELS]; N_LEVELS] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..N_LEVELS).map(|i| self.counts[i][i]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "")?;
        for level in RiskLevel::ALL {
            write!(f, "{:>10}", level.to_string())?;
        }
        writeln!(f)?;
        for level in RiskLevel::ALL {
            write!(f, "{:>10}", level.to_string())?;
            for count in self.counts[level.index()] {
                write!(f, "{:>10}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Precision, recall, F1 and support of one class or average
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Per-class metrics plus accuracy and macro/weighted averages.
///
/// Every level gets a row. The macro average covers only levels that occur
/// in the truth or the predictions. Any zero denominator yields 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<(RiskLevel, ClassMetrics)>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let counts = matrix.counts();
        let total = matrix.total();

        let mut present = [false; N_LEVELS];
        let classes: Vec<(RiskLevel, ClassMetrics)> = RiskLevel::ALL
            .iter()
            .map(|&level| {
                let i = level.index();
                let tp = counts[i][i];
                let predicted: usize = (0..N_LEVELS).map(|r| counts[r][i]).sum();
                let support: usize = counts[i].iter().sum();
                present[i] = predicted + support > 0;

                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                (
                    level,
                    ClassMetrics {
                        precision,
                        recall,
                        f1,
                        support,
                    },
                )
            })
            .collect();

        let observed: Vec<&ClassMetrics> = classes
            .iter()
            .filter(|(level, _)| present[level.index()])
            .map(|(_, m)| m)
            .collect();
        let mean = |value: fn(&ClassMetrics) -> f64| -> f64 {
            if observed.is_empty() {
                return 0.0;
            }
            observed.iter().map(|m| value(m)).sum::<f64>() / observed.len() as f64
        };
        let macro_avg = ClassMetrics {
            precision: mean(|m| m.precision),
            recall: mean(|m| m.recall),
            f1: mean(|m| m.f1),
            support: total,
        };

        let weighted = |value: fn(&ClassMetrics) -> f64| -> f64 {
            if total == 0 {
                return 0.0;
            }
            classes
                .iter()
                .map(|(_, m)| value(m) * m.support as f64)
                .sum::<f64>()
                / total as f64
        };
        let weighted_avg = ClassMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
            support: total,
        };

        Self {
            accuracy: ratio(matrix.correct(), total),
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14}{:>11}{:>11}{:>11}{:>11}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (level, m) in &self.classes {
            writeln!(
                f,
                "{:>14}{:>11.2}{:>11.2}{:>11.2}{:>11}",
                level.to_string(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14}{:>11}{:>11}{:>11.2}{:>11}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14}{:>11.2}{:>11.2}{:>11.2}{:>11}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}

/// Held-out evaluation of a trained classifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub n_train: usize,
    pub n_test: usize,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl EvaluationReport {
    pub fn new(
        n_train: usize,
        truth: &[RiskLevel],
        predicted: &[RiskLevel],
    ) -> GlofResult<Self> {
        let confusion = ConfusionMatrix::from_labels(truth, predicted)?;
        let report = ClassificationReport::from_confusion(&confusion);
        Ok(Self {
            n_train,
            n_test: truth.len(),
            confusion,
            report,
        })
    }

    pub fn log(&self) {
        log::info!(
            "Evaluation on {} held-out rows ({} training rows): accuracy {:.4}",
            self.n_test,
            self.n_train,
            self.report.accuracy
        );
        for line in self.confusion.to_string().lines() {
            log::info!("  {}", line);
        }
        for line in self.report.to_string().lines() {
            log::debug!("  {}", line);
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Confusion matrix (rows: true, columns: predicted)")?;
        write!(f, "{}", self.confusion)?;
        writeln!(f)?;
        write!(f, "{}", self.report)
    }
}
