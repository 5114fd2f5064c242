//! Seeded k-means clustering over feature rows
//!
//! k-means++ initialisation followed by Lloyd iterations, repeated `n_init`
//! times; the run with the lowest inertia wins.

use crate::types::{GlofError, GlofResult};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters for k-means clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Number of clusters
    pub n_clusters: usize,
    /// Seed of the run's random generator
    pub seed: u64,
    /// Independent initialisations; the lowest inertia is kept
    pub n_init: usize,
    /// Maximum Lloyd iterations per initialisation
    pub max_iter: usize,
    /// Convergence threshold on the squared centroid shift, relative to the
    /// mean feature variance
    pub tol: f64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            seed: 42,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
        }
    }
}

/// Fitted cluster centroids
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansModel {
    centroids: Array2<f64>,
    inertia: f64,
    n_iter: usize,
}

impl KMeansModel {
    /// Centroids, one row per cluster id
    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    /// Sum of squared distances of the fitted rows to their centroid
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Nearest-centroid cluster id for every row
    pub fn predict(&self, x: &Array2<f64>) -> GlofResult<Vec<usize>> {
        if x.ncols() != self.centroids.ncols() {
            return Err(GlofError::schema(
                "k-means",
                format!(
                    "model has {} features, input has {}",
                    self.centroids.ncols(),
                    x.ncols()
                ),
            ));
        }
        Ok(assign(x, &self.centroids).into_iter().map(|(c, _)| c).collect())
    }
}

/// K-means clustering
pub struct KMeans {
    params: KMeansParams,
}

impl KMeans {
    pub fn new(params: KMeansParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(KMeansParams::default())
    }

    pub fn fit(&self, x: &Array2<f64>) -> GlofResult<KMeansModel> {
        let k = self.params.n_clusters;
        if k == 0 || self.params.n_init == 0 || self.params.max_iter == 0 {
            return Err(GlofError::Config(format!(
                "k-means requires positive n_clusters, n_init and max_iter, got {:?}",
                self.params
            )));
        }
        let n = x.nrows();
        if n < k {
            return Err(GlofError::degenerate(
                "clustering",
                format!("{} rows cannot form {} clusters", n, k),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GlofError::degenerate(
                "clustering",
                "feature matrix contains undefined values",
            ));
        }

        log::info!(
            "Running k-means: {} rows, {} clusters, {} initialisations (seed {})",
            n,
            k,
            self.params.n_init,
            self.params.seed
        );

        let tol = self.params.tol * mean_variance(x);
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut best: Option<KMeansModel> = None;

        for init in 0..self.params.n_init {
            let run = self.run_once(x, tol, &mut rng);
            log::debug!(
                "k-means init {}: inertia {:.6} after {} iterations",
                init,
                run.inertia,
                run.n_iter
            );
            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }

        let best = best.ok_or_else(|| GlofError::degenerate("clustering", "no k-means run"))?;
        log::info!("k-means inertia: {:.6}", best.inertia);
        Ok(best)
    }

    fn run_once(&self, x: &Array2<f64>, tol: f64, rng: &mut StdRng) -> KMeansModel {
        let k = self.params.n_clusters;
        let mut centroids = init_plus_plus(x, k, rng);
        let mut n_iter = self.params.max_iter;

        for iteration in 1..=self.params.max_iter {
            let assignment = assign(x, &centroids);
            let updated = update_centroids(x, &assignment, &centroids);

            let shift: f64 = updated
                .iter()
                .zip(centroids.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            centroids = updated;

            if shift <= tol {
                n_iter = iteration;
                break;
            }
        }

        let inertia = assign(x, &centroids).iter().map(|(_, d)| d).sum::<f64>();
        KMeansModel {
            centroids,
            inertia,
            n_iter,
        }
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest centroid and squared distance per row; ties go to the lower id
fn assign(x: &Array2<f64>, centroids: &Array2<f64>) -> Vec<(usize, f64)> {
    x.axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let mut best = (0, f64::INFINITY);
            for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
                let d = squared_distance(row, centroid);
                if d < best.1 {
                    best = (c, d);
                }
            }
            best
        })
        .collect()
}

/// Mean of the assigned rows; an empty cluster takes the row farthest from
/// its own centroid.
fn update_centroids(
    x: &Array2<f64>,
    assignment: &[(usize, f64)],
    previous: &Array2<f64>,
) -> Array2<f64> {
    let k = previous.nrows();
    let mut sums = Array2::<f64>::zeros(previous.raw_dim());
    let mut counts = vec![0usize; k];

    for (row, &(c, _)) in x.axis_iter(Axis(0)).zip(assignment) {
        let mut sum = sums.row_mut(c);
        sum += &row;
        counts[c] += 1;
    }

    let mut distances: Vec<f64> = assignment.iter().map(|(_, d)| *d).collect();
    for c in 0..k {
        if counts[c] > 0 {
            let count = counts[c] as f64;
            sums.row_mut(c).mapv_inplace(|v| v / count);
        } else {
            let farthest = distances
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &d)| {
                    if d > best.1 {
                        (i, d)
                    } else {
                        best
                    }
                })
                .0;
            log::debug!("Re-seeding empty cluster {} with row {}", c, farthest);
            sums.row_mut(c).assign(&x.row(farthest));
            distances[farthest] = 0.0;
        }
    }
    sums
}

/// k-means++ seeding: each next centroid is drawn with probability
/// proportional to its squared distance from the chosen ones
fn init_plus_plus(x: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let mut centroids = Array2::<f64>::zeros((k, x.ncols()));

    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&x.row(first));
    let mut closest: Vec<f64> = x
        .axis_iter(Axis(0))
        .map(|row| squared_distance(row, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = n - 1;
            for (i, d) in closest.iter().enumerate() {
                cumulative += d;
                if cumulative > target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        centroids.row_mut(c).assign(&x.row(chosen));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let d = squared_distance(row, centroids.row(c));
            if d < closest[i] {
                closest[i] = d;
            }
        }
    }
    centroids
}

fn mean_variance(x: &Array2<f64>) -> f64 {
    let n = x.nrows() as f64;
    let mut total = 0.0;
    for column in x.axis_iter(Axis(1)) {
        let mean = column.sum() / n;
        total += column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    }
    total / x.ncols().max(1) as f64
}
