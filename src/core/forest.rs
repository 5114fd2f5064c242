//! Random forest of CART trees with Gini splits

use crate::types::{GlofError, GlofResult};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of candidate features examined per split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    /// floor(sqrt(n_features)), at least 1
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(count) => count.min(n_features),
        };
        n.max(1)
    }
}

/// Random forest hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Grow each tree on a bootstrap sample of the training rows
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> GlofResult<()> {
        if self.n_trees == 0 {
            return Err(GlofError::Config("forest needs at least one tree".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(GlofError::Config(format!(
                "min_samples_split must be at least 2, got {}",
                self.min_samples_split
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(GlofError::Config("min_samples_leaf must be positive".to_string()));
        }
        if self.max_depth == Some(0) {
            return Err(GlofError::Config("max_depth must be positive".to_string()));
        }
        if self.max_features == MaxFeatures::Count(0) {
            return Err(GlofError::Config("max_features must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted classification tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match &nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn predict_row(&self, row: &[f64]) -> usize {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    max_features: usize,
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

/// Most frequent class; ties go to the lower class index
fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best
}

impl<'a> TreeBuilder<'a> {
    fn counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in indices {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn build(&self, indices: Vec<usize>, depth: usize, rng: &mut StdRng, nodes: &mut Vec<Node>) -> usize {
        let counts = self.counts(&indices);
        let class = majority(&counts);
        let at = nodes.len();
        nodes.push(Node::Leaf { class });

        let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
        let too_small = indices.len() < self.params.min_samples_split
            || indices.len() < 2 * self.params.min_samples_leaf;
        let too_deep = self.params.max_depth.map_or(false, |d| depth >= d);
        if pure || too_small || too_deep {
            return at;
        }

        let (feature, threshold) = match self.best_split(&indices, &counts, rng) {
            Some(split) => split,
            None => return at,
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[[i, feature]] <= threshold);

        let left = self.build(left, depth + 1, rng, nodes);
        let right = self.build(right, depth + 1, rng, nodes);
        nodes[at] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        at
    }

    /// Lowest weighted child impurity over up to `max_features` non-constant
    /// features, drawn in random order
    fn best_split(&self, indices: &[usize], counts: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        let mut best: Option<(usize, f64, f64)> = None;
        let mut visited = 0;
        let mut pairs: Vec<(f64, usize)> = Vec::with_capacity(n);

        for feature in features {
            if visited >= self.max_features {
                break;
            }
            pairs.clear();
            pairs.extend(indices.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
            if pairs[0].0 == pairs[n - 1].0 {
                // constant here, does not count towards max_features
                continue;
            }
            visited += 1;

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for pos in 0..n - 1 {
                let (value, class) = pairs[pos];
                left[class] += 1;
                right[class] -= 1;

                let next = pairs[pos + 1].0;
                if value == next {
                    continue;
                }
                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let score = n_left as f64 * gini(&left, n_left) + n_right as f64 * gini(&right, n_right);
                if best.map_or(true, |(_, _, s)| score < s) {
                    let mut threshold = value + (next - value) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some((feature, threshold, score));
                }
            }
        }

        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

/// Bagged ensemble of decision trees, majority vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
}

impl RandomForest {
    /// Fit on rows of `x` with class labels `y` in `0..n_classes`
    pub fn fit(params: &ForestParams, x: &Array2<f64>, y: &[usize], n_classes: usize) -> GlofResult<Self> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(GlofError::degenerate("forest training", "training matrix is empty"));
        }
        if y.len() != n {
            return Err(GlofError::schema(
                "forest training",
                format!("{} labels for {} rows", y.len(), n),
            ));
        }
        if let Some(bad) = y.iter().find(|c| **c >= n_classes) {
            return Err(GlofError::schema(
                "forest training",
                format!("label {} outside 0..{}", bad, n_classes),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GlofError::degenerate(
                "forest training",
                "training matrix contains undefined values",
            ));
        }

        let max_features = params.max_features.resolve(x.ncols());
        log::info!(
            "Training random forest: {} trees, {} rows, {} features ({} per split), seed {}",
            params.n_trees,
            n,
            x.ncols(),
            max_features,
            params.seed
        );

        // Per-tree seeds are drawn up front so results do not depend on scheduling
        let mut seeder = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_trees).map(|_| seeder.gen()).collect();

        let builder = TreeBuilder {
            x,
            y,
            n_classes,
            params,
            max_features,
        };
        let grow = |seed: u64| -> DecisionTree {
            let mut rng = StdRng::seed_from_u64(seed);
            let sample: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut nodes = Vec::new();
            builder.build(sample, 0, &mut rng, &mut nodes);
            DecisionTree { nodes }
        };

        #[cfg(feature = "parallel")]
        let trees: Vec<DecisionTree> = seeds.into_par_iter().map(grow).collect();
        #[cfg(not(feature = "parallel"))]
        let trees: Vec<DecisionTree> = seeds.into_iter().map(grow).collect();

        log::debug!(
            "Forest grown: mean depth {:.1}, mean nodes {:.1}",
            trees.iter().map(|t| t.depth() as f64).sum::<f64>() / trees.len() as f64,
            trees.iter().map(|t| t.n_nodes() as f64).sum::<f64>() / trees.len() as f64
        );

        Ok(Self {
            trees,
            n_features: x.ncols(),
            n_classes,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Majority vote of all trees per row; ties go to the lower class
    pub fn predict(&self, x: &Array2<f64>) -> GlofResult<Vec<usize>> {
        if x.ncols() != self.n_features {
            return Err(GlofError::schema(
                "forest prediction",
                format!(
                    "forest was trained on {} features, input has {}",
                    self.n_features,
                    x.ncols()
                ),
            ));
        }

        Ok(x.axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| {
                let row = row.to_vec();
                let mut votes = vec![0usize; self.n_classes];
                for tree in &self.trees {
                    votes[tree.predict_row(&row)] += 1;
                }
                majority(&votes)
            })
            .collect())
    }
}
