//! The isolation-forest model itself: tree construction and scoring. No
//! `linfa`/`smartcore` dependency is used anywhere in the corpus this
//! crate is grounded on, so the algorithm is implemented from scratch.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf { size: usize },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Euler-Mascheroni constant, used in the average-path-length correction.
const EULER_MASCHERONI: f64 = 0.5772156649015329;

/// Average path length of an unsuccessful search in a binary search tree
/// built over `n` points (Liu, Ting & Zhou, 2008).
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * harmonic(n - 1.0) - (2.0 * (n - 1.0) / n)
}

fn harmonic(n: f64) -> f64 {
    n.ln() + EULER_MASCHERONI
}

fn max_depth(max_samples: usize) -> usize {
    (max_samples as f64).log2().ceil() as usize
}

fn build_node(rows: &[&[f64]], depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if rows.len() <= 1 || depth >= limit {
        return Node::Leaf { size: rows.len() };
    }

    let width = rows[0].len();
    let feature = rng.gen_range(0..width);
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for row in rows {
        lo = lo.min(row[feature]);
        hi = hi.max(row[feature]);
    }
    if lo == hi {
        return Node::Leaf { size: rows.len() };
    }
    let value = rng.gen_range(lo..hi);

    let (left_rows, right_rows): (Vec<&[f64]>, Vec<&[f64]>) =
        rows.iter().partition(|row| row[feature] < value);

    if left_rows.is_empty() || right_rows.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    Node::Split {
        feature,
        value,
        left: Box::new(build_node(&left_rows, depth + 1, limit, rng)),
        right: Box::new(build_node(&right_rows, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + c_factor(*size),
        Node::Split { feature, value, left, right } => {
            if row[*feature] < *value {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// A single isolation tree, built over a random sub-sample of the
/// training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    root: Node,
}

/// An isolation forest: an ensemble of trees, each built on a random
/// sub-sample of the training set, used to score how easily a row is
/// isolated by random axis-aligned splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Tree>,
    max_samples: usize,
}

impl IsolationForest {
    /// Fits `n_estimators` trees, each on an independent random
    /// sub-sample of up to `max_samples` rows from `rows`, using `seed`
    /// so training is reproducible.
    pub fn fit(rows: &[Vec<f64>], n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = max_samples.min(rows.len());
        let limit = max_depth(sample_size);

        let trees = (0..n_estimators)
            .map(|_| {
                let mut indices: Vec<usize> = (0..rows.len()).collect();
                for i in (1..indices.len()).rev() {
                    let j = rng.gen_range(0..=i);
                    indices.swap(i, j);
                }
                let subsample: Vec<&[f64]> = indices[..sample_size].iter().map(|&i| rows[i].as_slice()).collect();
                Tree {
                    root: build_node(&subsample, 0, limit, &mut rng),
                }
            })
            .collect();

        Self { trees, max_samples: sample_size }
    }

    /// Anomaly score in `(0, 1)`: values near 1 indicate an easily
    /// isolated (anomalous) row; values near 0.5 or below indicate a
    /// typical row.
    pub fn score(&self, row: &[f64]) -> f64 {
        let avg_path = self.trees.iter().map(|t| path_length(&t.root, row, 0)).sum::<f64>() / self.trees.len() as f64;
        2f64.powf(-avg_path / c_factor(self.max_samples).max(1e-9))
    }

    /// Scores every row in `rows`.
    pub fn score_all(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.score(r)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn clustered_row(offset: f64, width: usize) -> Vec<f64> {
        (0..width).map(|i| offset + i as f64 * 0.01).collect()
    }

    #[test]
    fn an_outlier_scores_higher_than_a_point_within_the_cluster() {
        let mut rows: Vec<Vec<f64>> = (0..200).map(|i| clustered_row((i % 5) as f64 * 0.1, 4)).collect();
        let outlier = vec![500.0, 500.0, 500.0, 500.0];
        rows.push(outlier.clone());

        let forest = IsolationForest::fit(&rows, 100, 64, 7);
        let inlier_score = forest.score(&clustered_row(0.0, 4));
        let outlier_score = forest.score(&outlier);
        assert!(outlier_score > inlier_score, "{outlier_score} should exceed {inlier_score}");
    }

    #[test]
    fn fitting_is_reproducible_given_the_same_seed() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| clustered_row((i % 3) as f64, 3)).collect();
        let a = IsolationForest::fit(&rows, 20, 32, 42);
        let b = IsolationForest::fit(&rows, 20, 32, 42);
        let probe = clustered_row(0.5, 3);
        assert_eq!(a.score(&probe), b.score(&probe));
    }
}
