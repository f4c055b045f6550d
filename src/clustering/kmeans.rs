//! K-means clustering.
//!
//! k-means++ seeding: the first centroid is a uniformly random point, every further
//! centroid is drawn with probability proportional to the squared distance to the
//! closest centroid chosen so far. Lloyd iterations then alternate assignment and
//! mean update until labels stop changing, centroids move less than the tolerance,
//! or the iteration cap is reached.

use crate::distance::{DistanceMetric, SquaredEuclidean};
use crate::error::{Error, Result};
use crate::types::Point2D;
use crate::utils::make_rng;
use log::debug;
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MAX_ITER: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    k: usize,
    max_iter: usize,
    tol: f64,
    seed: Option<u64>,
}

/// Labels, centroids and cluster shares of one k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// Label in `[0, k)` for every input point, in input order.
    pub labels: Vec<usize>,
    /// One row per centroid.
    pub centroids: Array2<f64>,
    /// Percentage (0-100) of points carrying each label that occurs.
    pub percentages: BTreeMap<usize, f64>,
    pub iterations: usize,
}

impl ClusterResult {
    fn empty(dims: usize) -> Self {
        Self {
            labels: Vec::new(),
            centroids: Array2::zeros((0, dims)),
            percentages: BTreeMap::new(),
            iterations: 0,
        }
    }

    pub fn n_distinct_labels(&self) -> usize {
        self.percentages.len()
    }
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: DEFAULT_MAX_ITER,
            tol: 1e-4,
            seed: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Makes the seeding reproducible. Without a seed every run draws fresh entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_seed_opt(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn fit_points(&self, points: &[Point2D]) -> Result<ClusterResult> {
        let data = Array2::from_shape_fn((points.len(), 2), |(i, d)| {
            if d == 0 {
                points[i].x
            } else {
                points[i].y
            }
        });
        self.fit(data.view())
    }

    /// Clusters the rows of `data`. `k` is clamped to the number of rows.
    pub fn fit(&self, data: ArrayView2<f64>) -> Result<ClusterResult> {
        if self.k == 0 {
            return Err(Error::out_of_range("k", 0.0, "must be positive"));
        }
        let (n, d) = data.dim();
        if n == 0 {
            return Ok(ClusterResult::empty(d));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(
                "cannot cluster NaN or infinite coordinates".to_string(),
            ));
        }
        let k = self.k.min(n);

        let mut rng = make_rng(self.seed);
        let mut centroids = init_centroids(data, k, &mut rng);
        let mut labels = vec![usize::MAX; n];
        let mut iterations = 0;

        for _ in 0..self.max_iter {
            iterations += 1;
            let centroids_ref = &centroids;
            let new_labels: Vec<usize> = (0..n)
                .into_par_iter()
                .map(|i| nearest_centroid(data.row(i), centroids_ref))
                .collect();
            let changed = new_labels != labels;
            labels = new_labels;

            let mut sums = Array2::<f64>::zeros((k, d));
            let mut counts = vec![0usize; k];
            for (i, &label) in labels.iter().enumerate() {
                let mut row = sums.row_mut(label);
                row += &data.row(i);
                counts[label] += 1;
            }
            let mut shift = 0.0;
            for c in 0..k {
                // an empty cluster keeps its previous centroid
                if counts[c] == 0 {
                    continue;
                }
                let mean = sums.row(c).mapv(|v| v / counts[c] as f64);
                shift += SquaredEuclidean.distance(mean.view(), centroids.row(c));
                centroids.row_mut(c).assign(&mean);
            }

            if !changed || shift < self.tol {
                break;
            }
        }

        let mut percentages = BTreeMap::new();
        for &label in &labels {
            *percentages.entry(label).or_insert(0.0) += 1.0;
        }
        for share in percentages.values_mut() {
            *share = *share / n as f64 * 100.0;
        }
        debug!(
            "k-means: {} points, k={}, {} iterations, {} non-empty clusters",
            n,
            k,
            iterations,
            percentages.len()
        );

        Ok(ClusterResult {
            labels,
            centroids,
            percentages,
            iterations,
        })
    }
}

/// Index of the closest centroid; equal distances go to the lowest index.
fn nearest_centroid(point: ndarray::ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centroid) in centroids.rows().into_iter().enumerate() {
        let dist = SquaredEuclidean.distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

fn init_centroids<R: Rng>(data: ArrayView2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut centroids = Array2::<f64>::zeros((k, d));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest: Vec<f64> = (0..n)
        .map(|i| SquaredEuclidean.distance(data.row(i), centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let selected = if total > 0.0 {
            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = n - 1;
            for (i, &dist) in closest.iter().enumerate() {
                cumsum += dist;
                if cumsum >= threshold && dist > 0.0 {
                    selected = i;
                    break;
                }
            }
            selected
        } else {
            // every point coincides with a centroid already
            rng.random_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(selected));

        for (i, slot) in closest.iter_mut().enumerate() {
            let dist = SquaredEuclidean.distance(data.row(i), centroids.row(c));
            if dist < *slot {
                *slot = dist;
            }
        }
    }
    centroids
}
