//! # UMAP
//!
//! Uniform manifold approximation and projection into two dimensions.
//!
//! [`Umap::init`] builds the exact kNN graph, turns it into a fuzzy simplicial set
//! and seeds a random layout. Each [`StepReducer::step`] of the resulting [`UmapRun`]
//! is one epoch of stochastic gradient descent over the graph edges with negative
//! sampling; epoch boundaries are the yield points.

mod curve;
mod graph;

pub use curve::find_ab_params;
pub use graph::{fuzzy_simplicial_set, smooth_knn_dist, FuzzyGraph};

use crate::distance::{nearest_neighbors, Euclidean};
use crate::error::{Error, Result};
use crate::params::UmapParams;
use crate::progress::{drive, CancellationToken, NoProgress, StepReducer, Stage};
use crate::types::{FeatureMatrix, Point2D};
use crate::utils::{all_finite, make_rng};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const INIT_RANGE: f64 = 10.0;
const GRADIENT_CLIP: f64 = 4.0;

/// UMAP configuration. Optimization constants default to the usual values.
#[derive(Debug, Clone)]
pub struct Umap {
    params: UmapParams,
    seed: Option<u64>,
    spread: f64,
    learning_rate: f64,
    negative_sample_rate: usize,
    repulsion_strength: f64,
}

impl Umap {
    pub fn new(params: UmapParams) -> Self {
        Self {
            params,
            seed: None,
            spread: 1.0,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn seed_opt(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn negative_sample_rate(mut self, rate: usize) -> Self {
        self.negative_sample_rate = rate;
        self
    }

    /// Initial SGD step size, decayed linearly to zero over the epochs.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn params(&self) -> &UmapParams {
        &self.params
    }

    /// Builds the graph and the initial layout. Needs at least two rows.
    ///
    /// When `n_neighbors >= n` the neighbourhood is reduced to `n - 1`.
    pub fn init(&self, matrix: &FeatureMatrix) -> Result<UmapRun> {
        self.params.validate()?;
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::out_of_range(
                "learning_rate",
                self.learning_rate,
                "must be finite and positive",
            ));
        }
        let x = matrix.view();
        let n = x.nrows();
        if n < 2 {
            return Err(Error::InvalidInput(format!(
                "UMAP needs at least two rows, got {n}"
            )));
        }
        if !all_finite(x) {
            return Err(Error::InvalidInput(
                "feature matrix contains NaN or infinite values".to_string(),
            ));
        }

        let mut k = self.params.n_neighbors;
        if k >= n {
            warn!("n_neighbors {} too large for {} rows, using {}", k, n, n - 1);
            k = n - 1;
        }

        let knn = nearest_neighbors(x, k, &Euclidean);
        let fuzzy = fuzzy_simplicial_set(&knn)?;
        let (a, b) = find_ab_params(self.spread, self.params.min_dist);

        let n_epochs = self.params.n_epochs;
        let max_weight = fuzzy.graph.values().iter().fold(0.0f64, |m, &w| m.max(w));
        let cutoff = max_weight / n_epochs as f64;
        let mut edges = Vec::with_capacity(fuzzy.graph.nnz());
        for (head, tail, &w) in fuzzy.graph.triplet_iter() {
            if w >= cutoff && w > 0.0 {
                let every = max_weight / w;
                let negative_every = every / self.negative_sample_rate.max(1) as f64;
                edges.push(Edge {
                    head,
                    tail,
                    every,
                    next: every,
                    negative_every,
                    next_negative: negative_every,
                });
            }
        }

        let mut rng = make_rng(self.seed);
        let embedding =
            Array2::from_shape_fn((n, 2), |_| rng.random_range(-INIT_RANGE..INIT_RANGE));

        info!(
            "UMAP initialised: {} rows, {} neighbours, {} edges, a={:.4} b={:.4}, {} epochs",
            n,
            k,
            edges.len(),
            a,
            b,
            n_epochs
        );

        Ok(UmapRun {
            embedding,
            edges,
            n_neighbors: k,
            a,
            b,
            learning_rate: self.learning_rate,
            gamma: self.repulsion_strength,
            negative_sampling: self.negative_sample_rate > 0,
            n_epochs,
            epoch: 0,
            rng,
        })
    }

    /// Runs every epoch without progress reporting or cancellation.
    pub fn fit(&self, matrix: &FeatureMatrix) -> Result<Vec<Point2D>> {
        match matrix.nrows() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![Point2D::default()]),
            _ => drive(self.init(matrix)?, &CancellationToken::new(), &mut NoProgress),
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    head: usize,
    tail: usize,
    /// Epochs between two samples of this edge.
    every: f64,
    next: f64,
    negative_every: f64,
    next_negative: f64,
}

/// An initialised UMAP optimization.
pub struct UmapRun {
    embedding: Array2<f64>,
    edges: Vec<Edge>,
    n_neighbors: usize,
    a: f64,
    b: f64,
    learning_rate: f64,
    gamma: f64,
    negative_sampling: bool,
    n_epochs: usize,
    epoch: usize,
    rng: ChaCha8Rng,
}

impl UmapRun {
    /// Neighbourhood size actually used to build the graph.
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn curve_params(&self) -> (f64, f64) {
        (self.a, self.b)
    }

    pub fn embedding(&self) -> ArrayView2<'_, f64> {
        self.embedding.view()
    }

    fn attract(&mut self, j: usize, k: usize, alpha: f64) {
        let (a, b) = (self.a, self.b);
        let y = &mut self.embedding;
        let d0 = y[[j, 0]] - y[[k, 0]];
        let d1 = y[[j, 1]] - y[[k, 1]];
        let dist_sq = d0 * d0 + d1 * d1;
        if dist_sq <= 0.0 {
            return;
        }
        let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0);
        for (dim, diff) in [(0, d0), (1, d1)] {
            let grad = clip(coeff * diff) * alpha;
            y[[j, dim]] += grad;
            y[[k, dim]] -= grad;
        }
    }

    fn repel(&mut self, j: usize, k: usize, alpha: f64) {
        let (a, b, gamma) = (self.a, self.b, self.gamma);
        let y = &mut self.embedding;
        let d0 = y[[j, 0]] - y[[k, 0]];
        let d1 = y[[j, 1]] - y[[k, 1]];
        let dist_sq = d0 * d0 + d1 * d1;
        let coeff = if dist_sq > 0.0 {
            2.0 * gamma * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
        } else {
            0.0
        };
        for (dim, diff) in [(0, d0), (1, d1)] {
            let grad = if coeff > 0.0 {
                clip(coeff * diff)
            } else {
                GRADIENT_CLIP
            };
            y[[j, dim]] += grad * alpha;
        }
    }
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

impl StepReducer for UmapRun {
    fn stage(&self) -> Stage {
        Stage::Umap
    }

    fn total(&self) -> usize {
        self.n_epochs
    }

    fn completed(&self) -> usize {
        self.epoch
    }

    fn step(&mut self) -> Result<()> {
        let n = self.embedding.nrows();
        let current = self.epoch as f64;
        let alpha = self.learning_rate * (1.0 - current / self.n_epochs as f64);

        for e in 0..self.edges.len() {
            if self.edges[e].next > current {
                continue;
            }
            let (j, k) = (self.edges[e].head, self.edges[e].tail);
            self.attract(j, k, alpha);
            self.edges[e].next += self.edges[e].every;

            if !self.negative_sampling {
                continue;
            }
            let edge = &self.edges[e];
            let n_negative = ((current - edge.next_negative) / edge.negative_every).floor();
            let n_negative = if n_negative > 0.0 { n_negative as usize } else { 0 };
            for _ in 0..n_negative {
                let other = self.rng.random_range(0..n);
                if other == j {
                    continue;
                }
                self.repel(j, other, alpha);
            }
            let edge = &mut self.edges[e];
            edge.next_negative += n_negative as f64 * edge.negative_every;
        }

        if !all_finite(self.embedding.view()) {
            return Err(Error::NumericInstability {
                stage: Stage::Umap,
                iteration: self.epoch,
            });
        }
        self.epoch += 1;
        if self.epoch == self.n_epochs {
            debug!("UMAP finished {} epochs", self.n_epochs);
        }
        Ok(())
    }

    fn into_embedding(self) -> Result<Vec<Point2D>> {
        if self.epoch < self.n_epochs {
            return Err(Error::InvalidInput(format!(
                "UMAP stopped at epoch {} of {}",
                self.epoch, self.n_epochs
            )));
        }
        Ok(self
            .embedding
            .rows()
            .into_iter()
            .map(|r| Point2D::new(r[0], r[1]))
            .collect())
    }
}
