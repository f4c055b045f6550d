//! # t-SNE
//!
//! Exact t-distributed stochastic neighbour embedding into two dimensions.
//!
//! A [`Tsne`] configuration is turned into a [`TsneRun`] by [`Tsne::init`], which
//! calibrates the input affinities and seeds the embedding. The run then advances in
//! batches of [`BATCH_SIZE`] gradient iterations through [`StepReducer::step`]; each
//! batch boundary is a yield point. Termination is purely iteration-count based.
//!
//! States: `Uninitialized` (a bare [`Tsne`]) → `Initialized` → `Running` → `Done`.

use crate::distance::{pairwise, SquaredEuclidean};
use crate::error::{Error, Result};
use crate::params::TsneParams;
use crate::progress::{drive, CancellationToken, NoProgress, StepReducer, Stage};
use crate::types::{FeatureMatrix, Point2D};
use crate::utils::{all_finite, make_rng};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

/// Gradient iterations per step.
pub const BATCH_SIZE: usize = 10;

const EARLY_EXAGGERATION: f64 = 4.0;
const EXAGGERATION_ITERS: usize = 100;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const INIT_STD: f64 = 1e-4;
const P_FLOOR: f64 = 1e-12;
const PERPLEXITY_TOL: f64 = 1e-5;
const PERPLEXITY_MAX_ITER: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsneState {
    Initialized,
    Running,
    Done,
}

/// t-SNE configuration.
#[derive(Debug, Clone)]
pub struct Tsne {
    params: TsneParams,
    seed: Option<u64>,
}

impl Tsne {
    pub fn new(params: TsneParams) -> Self {
        Self { params, seed: None }
    }

    /// Fixes the seed of the initial embedding.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn seed_opt(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn params(&self) -> &TsneParams {
        &self.params
    }

    /// Computes input affinities and the initial embedding. Needs at least two rows.
    pub fn init(&self, matrix: &FeatureMatrix) -> Result<TsneRun> {
        self.params.validate()?;
        let x = matrix.view();
        let n = x.nrows();
        if n < 2 {
            return Err(Error::InvalidInput(format!(
                "t-SNE needs at least two rows, got {n}"
            )));
        }
        if !all_finite(x) {
            return Err(Error::InvalidInput(
                "feature matrix contains NaN or infinite values".to_string(),
            ));
        }

        let max_perplexity = (n - 1) as f64;
        let perplexity = self.params.perplexity.clamp(1.0, max_perplexity);
        if perplexity != self.params.perplexity {
            warn!(
                "perplexity {} is unusable for {} rows, using {}",
                self.params.perplexity, n, perplexity
            );
        }

        let distances = pairwise(x, &SquaredEuclidean);
        let p = joint_probabilities(distances.view(), perplexity);

        let mut rng = make_rng(self.seed);
        let normal = Normal::new(0.0, INIT_STD).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let y = Array2::from_shape_fn((n, 2), |_| normal.sample(&mut rng));

        let exaggeration_iters = EXAGGERATION_ITERS.min(self.params.iterations / 4);
        info!(
            "t-SNE initialised: {} rows, {} features, perplexity {}, {} iterations",
            n,
            x.ncols(),
            perplexity,
            self.params.iterations
        );

        Ok(TsneRun {
            p,
            y,
            num: Array2::zeros((n, n)),
            gains: Array2::ones((n, 2)),
            update: Array2::zeros((n, 2)),
            learning_rate: self.params.learning_rate,
            total: self.params.iterations,
            exaggeration_iters,
            iteration: 0,
            state: TsneState::Initialized,
        })
    }

    /// Runs to completion without progress reporting or cancellation.
    pub fn fit(&self, matrix: &FeatureMatrix) -> Result<Vec<Point2D>> {
        match matrix.nrows() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![Point2D::default()]),
            _ => drive(self.init(matrix)?, &CancellationToken::new(), &mut NoProgress),
        }
    }
}

/// An initialised t-SNE optimization.
pub struct TsneRun {
    p: Array2<f64>,
    y: Array2<f64>,
    /// Student-t kernel numerators, reused across iterations.
    num: Array2<f64>,
    gains: Array2<f64>,
    update: Array2<f64>,
    learning_rate: f64,
    total: usize,
    exaggeration_iters: usize,
    iteration: usize,
    state: TsneState,
}

impl TsneRun {
    pub fn state(&self) -> TsneState {
        self.state
    }

    /// Current, unscaled embedding.
    pub fn embedding(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    fn iterate(&mut self) -> Result<()> {
        let n = self.y.nrows();
        let exaggerating = self.iteration < self.exaggeration_iters;
        let exaggeration = if exaggerating { EARLY_EXAGGERATION } else { 1.0 };
        let momentum = if exaggerating {
            INITIAL_MOMENTUM
        } else {
            FINAL_MOMENTUM
        };

        // 1 / (1 + |yi - yj|²), diagonal stays zero
        let y = &self.y;
        self.num
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                let (yi0, yi1) = (y[[i, 0]], y[[i, 1]]);
                for j in 0..n {
                    if i != j {
                        let d0 = yi0 - y[[j, 0]];
                        let d1 = yi1 - y[[j, 1]];
                        row[j] = 1.0 / (1.0 + d0 * d0 + d1 * d1);
                    }
                }
            });
        let num = &self.num;
        let z: f64 = num.sum();

        let p = &self.p;
        let mut grad = Array2::<f64>::zeros((n, 2));
        grad.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut g)| {
                let (mut g0, mut g1) = (0.0, 0.0);
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let q = num[[i, j]];
                    let mult = (exaggeration * p[[i, j]] - q / z) * q;
                    g0 += mult * (y[[i, 0]] - y[[j, 0]]);
                    g1 += mult * (y[[i, 1]] - y[[j, 1]]);
                }
                g[0] = 4.0 * g0;
                g[1] = 4.0 * g1;
            });

        if !all_finite(grad.view()) {
            return Err(Error::NumericInstability {
                stage: Stage::Tsne,
                iteration: self.iteration,
            });
        }

        let lr = self.learning_rate;
        Zip::from(&mut self.gains)
            .and(&mut self.update)
            .and(&grad)
            .for_each(|gain, upd, &g| {
                *gain = if (g > 0.0) != (*upd > 0.0) {
                    *gain + 0.2
                } else {
                    *gain * 0.8
                };
                if *gain < MIN_GAIN {
                    *gain = MIN_GAIN;
                }
                *upd = momentum * *upd - lr * *gain * g;
            });
        self.y += &self.update;

        if let Some(mean) = self.y.mean_axis(Axis(0)) {
            self.y -= &mean;
        }
        if !all_finite(self.y.view()) {
            return Err(Error::NumericInstability {
                stage: Stage::Tsne,
                iteration: self.iteration,
            });
        }

        self.iteration += 1;
        Ok(())
    }
}

impl StepReducer for TsneRun {
    fn stage(&self) -> Stage {
        Stage::Tsne
    }

    fn total(&self) -> usize {
        self.total
    }

    fn completed(&self) -> usize {
        self.iteration
    }

    fn step(&mut self) -> Result<()> {
        self.state = TsneState::Running;
        let batch = BATCH_SIZE.min(self.total - self.iteration);
        for _ in 0..batch {
            self.iterate()?;
        }
        if self.iteration >= self.total {
            self.state = TsneState::Done;
            debug!("t-SNE reached {} iterations", self.iteration);
        }
        Ok(())
    }

    fn into_embedding(self) -> Result<Vec<Point2D>> {
        if self.state != TsneState::Done {
            return Err(Error::InvalidInput(format!(
                "t-SNE stopped at iteration {} of {}",
                self.iteration, self.total
            )));
        }
        let scaled = rescale(self.y);
        Ok(scaled
            .rows()
            .into_iter()
            .map(|r| Point2D::new(r[0], r[1]))
            .collect())
    }
}

/// Symmetric joint probabilities from squared distances.
///
/// Each row's Gaussian precision is found by bisection so that the conditional
/// distribution has the requested perplexity.
fn joint_probabilities(distances: ArrayView2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let target = perplexity.ln();

    let mut conditional = Array2::<f64>::zeros((n, n));
    conditional
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out)| {
            let row = distances.row(i);
            let others: Vec<usize> = (0..n).filter(|&j| j != i).collect();
            let d_min = others
                .iter()
                .map(|&j| row[j])
                .fold(f64::INFINITY, f64::min);

            let mut beta = 1.0;
            let mut beta_min = f64::NEG_INFINITY;
            let mut beta_max = f64::INFINITY;
            let mut probs = Array1::<f64>::zeros(others.len());

            for _ in 0..PERPLEXITY_MAX_ITER {
                // shifting by the nearest distance keeps the largest term at exp(0)
                let mut sum = 0.0;
                let mut weighted = 0.0;
                for (k, &j) in others.iter().enumerate() {
                    let shifted = row[j] - d_min;
                    let v = (-beta * shifted).exp();
                    probs[k] = v;
                    sum += v;
                    weighted += v * shifted;
                }
                let entropy = sum.ln() + beta * weighted / sum;
                probs /= sum;

                let diff = entropy - target;
                if diff.abs() < PERPLEXITY_TOL {
                    break;
                }
                if diff > 0.0 {
                    beta_min = beta;
                    beta = if beta_max.is_infinite() {
                        beta * 2.0
                    } else {
                        (beta + beta_max) / 2.0
                    };
                } else {
                    beta_max = beta;
                    beta = if beta_min.is_infinite() {
                        beta / 2.0
                    } else {
                        (beta + beta_min) / 2.0
                    };
                }
            }

            for (k, &j) in others.iter().enumerate() {
                out[j] = probs[k];
            }
        });

    let scale = 2.0 * n as f64;
    let mut joint = &conditional + &conditional.t();
    joint.mapv_inplace(|v| (v / scale).max(P_FLOOR));
    for i in 0..n {
        joint[[i, i]] = 0.0;
    }
    joint
}

/// Centres the embedding and divides by its largest absolute coordinate, giving [-1, 1].
fn rescale(mut y: Array2<f64>) -> Array2<f64> {
    if let Some(mean) = y.mean_axis(Axis(0)) {
        y -= &mean;
    }
    let max_abs = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if max_abs > 0.0 {
        y /= max_abs;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::Rng;

    fn params(perplexity: f64, iterations: usize) -> TsneParams {
        TsneParams {
            perplexity,
            iterations,
            learning_rate: 200.0,
        }
    }

    fn two_blobs(per_blob: usize, seed: u64) -> FeatureMatrix {
        let mut rng = make_rng(Some(seed));
        let dims = 6;
        let data = Array2::from_shape_fn((2 * per_blob, dims), |(i, _)| {
            let centre = if i < per_blob { 0.0 } else { 10.0 };
            centre + rng.random_range(-0.5..0.5)
        });
        FeatureMatrix::new(data)
    }

    #[test]
    fn test_joint_probabilities_properties() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [4.0, 4.0], [5.0, 4.0]];
        let d = pairwise(x.view(), &SquaredEuclidean);
        let p = joint_probabilities(d.view(), 2.0);

        assert_abs_diff_eq!(p.sum(), 1.0, epsilon = 1e-6);
        for i in 0..5 {
            assert_eq!(p[[i, i]], 0.0);
            for j in 0..5 {
                assert_abs_diff_eq!(p[[i, j]], p[[j, i]], epsilon = 1e-15);
            }
        }
        // near neighbours get more mass than the far cluster
        assert!(p[[0, 1]] > p[[0, 3]]);
    }

    #[test]
    fn test_output_aligned_bounded_and_finite() {
        let m = two_blobs(10, 3);
        let out = Tsne::new(params(5.0, 120)).seed(11).fit(&m).unwrap();
        assert_eq!(out.len(), 20);
        for p in &out {
            assert!(p.is_finite());
            assert!(p.x.abs() <= 1.0 + 1e-12 && p.y.abs() <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn test_separates_clusters() {
        let m = two_blobs(12, 5);
        let out = Tsne::new(params(5.0, 1000)).seed(42).fit(&m).unwrap();

        let dist =
            |a: &Point2D, b: &Point2D| ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        let (mut intra, mut inter) = (0.0, 0.0);
        let (mut n_intra, mut n_inter) = (0, 0);
        for i in 0..24 {
            for j in (i + 1)..24 {
                if (i < 12) == (j < 12) {
                    intra += dist(&out[i], &out[j]);
                    n_intra += 1;
                } else {
                    inter += dist(&out[i], &out[j]);
                    n_inter += 1;
                }
            }
        }
        assert!(intra / n_intra as f64 * 2.0 < inter / n_inter as f64);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let m = two_blobs(8, 9);
        let a = Tsne::new(params(5.0, 50)).seed(1).fit(&m).unwrap();
        let b = Tsne::new(params(5.0, 50)).seed(1).fit(&m).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_matrix_and_tiny_inputs() {
        let zeros = FeatureMatrix::new(Array2::zeros((6, 4)));
        let out = Tsne::new(TsneParams::adaptive(6)).seed(2).fit(&zeros).unwrap();
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(Point2D::is_finite));

        let two = FeatureMatrix::new(Array2::zeros((2, 3)));
        let out = Tsne::new(params(0.0, 20)).seed(2).fit(&two).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(Point2D::is_finite));

        let one = FeatureMatrix::new(array![[1.0, 1.0]]);
        assert_eq!(
            Tsne::new(params(5.0, 20)).fit(&one).unwrap(),
            vec![Point2D::default()]
        );
        let empty = FeatureMatrix::new(Array2::zeros((0, 3)));
        assert!(Tsne::new(params(5.0, 20)).fit(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_batches_and_states() {
        let m = two_blobs(5, 1);
        let mut run = Tsne::new(params(3.0, 25)).seed(4).init(&m).unwrap();
        assert_eq!(run.state(), TsneState::Initialized);

        let mut seen = Vec::new();
        while !run.is_done() {
            run.step().unwrap();
            seen.push(run.completed());
            if !run.is_done() {
                assert_eq!(run.state(), TsneState::Running);
            }
        }
        assert_eq!(seen, vec![10, 20, 25]);
        assert_eq!(run.state(), TsneState::Done);
        assert_eq!(run.into_embedding().unwrap().len(), 10);
    }

    #[test]
    fn test_progress_monotonic_to_total() {
        let m = two_blobs(5, 2);
        let run = Tsne::new(params(3.0, 45)).seed(8).init(&m).unwrap();
        let mut events = Vec::new();
        drive(run, &CancellationToken::new(), &mut |e: ProgressEvent| events.push(e)).unwrap();

        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].current <= w[1].current));
        let last = events.last().unwrap();
        assert_eq!((last.stage, last.current, last.total), (Stage::Tsne, 45, 45));
    }

    #[test]
    fn test_cancel_after_first_batch() {
        let m = two_blobs(5, 2);
        let run = Tsne::new(params(3.0, 100)).seed(8).init(&m).unwrap();
        let token = CancellationToken::new();
        let handle = token.clone();
        let err = drive(run, &token, &mut |_: ProgressEvent| handle.cancel()).unwrap_err();
        assert_eq!(
            err,
            Error::Cancelled {
                stage: Stage::Tsne,
                completed: 10
            }
        );
    }

    #[test]
    fn test_divergence_is_fatal() {
        let m = two_blobs(5, 6);
        let p = TsneParams {
            perplexity: 3.0,
            iterations: 50,
            learning_rate: f64::MAX,
        };
        let err = Tsne::new(p).seed(3).fit(&m).unwrap_err();
        assert!(matches!(
            err,
            Error::NumericInstability {
                stage: Stage::Tsne,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_bad_params_and_nan_input() {
        let m = two_blobs(5, 2);
        assert!(matches!(
            Tsne::new(params(5.0, 0)).init(&m),
            Err(Error::ParameterOutOfRange { .. })
        ));
        let nan = FeatureMatrix::new(array![[0.0, f64::NAN], [1.0, 1.0], [2.0, 2.0]]);
        assert!(matches!(
            Tsne::new(params(1.0, 10)).init(&nan),
            Err(Error::InvalidInput(_))
        ));
    }
}
