//! # Principal Component Analysis
//!
//! Deterministic projection of mean-centred rows onto the two directions of largest
//! variance. The factorization is an eigendecomposition of either the `d x d`
//! covariance matrix or, when there are fewer rows than features, the `n x n` Gram
//! matrix of the centred data. Both give the same components.

use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crate::types::{FeatureMatrix, Point2D};
use log::debug;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::cmp::Ordering;

const EIGEN_EPS: f64 = 1e-12;
const EIGEN_MAX_ITER: usize = 10_000;

/// Which symmetric matrix gets decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EigenSolver {
    /// Gram matrix when `n < d`, covariance matrix otherwise.
    #[default]
    Auto,
    Covariance,
    Gram,
}

pub struct PcaBuilder {
    n_components: usize,
    solver: EigenSolver,
}

impl Default for PcaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PcaBuilder {
    pub fn new() -> Self {
        PcaBuilder {
            n_components: 2,
            solver: EigenSolver::Auto,
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn solver(mut self, solver: EigenSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn build(self) -> Pca {
        Pca {
            n_components: self.n_components,
            solver: self.solver,
            components: None,
            mean: None,
            eigenvalues: None,
            explained_variance_ratio: None,
        }
    }
}

pub struct Pca {
    n_components: usize,
    solver: EigenSolver,
    components: Option<Array2<f64>>,
    mean: Option<Array1<f64>>,
    eigenvalues: Option<Array1<f64>>,
    explained_variance_ratio: Option<Array1<f64>>,
}

impl Pca {
    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(Error::InvalidInput(format!(
                "cannot fit PCA on a {n_samples}x{n_features} matrix"
            )));
        }
        let n_components = self.n_components.min(n_features);

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::InvalidInput("failed to compute column means".to_string()))?;
        let centered = &x - &mean;

        let use_gram = match self.solver {
            EigenSolver::Auto => n_samples < n_features,
            EigenSolver::Covariance => false,
            EigenSolver::Gram => true,
        };
        let denom = (n_samples.max(2) - 1) as f64;

        let mut components = Array2::<f64>::zeros((n_components, n_features));
        let eigenvalues = if use_gram {
            let gram = centered.dot(&centered.t());
            let (values, vectors) = sorted_eigen(&gram)?;
            for (k, &col) in values.order.iter().take(n_components).enumerate() {
                // v = Xᵀu, normalized
                let u = Array1::from_iter((0..n_samples).map(|i| vectors[(i, col)]));
                let v = centered.t().dot(&u);
                let norm = v.dot(&v).sqrt();
                if norm > EIGEN_EPS {
                    components.row_mut(k).assign(&(v / norm));
                }
            }
            values.sorted().mapv(|l| l.max(0.0) / denom)
        } else {
            let cov = centered.t().dot(&centered) / denom;
            let (values, vectors) = sorted_eigen(&cov)?;
            for (k, &col) in values.order.iter().take(n_components).enumerate() {
                for j in 0..n_features {
                    components[[k, j]] = vectors[(j, col)];
                }
            }
            values.sorted().mapv(|l| l.max(0.0))
        };

        // Fix each component's sign so its largest-magnitude score is positive.
        let scores = centered.dot(&components.t());
        for k in 0..n_components {
            let column = scores.column(k);
            let pivot = column
                .iter()
                .copied()
                .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                components.row_mut(k).mapv_inplace(|v| -v);
            }
        }

        let total_variance: f64 = eigenvalues.sum();
        let ratio: Array1<f64> = (0..n_components)
            .map(|k| match eigenvalues.get(k) {
                Some(&l) if total_variance > EIGEN_EPS => l / total_variance,
                _ => 0.0,
            })
            .collect();
        debug!(
            "PCA fitted on {}x{} ({}), explained variance {:?}",
            n_samples,
            n_features,
            if use_gram { "gram" } else { "covariance" },
            ratio.to_vec()
        );

        self.components = Some(components);
        self.mean = Some(mean);
        self.eigenvalues = Some(eigenvalues);
        self.explained_variance_ratio = Some(ratio);
        Ok(())
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        match (&self.components, &self.mean) {
            (Some(components), Some(mean)) => {
                if x.ncols() != mean.len() {
                    return Err(Error::InvalidInput(format!(
                        "expected {} features, got {}",
                        mean.len(),
                        x.ncols()
                    )));
                }
                let centered = &x - mean;
                Ok(centered.dot(&components.t()))
            }
            _ => Err(Error::InvalidInput("PCA has not been fitted yet".to_string())),
        }
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    /// All eigenvalues of the covariance matrix, largest first.
    pub fn eigenvalues(&self) -> Option<&Array1<f64>> {
        self.eigenvalues.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }
}

struct SortedValues {
    values: Vec<f64>,
    order: Vec<usize>,
}

impl SortedValues {
    fn sorted(&self) -> Array1<f64> {
        self.order.iter().map(|&i| self.values[i]).collect()
    }
}

/// Eigendecomposition of a symmetric matrix with eigenvalues ordered largest first,
/// equal eigenvalues by index.
fn sorted_eigen(m: &Array2<f64>) -> Result<(SortedValues, DMatrix<f64>)> {
    let (r, c) = m.dim();
    let matrix = DMatrix::from_fn(r, c, |i, j| m[[i, j]]);
    let eigen = SymmetricEigen::try_new(matrix, f64::EPSILON, EIGEN_MAX_ITER).ok_or_else(|| {
        Error::Linalg(format!(
            "eigendecomposition of {r}x{c} matrix did not converge"
        ))
    })?;

    let values: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    Ok((SortedValues { values, order }, eigen.eigenvectors))
}

/// Projects `matrix` onto its top two principal components.
///
/// Emits `{pca, 0, 1}` before and `{pca, 1, 1}` after the factorization. An empty
/// matrix yields no points and no events.
pub fn embed<S>(matrix: &FeatureMatrix, sink: &mut S) -> Result<Vec<Point2D>>
where
    S: ProgressSink<ProgressEvent> + ?Sized,
{
    if matrix.is_empty() {
        return Ok(Vec::new());
    }
    sink.report(ProgressEvent::new(Stage::Pca, 0, 1));
    let mut pca = PcaBuilder::new().n_components(2).build();
    let projected = pca.fit_transform(matrix.view())?;
    let points = projected
        .rows()
        .into_iter()
        .map(|row| Point2D::new(row[0], row.get(1).copied().unwrap_or(0.0)))
        .collect();
    sink.report(ProgressEvent::new(Stage::Pca, 1, 1));
    Ok(points)
}
