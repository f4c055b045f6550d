use crate::distance::NearestNeighbors;
use crate::error::{Error, Result};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array1, ArrayView2};

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const SMOOTH_K_MAX_ITER: usize = 64;
const MIN_K_DIST_SCALE: f64 = 1e-3;

/// Fuzzy simplicial set over the kNN graph.
///
/// `graph[i, j]` is the symmetric membership strength of the edge `i - j`.
#[derive(Debug, Clone)]
pub struct FuzzyGraph {
    pub graph: CsrMatrix<f64>,
    /// Bandwidth of each point's local exponential kernel.
    pub sigmas: Array1<f64>,
    /// Distance to each point's nearest non-identical neighbour.
    pub rhos: Array1<f64>,
}

/// Per-point `(sigma, rho)` such that the membership strengths of the k neighbours
/// sum to `log2(k)`. Local connectivity is fixed at one neighbour.
pub fn smooth_knn_dist(distances: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let (n, k) = distances.dim();
    let target = (k as f64).log2();
    let mean_all = if n * k > 0 {
        distances.sum() / (n * k) as f64
    } else {
        0.0
    };

    let mut sigmas = Array1::<f64>::zeros(n);
    let mut rhos = Array1::<f64>::zeros(n);

    for i in 0..n {
        let row = distances.row(i);
        let rho = row.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

        let mut lo = 0.0;
        let mut hi = f64::INFINITY;
        let mut mid = 1.0;
        for _ in 0..SMOOTH_K_MAX_ITER {
            let psum: f64 = row
                .iter()
                .map(|&d| membership(d, rho, mid))
                .sum();
            if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                break;
            }
            if psum > target {
                hi = mid;
                mid = (lo + hi) / 2.0;
            } else {
                lo = mid;
                if hi == f64::INFINITY {
                    mid *= 2.0;
                } else {
                    mid = (lo + hi) / 2.0;
                }
            }
        }

        let floor = if rho > 0.0 {
            MIN_K_DIST_SCALE * row.mean().unwrap_or(0.0)
        } else {
            MIN_K_DIST_SCALE * mean_all
        };
        sigmas[i] = mid.max(floor);
        rhos[i] = rho;
    }
    (sigmas, rhos)
}

fn membership(d: f64, rho: f64, sigma: f64) -> f64 {
    let shifted = d - rho;
    if shifted <= 0.0 || sigma <= 0.0 {
        1.0
    } else {
        (-shifted / sigma).exp()
    }
}

/// Builds the symmetric fuzzy graph from exact nearest neighbours.
///
/// Directed memberships `w(i→j)` are combined with the fuzzy union
/// `a + b - a·b`.
pub fn fuzzy_simplicial_set(knn: &NearestNeighbors) -> Result<FuzzyGraph> {
    let (n, k) = knn.indices.dim();
    let (sigmas, rhos) = smooth_knn_dist(knn.distances.view());

    let mut rows = Vec::with_capacity(n * k);
    let mut cols = Vec::with_capacity(n * k);
    let mut vals = Vec::with_capacity(n * k);
    for i in 0..n {
        for r in 0..k {
            rows.push(i);
            cols.push(knn.indices[[i, r]]);
            vals.push(membership(knn.distances[[i, r]], rhos[i], sigmas[i]));
        }
    }
    let coo = CooMatrix::try_from_triplets(n, n, rows, cols, vals)
        .map_err(|e| Error::InvalidInput(format!("failed to build kNN graph: {e}")))?;
    let directed = CsrMatrix::from(&coo);
    let transposed = directed.transpose();

    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for i in 0..n {
        let a = directed.row(i);
        let b = transposed.row(i);
        let (ac, av) = (a.col_indices(), a.values());
        let (bc, bv) = (b.col_indices(), b.values());
        let (mut p, mut q) = (0, 0);
        // both rows have sorted column indices
        while p < ac.len() || q < bc.len() {
            let (col, x, y) = match (ac.get(p), bc.get(q)) {
                (Some(&ca), Some(&cb)) if ca == cb => {
                    p += 1;
                    q += 1;
                    (ca, av[p - 1], bv[q - 1])
                }
                (Some(&ca), Some(&cb)) if ca < cb => {
                    p += 1;
                    (ca, av[p - 1], 0.0)
                }
                (Some(_), Some(&cb)) => {
                    q += 1;
                    (cb, 0.0, bv[q - 1])
                }
                (Some(&ca), None) => {
                    p += 1;
                    (ca, av[p - 1], 0.0)
                }
                (None, Some(&cb)) => {
                    q += 1;
                    (cb, 0.0, bv[q - 1])
                }
                (None, None) => break,
            };
            let w = x + y - x * y;
            if w > 0.0 {
                rows.push(i);
                cols.push(col);
                vals.push(w);
            }
        }
    }
    let coo = CooMatrix::try_from_triplets(n, n, rows, cols, vals)
        .map_err(|e| Error::InvalidInput(format!("failed to symmetrize kNN graph: {e}")))?;

    Ok(FuzzyGraph {
        graph: CsrMatrix::from(&coo),
        sigmas,
        rhos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{nearest_neighbors, Euclidean};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_smooth_knn_hits_target() {
        let d = array![[1.0, 2.0, 3.0], [0.5, 0.6, 4.0]];
        let (sigmas, rhos) = smooth_knn_dist(d.view());
        assert_eq!(rhos.to_vec(), vec![1.0, 0.5]);
        for i in 0..2 {
            let psum: f64 = d
                .row(i)
                .iter()
                .map(|&x| membership(x, rhos[i], sigmas[i]))
                .sum();
            assert_abs_diff_eq!(psum, 3f64.log2(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_graph_is_symmetric_and_bounded() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0], [6.0, 5.0], [5.0, 6.0]];
        let knn = nearest_neighbors(x.view(), 2, &Euclidean);
        let fuzzy = fuzzy_simplicial_set(&knn).unwrap();
        let g = &fuzzy.graph;

        let dense: Vec<(usize, usize, f64)> =
            g.triplet_iter().map(|(i, j, &v)| (i, j, v)).collect();
        assert!(!dense.is_empty());
        for &(i, j, v) in &dense {
            assert!(v > 0.0 && v <= 1.0 + 1e-12);
            assert_ne!(i, j);
            let back = dense
                .iter()
                .find(|&&(a, b, _)| a == j && b == i)
                .map(|&(_, _, w)| w)
                .unwrap();
            assert_abs_diff_eq!(v, back, epsilon = 1e-12);
        }
        // every point keeps full membership to its nearest neighbour
        for i in 0..6 {
            let row = g.row(i);
            assert!(row.values().iter().any(|&v| (v - 1.0).abs() < 1e-12));
        }
    }

    #[test]
    fn test_coincident_points_are_finite() {
        let x = ndarray::Array2::<f64>::zeros((4, 3));
        let knn = nearest_neighbors(x.view(), 2, &Euclidean);
        let fuzzy = fuzzy_simplicial_set(&knn).unwrap();
        assert!(fuzzy.graph.values().iter().all(|v| v.is_finite() && *v > 0.0));
        assert!(fuzzy.sigmas.iter().all(|s| s.is_finite()));
    }
}
