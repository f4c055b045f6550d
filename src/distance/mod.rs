use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use num_traits::Float;
use rayon::prelude::*;
use std::cmp::Ordering;

pub trait DistanceMetric: Send + Sync {
    fn distance<T>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T
    where
        T: Float;
}

pub struct SquaredEuclidean;

impl DistanceMetric for SquaredEuclidean {
    fn distance<T>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T
    where
        T: Float,
    {
        let mut sum = T::zero();
        for (&x, &y) in a.iter().zip(b.iter()) {
            let diff = x - y;
            sum = sum + diff * diff;
        }
        sum
    }
}

pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance<T>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T
    where
        T: Float,
    {
        SquaredEuclidean.distance(a, b).sqrt()
    }
}

/// Full `n x n` distance matrix between the rows of `data`, rows computed in parallel.
pub fn pairwise<M: DistanceMetric>(data: ArrayView2<f64>, metric: &M) -> Array2<f64> {
    let n = data.nrows();
    let mut out = Array2::<f64>::zeros((n, n));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let a = data.row(i);
            for j in 0..n {
                if i != j {
                    row[j] = metric.distance(a, data.row(j));
                }
            }
        });
    out
}

/// Exact k-nearest neighbours of every row, excluding the row itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNeighbors {
    /// `indices[[i, r]]` is the r-th closest row to row `i`.
    pub indices: Array2<usize>,
    pub distances: Array2<f64>,
}

impl NearestNeighbors {
    pub fn k(&self) -> usize {
        self.indices.ncols()
    }
}

/// Brute-force search. Equal distances are ordered by lower row index.
///
/// `k` must be below the number of rows.
pub fn nearest_neighbors<M: DistanceMetric>(
    data: ArrayView2<f64>,
    k: usize,
    metric: &M,
) -> NearestNeighbors {
    let n = data.nrows();
    debug_assert!(k < n.max(1));

    let rows: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = data.row(i);
            let mut candidates: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, metric.distance(a, data.row(j))))
                .collect();
            candidates.sort_by(|x, y| {
                x.1.partial_cmp(&y.1)
                    .unwrap_or(Ordering::Equal)
                    .then(x.0.cmp(&y.0))
            });
            candidates.truncate(k);
            candidates
        })
        .collect();

    let mut indices = Array2::<usize>::zeros((n, k));
    let mut distances = Array2::<f64>::zeros((n, k));
    for (i, row) in rows.into_iter().enumerate() {
        for (r, (j, d)) in row.into_iter().enumerate() {
            indices[[i, r]] = j;
            distances[[i, r]] = d;
        }
    }
    NearestNeighbors { indices, distances }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_metrics() {
        let a = array![0.0, 3.0];
        let b = array![4.0, 0.0];
        assert_abs_diff_eq!(SquaredEuclidean.distance(a.view(), b.view()), 25.0);
        assert_abs_diff_eq!(Euclidean.distance(a.view(), b.view()), 5.0);
        assert_abs_diff_eq!(Euclidean.distance(a.view(), a.view()), 0.0);
    }

    #[test]
    fn test_pairwise_symmetric_zero_diagonal() {
        let data = array![[0.0, 0.0], [1.0, 0.0], [0.0, 2.0]];
        let d = pairwise(data.view(), &SquaredEuclidean);
        for i in 0..3 {
            assert_eq!(d[[i, i]], 0.0);
            for j in 0..3 {
                assert_abs_diff_eq!(d[[i, j]], d[[j, i]]);
            }
        }
        assert_abs_diff_eq!(d[[1, 2]], 5.0);
    }

    #[test]
    fn test_nearest_neighbors_order_and_ties() {
        let data = array![[0.0], [1.0], [-1.0], [5.0]];
        let knn = nearest_neighbors(data.view(), 2, &Euclidean);

        assert_eq!(knn.k(), 2);
        // rows 1 and 2 are equally close to row 0; lower index first
        assert_eq!(knn.indices.row(0).to_vec(), vec![1, 2]);
        assert_eq!(knn.indices.row(3).to_vec(), vec![1, 0]);
        assert_abs_diff_eq!(knn.distances[[3, 0]], 4.0);
    }
}
