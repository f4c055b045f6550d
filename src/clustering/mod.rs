//! Partitioning of embedded points.

mod kmeans;

pub use kmeans::{ClusterResult, KMeans, DEFAULT_MAX_ITER};
