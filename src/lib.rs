//! 2D projection of molecular fingerprint vectors.
//!
//! A [`FeatureMatrix`] of valid items is reduced to one [`Point2D`] per row with PCA,
//! t-SNE or UMAP. Results can then be clustered with k-means and screened for
//! z-score outliers. [`Pipeline`] ties the steps together and maps the output back
//! onto the original item list.

pub mod clustering;
pub mod dimred;
pub mod distance;
pub mod error;
pub mod outliers;
pub mod params;
pub mod pipeline;
pub mod progress;
pub mod types;
mod utils;

pub use clustering::{ClusterResult, KMeans};
pub use error::{Error, Result};
pub use outliers::{z_scores, OutlierResult, ZScoreFilter};
pub use params::{
    adaptive_params, resolve, AdaptiveParams, Method, ParamOverrides, ReductionParams,
    TsneOverrides, TsneParams, UmapOverrides, UmapParams,
};
pub use pipeline::{
    reduce, ClusteringConfig, OutlierConfig, Pipeline, PipelineConfig, PipelineOutput,
    PipelineProgress, PipelineStep, ProgressLayout,
};
pub use progress::{
    drive, CancellationToken, NoProgress, ProgressEvent, ProgressSink, Stage, StepReducer,
};
pub use types::{FeatureMatrix, FeatureRow, ItemResult, Point2D};
