//! # Pipeline
//!
//! [`reduce`] dispatches a feature matrix to one reducer. [`Pipeline`] wraps it for a
//! whole run: rows are filtered to the valid items, parameters resolved, the
//! embedding scattered back onto the original item order and clustering or outlier
//! detection chained when the configuration asks for them. Every run builds its
//! results from scratch.

mod progress;

pub use progress::{PipelineProgress, PipelineStep, ProgressLayout};

use crate::clustering::{ClusterResult, KMeans};
use crate::dimred::pca;
use crate::dimred::tsne::Tsne;
use crate::dimred::umap::Umap;
use crate::error::{Error, Result};
use crate::outliers::{OutlierResult, ZScoreFilter};
use crate::params::{resolve, Method, ParamOverrides, ReductionParams};
use crate::progress::{drive, CancellationToken, ProgressEvent, ProgressSink, Stage};
use crate::types::{FeatureMatrix, FeatureRow, ItemResult, Point2D};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Reduces every row of `matrix` to a 2D point, in row order.
///
/// An empty matrix yields no points whatever the parameters. Otherwise `params`
/// must pass [`ReductionParams::check_bounds`] for the row count; this is checked
/// before any computation. A single row lands on the origin without running the
/// iterative reducers.
pub fn reduce<S>(
    matrix: &FeatureMatrix,
    params: &ReductionParams,
    seed: Option<u64>,
    cancel: &CancellationToken,
    sink: &mut S,
) -> Result<Vec<Point2D>>
where
    S: ProgressSink<ProgressEvent> + ?Sized,
{
    if matrix.is_empty() {
        return Ok(Vec::new());
    }
    params.check_bounds(matrix.nrows())?;
    let stage = match params {
        ReductionParams::Pca => Stage::Pca,
        ReductionParams::Tsne(_) => Stage::Tsne,
        ReductionParams::Umap(_) => Stage::Umap,
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            stage,
            completed: 0,
        });
    }

    match params {
        ReductionParams::Pca => pca::embed(matrix, sink),
        ReductionParams::Tsne(p) if matrix.nrows() == 1 => {
            sink.report(ProgressEvent::new(stage, p.iterations, p.iterations));
            Ok(vec![Point2D::default()])
        }
        ReductionParams::Umap(p) if matrix.nrows() == 1 => {
            sink.report(ProgressEvent::new(stage, p.n_epochs, p.n_epochs));
            Ok(vec![Point2D::default()])
        }
        ReductionParams::Tsne(p) => {
            let run = Tsne::new(*p).seed_opt(seed).init(matrix)?;
            drive(run, cancel, sink)
        }
        ReductionParams::Umap(p) => {
            let run = Umap::new(*p).seed_opt(seed).init(matrix)?;
            drive(run, cancel, sink)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub k: usize,
    /// Falls back to the pipeline seed when unset.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    pub threshold: f64,
}

/// Everything a pipeline run needs besides the items themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub method: Method,
    pub overrides: ParamOverrides,
    pub clustering: Option<ClusteringConfig>,
    pub outliers: Option<OutlierConfig>,
    pub seed: Option<u64>,
    pub layout: ProgressLayout,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(Method::Pca)
    }
}

impl PipelineConfig {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            overrides: ParamOverrides::default(),
            clustering: None,
            outliers: None,
            seed: None,
            layout: ProgressLayout::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_clustering(mut self, k: usize) -> Self {
        self.clustering = Some(ClusteringConfig { k, seed: None });
        self
    }

    pub fn with_outliers(mut self, threshold: f64) -> Self {
        self.outliers = Some(OutlierConfig { threshold });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_layout(mut self, layout: ProgressLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Result of one run. `items` is aligned with the input items.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub items: Vec<ItemResult>,
    pub params: ReductionParams,
    pub clusters: Option<ClusterResult>,
    pub outliers: Option<OutlierResult>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs reduction and the requested follow-up steps over `items`.
    ///
    /// Invalid items get no coordinates, cluster or outlier flag. Configuration
    /// errors are raised before any computation starts.
    pub fn run<S>(
        &self,
        items: &[FeatureRow],
        cancel: &CancellationToken,
        sink: &mut S,
    ) -> Result<PipelineOutput>
    where
        S: ProgressSink<PipelineProgress> + ?Sized,
    {
        let config = &self.config;
        let layout = config.layout;
        layout.validate()?;
        let kmeans = config
            .clustering
            .map(|c| self.kmeans(&c))
            .transpose()?;
        let filter = config
            .outliers
            .map(|o| ZScoreFilter::new(o.threshold))
            .transpose()?;

        let matrix = FeatureMatrix::from_rows(items)?;
        // nothing to reduce, so overrides sized against n are not checked
        let params = if matrix.is_empty() {
            resolve(config.method, 0, &ParamOverrides::default())?
        } else {
            resolve(config.method, matrix.nrows(), &config.overrides)?
        };
        info!(
            "pipeline: {} of {} items valid, {:?}",
            matrix.nrows(),
            items.len(),
            params
        );

        let points = {
            let mut forward = |event: ProgressEvent| {
                sink.report(PipelineProgress {
                    percent: layout.reduction_percent(&event),
                    step: PipelineStep::Reducing(event),
                })
            };
            reduce(&matrix, &params, config.seed, cancel, &mut forward)?
        };
        if points.len() != matrix.nrows() {
            return Err(Error::InvalidInput(format!(
                "reducer returned {} points for {} rows",
                points.len(),
                matrix.nrows()
            )));
        }

        let mut results: Vec<ItemResult> =
            items.iter().map(|i| ItemResult::empty(i.value)).collect();
        for (&item, point) in matrix.source_index().iter().zip(&points) {
            results[item].coordinates = Some(*point);
        }

        let clusters = match kmeans {
            Some(kmeans) => {
                sink.report(PipelineProgress {
                    percent: layout.clustering,
                    step: PipelineStep::Clustering,
                });
                let clusters = kmeans.fit_points(&points)?;
                for (&item, &label) in matrix.source_index().iter().zip(&clusters.labels) {
                    results[item].cluster = Some(label);
                }
                Some(clusters)
            }
            None => None,
        };

        let outliers = match filter {
            Some(filter) => {
                sink.report(PipelineProgress {
                    percent: layout.outliers,
                    step: PipelineStep::DetectingOutliers,
                });
                let outliers = filter.detect(&points);
                for (&item, &flag) in matrix.source_index().iter().zip(&outliers.flags) {
                    results[item].is_outlier = Some(flag);
                }
                Some(outliers)
            }
            None => None,
        };

        sink.report(PipelineProgress {
            percent: 100.0,
            step: PipelineStep::Done,
        });
        debug!("pipeline finished for {} items", items.len());

        Ok(PipelineOutput {
            items: results,
            params,
            clusters,
            outliers,
        })
    }

    /// Clusters the items that already have coordinates, replacing any previous labels.
    ///
    /// Items without coordinates are left untouched.
    pub fn recluster(
        items: &mut [ItemResult],
        clustering: &ClusteringConfig,
    ) -> Result<ClusterResult> {
        if clustering.k == 0 {
            return Err(Error::out_of_range("k", 0.0, "must be positive"));
        }
        let (indices, points): (Vec<usize>, Vec<Point2D>) = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.coordinates.map(|p| (i, p)))
            .unzip();
        let clusters = KMeans::new(clustering.k)
            .with_seed_opt(clustering.seed)
            .fit_points(&points)?;
        for (&i, &label) in indices.iter().zip(&clusters.labels) {
            items[i].cluster = Some(label);
        }
        Ok(clusters)
    }

    fn kmeans(&self, clustering: &ClusteringConfig) -> Result<KMeans> {
        if clustering.k == 0 {
            return Err(Error::out_of_range("k", 0.0, "must be positive"));
        }
        Ok(KMeans::new(clustering.k).with_seed_opt(clustering.seed.or(self.config.seed)))
    }
}
