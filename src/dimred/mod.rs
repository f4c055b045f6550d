//! # Dimensionality Reduction
//!
//! Projections of fingerprint matrices into two dimensions for visual exploration.
//!
//! - **PCA** ([`pca`]): deterministic linear projection, single pass.
//! - **t-SNE** ([`tsne`]): probability-based nonlinear embedding, stepped in batches.
//! - **UMAP** ([`umap`]): graph-based nonlinear embedding, stepped per epoch.
//!
//! Every reducer returns exactly one point per matrix row, in row order.
//!
//! ## Algorithm Selection Guide
//! - Use **PCA** for a fast overview and when axes should stay interpretable
//! - Use **t-SNE** for local neighbourhood structure and cluster separation
//! - Use **UMAP** for local structure with more of the global layout preserved

pub mod pca;
pub mod tsne;
pub mod umap;
