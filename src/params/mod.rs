//! # Reduction parameters
//!
//! Defaults are derived from the sample count by [`adaptive_params`]. Explicit user
//! overrides replace individual defaults and are validated against the documented
//! bounds; an override outside its bounds is rejected with
//! [`Error::ParameterOutOfRange`], never clamped. [`ReductionParams::check_bounds`]
//! applies the same bounds to parameters built by hand, and the pipeline's `reduce`
//! runs it before any computation. The adaptive default for a given `n` is always
//! accepted.
//!
//! | parameter       | default                                   | accepted override          |
//! |-----------------|-------------------------------------------|----------------------------|
//! | `perplexity`    | `min(clamp(⌊0.05·n⌋, 5, 50), ⌊n/3⌋)`      | `[5, 50]` and `< n/3`      |
//! | `iterations`    | 1000                                      | `> 0`                      |
//! | `learning_rate` | 200                                       | finite, `> 0`              |
//! | `n_neighbors`   | `clamp(⌊√n⌋, 2, 100)`                     | `[2, 100]`                 |
//! | `min_dist`      | 0.1                                       | finite, `≥ 0`              |
//! | `n_epochs`      | `clamp(n, 200, 500)`                      | `> 0`                      |
//!
//! The reducers degrade small-n cases internally (perplexity clamped to `n - 1`,
//! neighbours reduced to `n - 1`) and log a warning when they do.

use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};

pub const PERPLEXITY_RANGE: (f64, f64) = (5.0, 50.0);
pub const N_NEIGHBORS_RANGE: (usize, usize) = (2, 100);

pub const DEFAULT_TSNE_ITERATIONS: usize = 1000;
pub const DEFAULT_TSNE_LEARNING_RATE: f64 = 200.0;
pub const DEFAULT_UMAP_MIN_DIST: f64 = 0.1;

/// Dimensionality reduction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Pca,
    Tsne,
    Umap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TsneParams {
    pub perplexity: f64,
    pub iterations: usize,
    pub learning_rate: f64,
}

impl TsneParams {
    pub fn adaptive(n_samples: usize) -> Self {
        let scaled = ((n_samples as f64) * 0.05).floor();
        let perplexity = scaled
            .clamp(PERPLEXITY_RANGE.0, PERPLEXITY_RANGE.1)
            .min((n_samples / 3) as f64);
        Self {
            perplexity,
            iterations: DEFAULT_TSNE_ITERATIONS,
            learning_rate: DEFAULT_TSNE_LEARNING_RATE,
        }
    }

    /// Structural checks plus the perplexity bounds for `n_samples`: within
    /// [`PERPLEXITY_RANGE`] and below `n/3`. The adaptive default for `n_samples`
    /// always passes, even where small datasets push it under the range.
    pub fn check_bounds(&self, n_samples: usize) -> Result<()> {
        self.validate()?;
        let p = self.perplexity;
        if p == Self::adaptive(n_samples).perplexity {
            return Ok(());
        }
        let (lo, hi) = PERPLEXITY_RANGE;
        if !(lo..=hi).contains(&p) {
            return Err(Error::out_of_range(
                "perplexity",
                p,
                format!("must lie within [{lo}, {hi}]"),
            ));
        }
        if p >= n_samples as f64 / 3.0 {
            return Err(Error::out_of_range(
                "perplexity",
                p,
                format!("must be below n/3 for {n_samples} samples"),
            ));
        }
        Ok(())
    }

    /// Structural checks applied by the reducer whatever the origin of the values.
    pub fn validate(&self) -> Result<()> {
        if !self.perplexity.is_finite() || self.perplexity < 0.0 {
            return Err(Error::out_of_range(
                "perplexity",
                self.perplexity,
                "must be finite and non-negative",
            ));
        }
        if self.iterations == 0 {
            return Err(Error::out_of_range("iterations", 0.0, "must be positive"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::out_of_range(
                "learning_rate",
                self.learning_rate,
                "must be finite and positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
}

impl UmapParams {
    pub fn adaptive(n_samples: usize) -> Self {
        let root = (n_samples as f64).sqrt().floor() as usize;
        Self {
            n_neighbors: root.clamp(N_NEIGHBORS_RANGE.0, N_NEIGHBORS_RANGE.1),
            min_dist: DEFAULT_UMAP_MIN_DIST,
            n_epochs: n_samples.clamp(200, 500),
        }
    }

    /// Structural checks plus `n_neighbors` within [`N_NEIGHBORS_RANGE`].
    ///
    /// `n_neighbors >= n` is not an error here; the reducer lowers it to `n - 1`.
    pub fn check_bounds(&self) -> Result<()> {
        self.validate()?;
        let (lo, hi) = N_NEIGHBORS_RANGE;
        if !(lo..=hi).contains(&self.n_neighbors) {
            return Err(Error::out_of_range(
                "n_neighbors",
                self.n_neighbors as f64,
                format!("must lie within [{lo}, {hi}]"),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors == 0 {
            return Err(Error::out_of_range("n_neighbors", 0.0, "must be positive"));
        }
        if !self.min_dist.is_finite() || self.min_dist < 0.0 {
            return Err(Error::out_of_range(
                "min_dist",
                self.min_dist,
                "must be finite and non-negative",
            ));
        }
        if self.n_epochs == 0 {
            return Err(Error::out_of_range("n_epochs", 0.0, "must be positive"));
        }
        Ok(())
    }
}

/// Parameters tagged by method. PCA takes none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ReductionParams {
    Pca,
    Tsne(TsneParams),
    Umap(UmapParams),
}

impl ReductionParams {
    /// Bounds checks for a dataset of `n_samples` rows. PCA has nothing to check.
    pub fn check_bounds(&self, n_samples: usize) -> Result<()> {
        match self {
            ReductionParams::Pca => Ok(()),
            ReductionParams::Tsne(p) => p.check_bounds(n_samples),
            ReductionParams::Umap(p) => p.check_bounds(),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            ReductionParams::Pca => Method::Pca,
            ReductionParams::Tsne(_) => Method::Tsne,
            ReductionParams::Umap(_) => Method::Umap,
        }
    }
}

/// Default t-SNE and UMAP parameters for a dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub tsne: TsneParams,
    pub umap: UmapParams,
}

pub fn adaptive_params(n_samples: usize) -> AdaptiveParams {
    AdaptiveParams {
        tsne: TsneParams::adaptive(n_samples),
        umap: UmapParams::adaptive(n_samples),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TsneOverrides {
    pub perplexity: Option<f64>,
    pub iterations: Option<usize>,
    pub learning_rate: Option<f64>,
}

impl TsneOverrides {
    /// Replaces fields of `base` with overrides and checks the result against the
    /// bounds for `n_samples`.
    pub fn apply(&self, base: TsneParams, n_samples: usize) -> Result<TsneParams> {
        let mut params = base;
        if let Some(p) = self.perplexity {
            params.perplexity = p;
        }
        if let Some(it) = self.iterations {
            params.iterations = it;
        }
        if let Some(lr) = self.learning_rate {
            params.learning_rate = lr;
        }
        params.check_bounds(n_samples)?;
        Ok(params)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UmapOverrides {
    pub n_neighbors: Option<usize>,
    pub min_dist: Option<f64>,
    pub n_epochs: Option<usize>,
}

impl UmapOverrides {
    pub fn apply(&self, base: UmapParams) -> Result<UmapParams> {
        let mut params = base;
        if let Some(k) = self.n_neighbors {
            params.n_neighbors = k;
        }
        if let Some(d) = self.min_dist {
            params.min_dist = d;
        }
        if let Some(e) = self.n_epochs {
            params.n_epochs = e;
        }
        params.check_bounds()?;
        Ok(params)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamOverrides {
    pub tsne: TsneOverrides,
    pub umap: UmapOverrides,
}

/// Adaptive defaults for `n_samples`, with validated overrides applied for `method`.
pub fn resolve(
    method: Method,
    n_samples: usize,
    overrides: &ParamOverrides,
) -> Result<ReductionParams> {
    let defaults = adaptive_params(n_samples);
    let params = match method {
        Method::Pca => ReductionParams::Pca,
        Method::Tsne => ReductionParams::Tsne(overrides.tsne.apply(defaults.tsne, n_samples)?),
        Method::Umap => ReductionParams::Umap(overrides.umap.apply(defaults.umap)?),
    };
    debug!("resolved {:?} for {} samples", params, n_samples);
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsne_perplexity_clamped_for_large_n() {
        assert_eq!(TsneParams::adaptive(10_000).perplexity, 50.0);
        assert_eq!(TsneParams::adaptive(400).perplexity, 20.0);
    }

    #[test]
    fn test_tsne_perplexity_small_n() {
        assert_eq!(TsneParams::adaptive(50).perplexity, 5.0);
        // floor(n/3) wins over the lower bound of 5
        assert_eq!(TsneParams::adaptive(12).perplexity, 4.0);
        assert_eq!(TsneParams::adaptive(2).perplexity, 0.0);
        let p = TsneParams::adaptive(1000);
        assert_eq!(p.iterations, 1000);
        assert_eq!(p.learning_rate, 200.0);
    }

    #[test]
    fn test_umap_adaptive() {
        let p = UmapParams::adaptive(50);
        assert_eq!(p.n_neighbors, 7);
        assert_eq!(p.min_dist, 0.1);
        assert_eq!(p.n_epochs, 200);

        assert_eq!(UmapParams::adaptive(0).n_neighbors, 2);
        assert_eq!(UmapParams::adaptive(1_000_000).n_neighbors, 100);
        assert_eq!(UmapParams::adaptive(350).n_epochs, 350);
        assert_eq!(UmapParams::adaptive(10_000).n_epochs, 500);
    }

    #[test]
    fn test_perplexity_override_bounds() {
        let base = TsneParams::adaptive(300);
        let ok = TsneOverrides {
            perplexity: Some(30.0),
            ..Default::default()
        };
        assert_eq!(ok.apply(base, 300).unwrap().perplexity, 30.0);

        let too_high = TsneOverrides {
            perplexity: Some(60.0),
            ..Default::default()
        };
        assert!(matches!(
            too_high.apply(base, 300),
            Err(Error::ParameterOutOfRange { name: "perplexity", .. })
        ));

        // 20 is within [5, 50] but not below 45 / 3
        let too_large_for_n = TsneOverrides {
            perplexity: Some(20.0),
            ..Default::default()
        };
        assert!(too_large_for_n.apply(TsneParams::adaptive(45), 45).is_err());
    }

    #[test]
    fn test_structural_overrides_rejected() {
        let base = TsneParams::adaptive(300);
        let zero_iter = TsneOverrides {
            iterations: Some(0),
            ..Default::default()
        };
        assert!(zero_iter.apply(base, 300).is_err());

        let bad_lr = TsneOverrides {
            learning_rate: Some(f64::NAN),
            ..Default::default()
        };
        assert!(bad_lr.apply(base, 300).is_err());

        let umap = UmapParams::adaptive(300);
        for bad in [
            UmapOverrides {
                n_neighbors: Some(1),
                ..Default::default()
            },
            UmapOverrides {
                n_neighbors: Some(101),
                ..Default::default()
            },
            UmapOverrides {
                min_dist: Some(-0.1),
                ..Default::default()
            },
            UmapOverrides {
                n_epochs: Some(0),
                ..Default::default()
            },
        ] {
            assert!(bad.apply(umap).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_resolve_dispatches_by_method() {
        let overrides = ParamOverrides {
            umap: UmapOverrides {
                n_neighbors: Some(15),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(resolve(Method::Pca, 10, &overrides).unwrap(), ReductionParams::Pca);

        match resolve(Method::Umap, 100, &overrides).unwrap() {
            ReductionParams::Umap(p) => {
                assert_eq!(p.n_neighbors, 15);
                assert_eq!(p.n_epochs, 200);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            resolve(Method::Tsne, 100, &overrides).unwrap().method(),
            Method::Tsne
        );
    }

    #[test]
    fn test_hand_built_params_use_override_bounds() {
        let too_large_for_n = ReductionParams::Tsne(TsneParams {
            perplexity: 45.0,
            ..TsneParams::adaptive(30)
        });
        assert!(matches!(
            too_large_for_n.check_bounds(30),
            Err(Error::ParameterOutOfRange { name: "perplexity", .. })
        ));

        let wide = ReductionParams::Umap(UmapParams {
            n_neighbors: 500,
            ..UmapParams::adaptive(1000)
        });
        assert!(matches!(
            wide.check_bounds(1000),
            Err(Error::ParameterOutOfRange { name: "n_neighbors", .. })
        ));
        assert!(ReductionParams::Pca.check_bounds(0).is_ok());
    }

    #[test]
    fn test_adaptive_defaults_always_pass_bounds() {
        for n in [0, 1, 2, 6, 12, 45, 100, 1000, 10_000] {
            let defaults = adaptive_params(n);
            assert!(defaults.tsne.check_bounds(n).is_ok(), "tsne n={n}");
            assert!(defaults.umap.check_bounds().is_ok(), "umap n={n}");
        }
    }
}
