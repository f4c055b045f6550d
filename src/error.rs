use crate::progress::Stage;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the reducers, the clusterer, the outlier filter and the pipeline.
///
/// Every error aborts only the run that produced it. Nothing is retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The input could not be interpreted (ragged rows, mismatched lengths, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A hyperparameter is outside its accepted range. Raised before any computation.
    #[error("parameter '{name}' out of range ({value}): {reason}")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        reason: String,
    },

    /// NaN or infinity appeared during optimization.
    #[error("numeric instability in {stage} at iteration {iteration}")]
    NumericInstability { stage: Stage, iteration: usize },

    /// Cancellation was observed at a step boundary. No partial embedding is returned.
    #[error("{stage} cancelled after {completed} steps")]
    Cancelled { stage: Stage, completed: usize },

    /// A matrix factorization failed.
    #[error("linear algebra failure: {0}")]
    Linalg(String),
}

impl Error {
    pub(crate) fn out_of_range(name: &'static str, value: f64, reason: impl Into<String>) -> Self {
        Error::ParameterOutOfRange {
            name,
            value,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
