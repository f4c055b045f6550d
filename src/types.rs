use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// A coordinate in the 2D embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One item handed over by feature extraction. Its position in the input slice is its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub vector: Vec<f64>,
    pub is_valid: bool,
    /// Scalar used downstream for coloring, passed through untouched.
    pub value: f64,
}

impl FeatureRow {
    pub fn valid(vector: Vec<f64>, value: f64) -> Self {
        Self {
            vector,
            is_valid: true,
            value,
        }
    }

    pub fn invalid(value: f64) -> Self {
        Self {
            vector: Vec::new(),
            is_valid: false,
            value,
        }
    }
}

/// Dense matrix of the valid rows, in input order, plus the map back to the original items.
///
/// Row `i` of the matrix belongs to original item `source_index()[i]`. The matrix is
/// immutable once built and is only ever read by the reducers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Array2<f64>,
    source_index: Vec<usize>,
}

impl FeatureMatrix {
    /// Builds a matrix whose rows map one-to-one onto original items `0..n`.
    pub fn new(data: Array2<f64>) -> Self {
        let source_index = (0..data.nrows()).collect();
        Self { data, source_index }
    }

    /// Collects the valid rows of `items`.
    ///
    /// All valid rows must share one length; invalid rows are skipped and never
    /// receive a matrix row.
    pub fn from_rows(items: &[FeatureRow]) -> Result<Self> {
        let mut source_index = Vec::new();
        let mut width: Option<usize> = None;
        for (i, item) in items.iter().enumerate().filter(|(_, item)| item.is_valid) {
            match width {
                None => width = Some(item.vector.len()),
                Some(w) if w != item.vector.len() => {
                    return Err(Error::InvalidInput(format!(
                        "item {} has {} features, expected {}",
                        i,
                        item.vector.len(),
                        w
                    )));
                }
                Some(_) => {}
            }
            source_index.push(i);
        }

        let width = width.unwrap_or(0);
        if !source_index.is_empty() && width == 0 {
            return Err(Error::InvalidInput(
                "valid items must carry at least one feature".to_string(),
            ));
        }

        let mut flat = Vec::with_capacity(source_index.len() * width);
        for &i in &source_index {
            flat.extend_from_slice(&items[i].vector);
        }
        let data = Array2::from_shape_vec((source_index.len(), width), flat)
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        Ok(Self { data, source_index })
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Original item index for every matrix row.
    pub fn source_index(&self) -> &[usize] {
        &self.source_index
    }
}

/// Per-item output handed to the presentation layer.
///
/// Invalid items keep every optional field empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub value: f64,
    pub coordinates: Option<Point2D>,
    pub cluster: Option<usize>,
    pub is_outlier: Option<bool>,
}

impl ItemResult {
    pub fn empty(value: f64) -> Self {
        Self {
            value,
            coordinates: None,
            cluster: None,
            is_outlier: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_skips_invalid() {
        let items = vec![
            FeatureRow::valid(vec![1.0, 0.0], 1.0),
            FeatureRow::invalid(2.0),
            FeatureRow::valid(vec![0.0, 1.0], 3.0),
        ];
        let matrix = FeatureMatrix::from_rows(&items).unwrap();

        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix.ncols(), 2);
        assert_eq!(matrix.source_index(), &[0, 2]);
        assert_eq!(matrix.view()[[1, 1]], 1.0);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let items = vec![
            FeatureRow::valid(vec![1.0, 0.0], 0.0),
            FeatureRow::valid(vec![1.0], 0.0),
        ];
        assert!(matches!(
            FeatureMatrix::from_rows(&items),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_from_rows_all_invalid_is_empty() {
        let items = vec![FeatureRow::invalid(0.0), FeatureRow::invalid(1.0)];
        let matrix = FeatureMatrix::from_rows(&items).unwrap();
        assert!(matrix.is_empty());
        assert!(matrix.source_index().is_empty());
    }

    #[test]
    fn test_from_rows_rejects_zero_width() {
        let items = vec![FeatureRow::valid(Vec::new(), 0.0)];
        assert!(FeatureMatrix::from_rows(&items).is_err());
    }
}
