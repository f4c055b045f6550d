//! Z-score outlier detection over embedded coordinates.
//!
//! Each axis is standardised independently with its mean and population standard
//! deviation. A point is flagged when either axis reaches the threshold.

use crate::error::{Error, Result};
use crate::types::Point2D;
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Flags and the kept/removed partition, all aligned with the input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlierResult {
    pub flags: Vec<bool>,
    pub kept: Vec<Point2D>,
    pub kept_indices: Vec<usize>,
    pub removed_indices: Vec<usize>,
}

impl OutlierResult {
    pub fn n_outliers(&self) -> usize {
        self.removed_indices.len()
    }
}

/// Serialized as the bare threshold; deserialization goes through [`ZScoreFilter::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ZScoreFilter {
    threshold: f64,
}

impl TryFrom<f64> for ZScoreFilter {
    type Error = Error;

    fn try_from(threshold: f64) -> Result<Self> {
        Self::new(threshold)
    }
}

impl From<ZScoreFilter> for f64 {
    fn from(filter: ZScoreFilter) -> f64 {
        filter.threshold
    }
}

impl Default for ZScoreFilter {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ZScoreFilter {
    pub fn new(threshold: f64) -> Result<Self> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(Error::out_of_range(
                "threshold",
                threshold,
                "must be finite and positive",
            ));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, points: &[Point2D]) -> OutlierResult {
        let stats = AxisStats::of(points);
        let mut result = OutlierResult::default();
        for (i, p) in points.iter().enumerate() {
            let (zx, zy) = stats.z(p);
            let outlier = zx.abs() >= self.threshold || zy.abs() >= self.threshold;
            result.flags.push(outlier);
            if outlier {
                result.removed_indices.push(i);
            } else {
                result.kept_indices.push(i);
                result.kept.push(*p);
            }
        }
        debug!(
            "z-score filter (threshold {}): {} of {} points flagged",
            self.threshold,
            result.removed_indices.len(),
            points.len()
        );
        result
    }
}

/// Per-point `max(|z_x|, |z_y|)`.
pub fn z_scores(points: &[Point2D]) -> Vec<f64> {
    let stats = AxisStats::of(points);
    points
        .iter()
        .map(|p| {
            let (zx, zy) = stats.z(p);
            zx.abs().max(zy.abs())
        })
        .collect()
}

struct AxisStats {
    mean: Point2D,
    std: Point2D,
}

impl AxisStats {
    fn of(points: &[Point2D]) -> Self {
        if points.is_empty() {
            return Self {
                mean: Point2D::default(),
                std: Point2D::new(1.0, 1.0),
            };
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
        let var_x = points.iter().map(|p| (p.x - mean_x).powi(2)).sum::<f64>() / n;
        let var_y = points.iter().map(|p| (p.y - mean_y).powi(2)).sum::<f64>() / n;
        Self {
            mean: Point2D::new(mean_x, mean_y),
            std: Point2D::new(non_zero(var_x.sqrt()), non_zero(var_y.sqrt())),
        }
    }

    fn z(&self, p: &Point2D) -> (f64, f64) {
        (
            (p.x - self.mean.x) / self.std.x,
            (p.y - self.mean.y) / self.std.y,
        )
    }
}

fn non_zero(std: f64) -> f64 {
    if std == 0.0 {
        1.0
    } else {
        std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn one_extreme() -> Vec<Point2D> {
        let mut points = vec![Point2D::new(0.0, 0.0); 99];
        points.push(Point2D::new(1000.0, 1000.0));
        points
    }

    #[test]
    fn test_flags_only_the_extreme_point() {
        let filter = ZScoreFilter::new(3.0).unwrap();
        let result = filter.detect(&one_extreme());
        assert_eq!(result.flags.iter().filter(|&&f| f).count(), 1);
        assert!(result.flags[99]);
        assert_eq!(result.removed_indices, vec![99]);
        assert_eq!(result.kept_indices, (0..99).collect::<Vec<_>>());
        assert_eq!(result.kept.len(), 99);
    }

    #[test]
    fn test_constant_axis_uses_unit_std() {
        // x is constant, so z_x is zero everywhere
        let points: Vec<Point2D> = (0..10).map(|i| Point2D::new(4.0, i as f64)).collect();
        let result = ZScoreFilter::new(3.0).unwrap().detect(&points);
        assert!(result.flags.iter().all(|&f| !f));

        let same = vec![Point2D::new(1.0, 1.0); 5];
        assert!(z_scores(&same).iter().all(|&z| z == 0.0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // mean 0, population std 1 on x
        let points = vec![Point2D::new(-1.0, 0.0), Point2D::new(1.0, 0.0)];
        let result = ZScoreFilter::new(1.0).unwrap().detect(&points);
        assert_eq!(result.flags, vec![true, true]);
        let result = ZScoreFilter::new(1.0 + 1e-9).unwrap().detect(&points);
        assert_eq!(result.flags, vec![false, false]);
    }

    #[test]
    fn test_z_scores_take_larger_axis() {
        let points = vec![
            Point2D::new(-1.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(-1.0, 4.0),
            Point2D::new(1.0, -4.0),
        ];
        let z = z_scores(&points);
        // std_x = 1, std_y = sqrt(8)
        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[2], 4.0 / 8f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(ZScoreFilter::new(0.0).is_err());
        assert!(ZScoreFilter::new(-2.0).is_err());
        assert!(matches!(
            ZScoreFilter::new(f64::NAN),
            Err(Error::ParameterOutOfRange { name: "threshold", .. })
        ));
        assert!(ZScoreFilter::default().detect(&[]).flags.is_empty());
    }

    #[test]
    fn test_deserialized_threshold_is_checked() {
        let filter: ZScoreFilter = serde_json::from_str("2.5").unwrap();
        assert_eq!(filter.threshold(), 2.5);
        assert_eq!(serde_json::to_string(&filter).unwrap(), "2.5");

        assert!(serde_json::from_str::<ZScoreFilter>("-1.0").is_err());
        assert!(serde_json::from_str::<ZScoreFilter>("0.0").is_err());
    }
}
