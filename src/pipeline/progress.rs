use crate::error::{Error, Result};
use crate::progress::ProgressEvent;
use serde::{Deserialize, Serialize};

/// Where each pipeline step lands on the 0-100 progress scale.
///
/// `[0, reduction_start)` belongs to upstream feature extraction and is never
/// reported here. Completion is always 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressLayout {
    pub reduction_start: f64,
    pub reduction_end: f64,
    pub clustering: f64,
    pub outliers: f64,
}

impl Default for ProgressLayout {
    fn default() -> Self {
        Self {
            reduction_start: 50.0,
            reduction_end: 95.0,
            clustering: 95.0,
            outliers: 98.0,
        }
    }
}

impl ProgressLayout {
    /// Checks that the marks are ordered and lie within `[0, 100]`.
    pub fn validate(&self) -> Result<()> {
        let marks = [
            ("reduction_start", self.reduction_start),
            ("reduction_end", self.reduction_end),
            ("clustering", self.clustering),
            ("outliers", self.outliers),
        ];
        let mut previous = 0.0;
        for (name, mark) in marks {
            if !mark.is_finite() || mark < previous || mark > 100.0 {
                return Err(Error::out_of_range(
                    name,
                    mark,
                    "progress marks must be ordered within [0, 100]",
                ));
            }
            previous = mark;
        }
        Ok(())
    }

    pub fn reduction_percent(&self, event: &ProgressEvent) -> f64 {
        self.reduction_start + event.fraction() * (self.reduction_end - self.reduction_start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PipelineStep {
    Reducing(ProgressEvent),
    Clustering,
    DetectingOutliers,
    Done,
}

/// Progress of a whole pipeline run, mapped onto a single percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub percent: f64,
    pub step: PipelineStep,
}

impl PipelineProgress {
    /// Status line for display, e.g. `"TSNE: 120/1000"`.
    pub fn message(&self) -> String {
        match self.step {
            PipelineStep::Reducing(event) => format!(
                "{}: {}/{}",
                event.stage.to_string().to_uppercase(),
                event.current,
                event.total
            ),
            PipelineStep::Clustering => "Computing clusters...".to_string(),
            PipelineStep::DetectingOutliers => "Detecting outliers...".to_string(),
            PipelineStep::Done => "Done!".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Stage;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reduction_maps_into_its_segment() {
        let layout = ProgressLayout::default();
        let start = ProgressEvent::new(Stage::Umap, 0, 200);
        let middle = ProgressEvent::new(Stage::Umap, 100, 200);
        let end = ProgressEvent::new(Stage::Umap, 200, 200);
        assert_abs_diff_eq!(layout.reduction_percent(&start), 50.0);
        assert_abs_diff_eq!(layout.reduction_percent(&middle), 72.5);
        assert_abs_diff_eq!(layout.reduction_percent(&end), 95.0);
    }

    #[test]
    fn test_messages() {
        let reducing = PipelineProgress {
            percent: 60.0,
            step: PipelineStep::Reducing(ProgressEvent::new(Stage::Tsne, 120, 1000)),
        };
        assert_eq!(reducing.message(), "TSNE: 120/1000");
        let done = PipelineProgress {
            percent: 100.0,
            step: PipelineStep::Done,
        };
        assert_eq!(done.message(), "Done!");
    }

    #[test]
    fn test_layout_must_be_ordered() {
        assert!(ProgressLayout::default().validate().is_ok());
        let backwards = ProgressLayout {
            clustering: 90.0,
            ..ProgressLayout::default()
        };
        assert!(matches!(
            backwards.validate(),
            Err(Error::ParameterOutOfRange { name: "clustering", .. })
        ));
    }
}
