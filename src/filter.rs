//! Confidence filtering and per-class summaries.
//!
//! Pure derivations: nothing here performs I/O or keeps state between calls.

use serde::Serialize;

use crate::prediction::Prediction;

pub const MIN_THRESHOLD: f32 = 0.10;
pub const MAX_THRESHOLD: f32 = 0.90;
pub const THRESHOLD_STEP: f32 = 0.05;
pub const DEFAULT_THRESHOLD: f32 = 0.35;

/// User-adjustable confidence threshold.
///
/// Always within `MIN_THRESHOLD..=MAX_THRESHOLD` and on a `THRESHOLD_STEP` grid.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    /// Clamp into range and snap to the nearest step.
    pub fn new(value: f32) -> Self {
        if !value.is_finite() {
            return Self::default();
        }
        let clamped = value.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        let steps = (clamped / THRESHOLD_STEP).round();
        // Snapping can land a hair outside the range through float error.
        let snapped = (steps * THRESHOLD_STEP).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        Self((snapped * 100.0).round() / 100.0)
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Display form used next to the slider, e.g. `"35%"`.
    pub fn percent_label(self) -> String {
        format!("{:.0}%", (self.0 * 100.0).round())
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl From<ConfidenceThreshold> for f32 {
    fn from(threshold: ConfidenceThreshold) -> Self {
        threshold.0
    }
}

/// Predictions with `confidence >= threshold`, in input order.
pub fn filter(predictions: &[Prediction], threshold: f32) -> Vec<Prediction> {
    predictions
        .iter()
        .filter(|p| p.confidence >= threshold)
        .cloned()
        .collect()
}

/// Count of active predictions, overall and per class.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    /// Sorted by descending count; ties keep first-encountered order.
    pub by_class: Vec<(String, usize)>,
}

pub fn summarize(active: &[Prediction]) -> Summary {
    let mut by_class: Vec<(String, usize)> = Vec::new();
    for prediction in active {
        match by_class
            .iter_mut()
            .find(|(class_name, _)| *class_name == prediction.class_name)
        {
            Some((_, count)) => *count += 1,
            None => by_class.push((prediction.class_name.clone(), 1)),
        }
    }
    // Stable sort keeps first-encountered order among equal counts.
    by_class.sort_by(|a, b| b.1.cmp(&a.1));
    Summary {
        total: active.len(),
        by_class,
    }
}
