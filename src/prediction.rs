//! Detection data model.
//!
//! A `Prediction` is one labeled bounding box in source-image pixel coordinates,
//! with the box described by its center point. The detection service speaks the
//! wire form `{x, y, width, height, class, confidence}`; `WirePrediction` mirrors
//! that shape and is validated into a `Prediction` on the way in.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// One detected object instance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub class_name: String,
    /// Detection confidence (0.0-1.0).
    pub confidence: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl Prediction {
    pub fn new(
        class_name: impl Into<String>,
        confidence: f32,
        center_x: f32,
        center_y: f32,
        width: f32,
        height: f32,
    ) -> Result<Self> {
        let prediction = Self {
            class_name: class_name.into(),
            confidence,
            center_x,
            center_y,
            width,
            height,
        };
        prediction.validate()?;
        Ok(prediction)
    }

    pub fn validate(&self) -> Result<()> {
        if self.class_name.trim().is_empty() {
            return Err(anyhow!("prediction class must not be empty"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "prediction confidence {} outside 0.0..=1.0",
                self.confidence
            ));
        }
        if !self.center_x.is_finite() || !self.center_y.is_finite() {
            return Err(anyhow!("prediction center must be finite"));
        }
        if !(self.width.is_finite() && self.width > 0.0)
            || !(self.height.is_finite() && self.height > 0.0)
        {
            return Err(anyhow!(
                "prediction size {}x{} must be positive",
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    /// Label drawn next to the box, e.g. `"hold 87%"`.
    pub fn label(&self) -> String {
        format!("{} {:.0}%", self.class_name, (self.confidence * 100.0).round())
    }
}

/// Prediction as returned by the detection service.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WirePrediction {
    /// Box center x.
    pub x: f32,
    /// Box center y.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
}

impl TryFrom<WirePrediction> for Prediction {
    type Error = anyhow::Error;

    fn try_from(wire: WirePrediction) -> Result<Self> {
        Prediction::new(
            wire.class_name,
            wire.confidence,
            wire.x,
            wire.y,
            wire.width,
            wire.height,
        )
    }
}

impl From<&Prediction> for WirePrediction {
    fn from(prediction: &Prediction) -> Self {
        Self {
            x: prediction.center_x,
            y: prediction.center_y,
            width: prediction.width,
            height: prediction.height,
            class_name: prediction.class_name.clone(),
            confidence: prediction.confidence,
        }
    }
}
