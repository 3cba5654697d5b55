use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::capture::{CameraConfig, Facing};
use crate::detect::{DetectorConfig, RenderMode, DEFAULT_BASE_URL, DEFAULT_OVERLAP};
use crate::filter::ConfidenceThreshold;
use crate::session::SessionConfig;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    base_url: Option<String>,
    overlap: Option<f32>,
    mode: Option<RenderMode>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    facing: Option<Facing>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Resolved configuration for the capture pipeline.
///
/// Sources, later wins: built-in defaults, the JSON file named by
/// `CLIMBLOG_CONFIG`, then `CLIMBLOG_*` environment overrides.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub detector: DetectorConfig,
    pub camera: CameraConfig,
    /// Initial confidence threshold.
    pub threshold: ConfidenceThreshold,
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLIMBLOG_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            detector: DetectorConfig {
                base_url: detector
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                overlap: detector.overlap.unwrap_or(DEFAULT_OVERLAP),
                mode: detector.mode.unwrap_or_default(),
                timeout: Duration::from_secs(detector.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                facing: camera.facing.unwrap_or_default(),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            threshold: file
                .threshold
                .map(ConfidenceThreshold::new)
                .unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(base) = std::env::var("CLIMBLOG_DETECT_BASE") {
            if !base.trim().is_empty() {
                self.detector.base_url = base.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("CLIMBLOG_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(confidence) = std::env::var("CLIMBLOG_CONFIDENCE") {
            let value: f32 = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("CLIMBLOG_CONFIDENCE must be a number between 0 and 1"))?;
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("CLIMBLOG_CONFIDENCE must be between 0 and 1"));
            }
            self.threshold = ConfidenceThreshold::new(value);
        }
        if let Ok(overlap) = std::env::var("CLIMBLOG_OVERLAP") {
            self.detector.overlap = overlap
                .trim()
                .parse()
                .map_err(|_| anyhow!("CLIMBLOG_OVERLAP must be a number between 0 and 1"))?;
        }
        if let Ok(timeout) = std::env::var("CLIMBLOG_DETECT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("CLIMBLOG_DETECT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.detector.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.detector.base_url)
            .map_err(|e| anyhow!("invalid detector base_url {}: {}", self.detector.base_url, e))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "detector base_url must be http(s), got {}",
                base.scheme()
            ));
        }
        if !self.detector.overlap.is_finite() || !(0.0..=1.0).contains(&self.detector.overlap) {
            return Err(anyhow!("detector overlap must be between 0 and 1"));
        }
        if self.detector.timeout.as_secs() == 0 {
            return Err(anyhow!("detector timeout must be greater than zero"));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            camera: self.camera.clone(),
            overlap: self.detector.overlap,
            threshold: self.threshold,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        assert_eq!(cfg.detector.base_url, "http://localhost:5001");
        assert_eq!(cfg.detector.overlap, 0.30);
        assert_eq!(cfg.detector.mode, RenderMode::Both);
        assert_eq!(cfg.camera.facing, Facing::Environment);
        assert_eq!(cfg.threshold.value(), 0.35);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        cfg.detector.base_url = "file:///tmp/detect".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        cfg.detector.overlap = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        cfg.detector.timeout = Duration::from_secs(0);
        assert!(cfg.validate().is_err());
    }
}
