use anyhow::{anyhow, Result};
use std::path::Path;

use super::camera::{request_camera_stream, CameraConfig, CameraError, CameraStream};
use super::still::StillImage;

/// Capture lifecycle.
///
/// `Idle -> Previewing -> Captured`, `Idle -> Captured` (upload),
/// `Idle | Previewing -> Idle` (reset). `Captured` holds until `reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Previewing,
    Captured,
}

/// Produces exactly one current still image from a camera or an uploaded file.
///
/// The manager is the only owner of the camera stream; it is released on reset,
/// after every snapshot attempt, and on drop.
pub struct CaptureManager {
    camera: CameraConfig,
    stream: Option<CameraStream>,
    still: Option<StillImage>,
}

impl CaptureManager {
    pub fn new(camera: CameraConfig) -> Self {
        Self {
            camera,
            stream: None,
            still: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.still.is_some() {
            CaptureState::Captured
        } else if self.stream.is_some() {
            CaptureState::Previewing
        } else {
            CaptureState::Idle
        }
    }

    pub fn camera_config(&self) -> &CameraConfig {
        &self.camera
    }

    /// Open the camera for preview. A failed request leaves the manager idle.
    pub fn request_camera_stream(&mut self) -> Result<(), CameraError> {
        match self.state() {
            CaptureState::Previewing => return Ok(()),
            CaptureState::Captured => {
                return Err(CameraError::StreamStart(
                    "a still is already captured; reset first".to_string(),
                ))
            }
            CaptureState::Idle => {}
        }
        let stream = request_camera_stream(&self.camera)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Snapshot the current preview frame, then release the camera.
    pub fn capture_still(&mut self) -> Result<&StillImage> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| anyhow!("camera preview is not running"))?;
        let snapshot = stream
            .grab_frame()
            .and_then(|frame| StillImage::from_camera_frame(&frame));
        stream.stop();
        let still = snapshot?;
        log::info!(
            "captured still {}x{} from {} (sha256 {})",
            still.dimensions().0,
            still.dimensions().1,
            stream.device(),
            still.digest()
        );
        Ok(self.still.insert(still))
    }

    /// Accept a user-selected image file. Any running preview is released.
    pub fn accept_uploaded_file(&mut self, path: &Path) -> Result<&StillImage> {
        if self.still.is_some() {
            return Err(anyhow!("a still is already captured; reset first"));
        }
        self.release_camera();
        let still = StillImage::from_upload(path)?;
        log::info!(
            "accepted upload {} ({}, sha256 {})",
            path.display(),
            still.content_type(),
            still.digest()
        );
        Ok(self.still.insert(still))
    }

    pub fn still(&self) -> Option<&StillImage> {
        self.still.as_ref()
    }

    pub fn camera_active(&self) -> bool {
        self.stream.as_ref().is_some_and(CameraStream::is_active)
    }

    /// Release the camera if open and drop the current still.
    pub fn reset(&mut self) {
        self.release_camera();
        self.still = None;
    }

    fn release_camera(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.release_camera();
    }
}
