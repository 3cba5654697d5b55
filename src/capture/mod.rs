//! Capture source management.
//!
//! Produces the single still image under inspection, from either:
//! - a live camera stream (`camera`)
//! - a user-selected file (`StillImage::from_upload`)
//!
//! Camera failures are never fatal. Callers fall back to file selection whenever
//! `request_camera_stream` returns a `CameraError`.

pub mod camera;
mod manager;
pub mod still;

pub use camera::{
    has_video_input, request_camera_stream, CameraConfig, CameraError, CameraStream, Facing,
};
pub use manager::{CaptureManager, CaptureState};
pub use still::{StillImage, StillOrigin};
