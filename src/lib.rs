//! ClimbLog hold detector
//!
//! Capture a photo of a climbing wall, send it to a remote detection service,
//! and draw labeled bounding boxes for the holds it finds.
//!
//! # Pipeline
//!
//! 1. **Capture**: one still image from a camera stream or a user-selected file.
//! 2. **Detect**: a single multipart POST to `{base}/detect`, normalized into
//!    predictions plus an optional server-rendered image.
//! 3. **Filter**: a local confidence threshold selects the active predictions.
//! 4. **Overlay**: active predictions are scaled into display space and drawn.
//!
//! # Module Structure
//!
//! - `capture`: camera streams, still images, the capture state machine
//! - `detect`: detection service seam and its HTTP client
//! - `filter`: threshold, filtering, per-class summaries
//! - `overlay`: drawing surface and box renderer
//! - `session`: the capture-to-overlay flow tying these together
//! - `config`: file and environment configuration

pub mod capture;
pub mod config;
pub mod detect;
pub mod filter;
pub mod overlay;
pub mod prediction;
pub mod session;

pub use capture::{CameraConfig, CameraError, CaptureManager, CaptureState, StillImage};
pub use config::CaptureConfig;
pub use detect::{
    DetectionClient, DetectionError, DetectionResponse, DetectionService, DetectorConfig,
    RenderMode,
};
pub use filter::{filter, summarize, ConfidenceThreshold, Summary};
pub use overlay::{ClassPalette, ImageLayout, RasterSurface, RenderOutcome, Surface};
pub use prediction::Prediction;
pub use session::{
    CaptureOutcome, CaptureSession, DetectionTicket, FilePicker, SessionConfig, SessionPhase,
};
