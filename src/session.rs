//! Capture-to-overlay session.
//!
//! `CaptureSession` drives one still through the pipeline:
//! capture (camera or file) -> detection -> confidence filter -> overlay.
//!
//! State changes mark the overlay dirty; callers redraw with `redraw()` when
//! `needs_redraw()` is set. Detection can run inline (`press_capture`, `upload`)
//! or in two stages (`begin_detection` / `complete_detection`) so the round trip
//! can happen on another thread. A completion whose sequence number no longer
//! matches the session (after `reset` or a newer capture) is discarded.

use std::path::{Path, PathBuf};

use crate::capture::{has_video_input, CameraConfig, CaptureManager, CaptureState, StillImage};
use crate::detect::{DetectionError, DetectionResponse, DetectionService, DEFAULT_OVERLAP};
use crate::filter::{filter, summarize, ConfidenceThreshold, Summary};
use crate::overlay::{self, ClassPalette, ImageLayout, RenderOutcome, Surface};
use crate::prediction::Prediction;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub camera: CameraConfig,
    /// Overlap (NMS) threshold sent with every detection request.
    pub overlap: f32,
    pub threshold: ConfidenceThreshold,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            overlap: DEFAULT_OVERLAP,
            threshold: ConfidenceThreshold::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No image.
    Idle,
    /// Camera preview running.
    Previewing,
    /// A detection request is in flight.
    Detecting,
    /// A still is shown, with results or an error.
    Ready,
}

/// Source of user-selected image files.
pub trait FilePicker {
    /// `None` when the user cancels.
    fn pick(&mut self) -> Option<PathBuf>;
}

impl<F: FnMut() -> Option<PathBuf>> FilePicker for F {
    fn pick(&mut self) -> Option<PathBuf> {
        self()
    }
}

/// Result of a capture or upload action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Camera preview opened; press capture again to snapshot.
    PreviewStarted,
    /// A still was submitted for detection. Results or `error_message` are set.
    Submitted,
    /// The file picker was dismissed.
    PickerCancelled,
    /// The still could not be produced; `error_message` is set.
    Failed,
    /// Ignored because a detection is in flight.
    Busy,
}

/// One in-flight detection request.
#[derive(Clone, Debug)]
pub struct DetectionTicket {
    pub sequence: u64,
    pub image: StillImage,
    pub confidence: f32,
    pub overlap: f32,
}

pub struct CaptureSession<S: DetectionService> {
    service: S,
    capture: CaptureManager,
    camera_capable: bool,
    overlap: f32,
    threshold: ConfidenceThreshold,
    predictions: Vec<Prediction>,
    active: Vec<Prediction>,
    palette: ClassPalette,
    summary: Summary,
    service_summary: Option<Summary>,
    annotated: Option<String>,
    error: Option<String>,
    sequence: u64,
    pending: Option<u64>,
    dirty: bool,
}

impl<S: DetectionService> CaptureSession<S> {
    pub fn new(service: S, config: SessionConfig) -> Self {
        let camera_capable = has_video_input(&config.camera);
        log::info!(
            "capture session: camera {} ({})",
            config.camera.device,
            if camera_capable {
                "available"
            } else {
                "unavailable, file upload only"
            }
        );
        Self {
            service,
            capture: CaptureManager::new(config.camera),
            camera_capable,
            overlap: config.overlap,
            threshold: config.threshold,
            predictions: Vec::new(),
            active: Vec::new(),
            palette: ClassPalette::default(),
            summary: Summary::default(),
            service_summary: None,
            annotated: None,
            error: None,
            sequence: 0,
            pending: None,
            dirty: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.pending.is_some() {
            return SessionPhase::Detecting;
        }
        match self.capture.state() {
            CaptureState::Idle => SessionPhase::Idle,
            CaptureState::Previewing => SessionPhase::Previewing,
            CaptureState::Captured => SessionPhase::Ready,
        }
    }

    /// The capture button.
    ///
    /// Opens the camera when one is present, snapshots it when already
    /// previewing, and otherwise (or when the camera cannot be opened) asks
    /// `picker` for a file.
    pub fn press_capture<P: FilePicker + ?Sized>(&mut self, picker: &mut P) -> CaptureOutcome {
        match self.phase() {
            SessionPhase::Detecting => return CaptureOutcome::Busy,
            SessionPhase::Previewing => return self.snapshot_and_detect(),
            SessionPhase::Idle | SessionPhase::Ready => {}
        }
        if self.camera_capable {
            self.capture.reset();
            self.clear_results();
            match self.capture.request_camera_stream() {
                Ok(()) => {
                    log::info!("capture session: preview started");
                    return CaptureOutcome::PreviewStarted;
                }
                Err(err) => {
                    log::warn!("capture session: {}; falling back to file picker", err);
                }
            }
        }
        match picker.pick() {
            Some(path) => self.upload(&path),
            None => CaptureOutcome::PickerCancelled,
        }
    }

    /// Use an image file as the still and run detection on it.
    pub fn upload(&mut self, path: &Path) -> CaptureOutcome {
        if self.pending.is_some() {
            return CaptureOutcome::Busy;
        }
        self.capture.reset();
        self.clear_results();
        if let Err(err) = self.capture.accept_uploaded_file(path) {
            log::warn!("capture session: upload rejected: {:#}", err);
            self.error = Some(format!("{:#}", err));
            return CaptureOutcome::Failed;
        }
        self.run_detection()
    }

    fn snapshot_and_detect(&mut self) -> CaptureOutcome {
        if let Err(err) = self.capture.capture_still() {
            log::warn!("capture session: snapshot failed: {:#}", err);
            self.error = Some(format!("snapshot failed: {:#}", err));
            self.dirty = true;
            return CaptureOutcome::Failed;
        }
        self.clear_results();
        self.run_detection()
    }

    fn run_detection(&mut self) -> CaptureOutcome {
        let Some(ticket) = self.begin_detection() else {
            return CaptureOutcome::Busy;
        };
        let result = self
            .service
            .detect(&ticket.image, ticket.confidence, ticket.overlap);
        self.complete_detection(ticket, result);
        CaptureOutcome::Submitted
    }

    /// Start a detection for the current still.
    ///
    /// Returns `None` without a still or while another detection is pending.
    /// Clears the error. Results for the same still, including its annotated
    /// image, stay until the reply replaces them; a new capture or upload has
    /// already cleared them.
    pub fn begin_detection(&mut self) -> Option<DetectionTicket> {
        if self.pending.is_some() {
            return None;
        }
        let image = self.capture.still()?.clone();
        self.sequence += 1;
        self.pending = Some(self.sequence);
        self.error = None;
        self.dirty = true;
        Some(DetectionTicket {
            sequence: self.sequence,
            image,
            confidence: self.threshold.value(),
            overlap: self.overlap,
        })
    }

    /// Apply the outcome of `ticket`. Returns false when the ticket is stale.
    ///
    /// On failure the previous predictions stay in place and only the error
    /// message changes.
    pub fn complete_detection(
        &mut self,
        ticket: DetectionTicket,
        result: Result<DetectionResponse, DetectionError>,
    ) -> bool {
        if self.pending != Some(ticket.sequence) {
            log::debug!(
                "capture session: dropping stale detection #{} (current #{})",
                ticket.sequence,
                self.sequence
            );
            return false;
        }
        self.pending = None;
        match result {
            Ok(response) => {
                log::info!(
                    "capture session: detection #{} returned {} predictions",
                    ticket.sequence,
                    response.predictions.len()
                );
                self.palette = ClassPalette::from_predictions(&response.predictions);
                self.predictions = response.predictions;
                self.annotated = response.annotated;
                self.service_summary = response.summary;
                self.error = None;
                self.refilter();
            }
            Err(err) => {
                log::warn!("capture session: detection #{} failed: {}", ticket.sequence, err);
                self.error = Some(err.to_string());
            }
        }
        self.dirty = true;
        true
    }

    /// Move the threshold. Re-filters locally; no request is sent.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = ConfidenceThreshold::new(threshold);
        self.refilter();
        self.dirty = true;
    }

    /// Release the camera and drop the still, results and any pending request.
    pub fn reset(&mut self) {
        self.capture.reset();
        self.clear_results();
        self.sequence += 1;
        self.pending = None;
        self.dirty = true;
        log::info!("capture session: reset");
    }

    fn clear_results(&mut self) {
        self.predictions.clear();
        self.active.clear();
        self.palette = ClassPalette::default();
        self.summary = Summary::default();
        self.service_summary = None;
        self.annotated = None;
        self.error = None;
        self.dirty = true;
    }

    fn refilter(&mut self) {
        self.active = filter(&self.predictions, self.threshold.value());
        self.summary = summarize(&self.active);
    }

    /// Capture is blocked while a request is in flight.
    pub fn can_capture(&self) -> bool {
        self.pending.is_none()
    }

    /// True when there is something to show: detections, an error, or a
    /// server-rendered image.
    pub fn has_result(&self) -> bool {
        !self.active.is_empty() || self.error.is_some() || self.annotated.is_some()
    }

    /// Call when the displayed image (re)loads.
    pub fn on_image_loaded(&mut self) {
        self.dirty = true;
    }

    pub fn needs_redraw(&self) -> bool {
        self.dirty
    }

    /// Redraw the overlay for the current state.
    pub fn redraw<T: Surface + ?Sized>(
        &mut self,
        surface: &mut T,
        layout: &ImageLayout,
    ) -> RenderOutcome {
        let outcome = overlay::render(
            surface,
            layout,
            &self.active,
            &self.palette,
            self.annotated.is_some(),
        );
        if outcome != RenderOutcome::NotLaidOut {
            self.dirty = false;
        }
        outcome
    }

    pub fn threshold(&self) -> ConfidenceThreshold {
        self.threshold
    }

    pub fn overlap(&self) -> f32 {
        self.overlap
    }

    /// Everything the service returned for the current still.
    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    /// Predictions at or above the threshold.
    pub fn active_predictions(&self) -> &[Prediction] {
        &self.active
    }

    /// Summary of the active predictions.
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Summary as reported by the service, over its unfiltered predictions.
    pub fn service_summary(&self) -> Option<&Summary> {
        self.service_summary.as_ref()
    }

    pub fn annotated(&self) -> Option<&str> {
        self.annotated.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn still(&self) -> Option<&StillImage> {
        self.capture.still()
    }

    pub fn camera_capable(&self) -> bool {
        self.camera_capable
    }

    pub fn camera_active(&self) -> bool {
        self.capture.camera_active()
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}
