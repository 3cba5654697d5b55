//! Camera stream acquisition.
//!
//! `CameraStream` wraps one open video input. Device strings select the backend:
//! - `stub://<name>` synthetic camera for tests and demos
//! - a device node such as `/dev/video0` (feature: camera-v4l2)
//!
//! The synthetic camera accepts query options that mimic what a real device can do
//! to the capture flow:
//! - `deny`: permission refused
//! - `absent`: no video input present
//! - `fail`: device opens but streaming does not start
//! - `width=..&height=..`: reported native resolution (0 reports no dimensions)
//! - `facing=user|environment`: which way the only lens points
//!
//! A stream is released on `stop()` and on drop.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use thiserror::Error;
use url::Url;

/// Fallback snapshot size when a stream reports no dimensions.
pub const DEFAULT_SNAPSHOT_WIDTH: u32 = 720;
pub const DEFAULT_SNAPSHOT_HEIGHT: u32 = 1280;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied for {0}")]
    Denied(String),
    #[error("no video input available at {0}")]
    Unavailable(String),
    #[error("camera stream failed to start: {0}")]
    StreamStart(String),
}

/// Preferred lens direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear camera, pointed at the wall.
    #[default]
    Environment,
    User,
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device string (e.g., "/dev/video0" or "stub://rear").
    pub device: String,
    /// Requested lens direction. Honored when the device offers a choice.
    pub facing: Facing,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            facing: Facing::Environment,
            width: 1280,
            height: 720,
        }
    }
}

/// Returns true when the configured device looks usable without opening it.
pub fn has_video_input(config: &CameraConfig) -> bool {
    if config.device.starts_with("stub://") {
        return match SyntheticOptions::parse(&config.device) {
            Ok(options) => !options.absent,
            Err(err) => {
                log::warn!("camera check: {}", err);
                false
            }
        };
    }
    #[cfg(feature = "camera-v4l2")]
    {
        std::path::Path::new(&config.device).exists()
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        false
    }
}

/// Open the configured camera and start streaming.
pub fn request_camera_stream(config: &CameraConfig) -> Result<CameraStream, CameraError> {
    let mut stream = CameraStream::new(config.clone())?;
    stream.connect()?;
    Ok(stream)
}

/// Live camera stream.
pub struct CameraStream {
    backend: CameraBackend,
    active: bool,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
}

impl CameraStream {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        if config.device.starts_with("stub://") {
            let options = SyntheticOptions::parse(&config.device)
                .map_err(|err| CameraError::Unavailable(err.to_string()))?;
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config, options)),
                active: false,
            });
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
                active: false,
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(CameraError::Unavailable(format!(
                "{} (camera devices require the camera-v4l2 feature)",
                config.device
            )))
        }
    }

    /// Acquire the device and start streaming.
    pub fn connect(&mut self) -> Result<(), CameraError> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect()?,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.connect()?,
        }
        self.active = true;
        Ok(())
    }

    pub fn device(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(camera) => &camera.config.device,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => &camera.config.device,
        }
    }

    /// Native resolution reported by the stream. `(0, 0)` when unknown.
    pub fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.dimensions(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.dimensions(),
        }
    }

    /// Resolution a snapshot is taken at.
    pub fn snapshot_dimensions(&self) -> (u32, u32) {
        match self.dimensions() {
            (0, _) | (_, 0) => (DEFAULT_SNAPSHOT_WIDTH, DEFAULT_SNAPSHOT_HEIGHT),
            dims => dims,
        }
    }

    /// Grab the current frame at `snapshot_dimensions()`.
    pub fn grab_frame(&mut self) -> Result<RgbImage> {
        if !self.active {
            return Err(anyhow!("camera stream {} is not active", self.device()));
        }
        let (width, height) = self.snapshot_dimensions();
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.grab_frame(width, height),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.grab_frame(),
        }?;
        if frame.dimensions() != (width, height) {
            return Ok(image::imageops::resize(
                &frame,
                width,
                height,
                image::imageops::FilterType::Triangle,
            ));
        }
        Ok(frame)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Release the device. Safe to call more than once.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.stop(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.stop(),
        }
        self.active = false;
        log::info!("CameraStream: released {}", self.device());
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SyntheticOptions {
    deny: bool,
    absent: bool,
    fail: bool,
    width: Option<u32>,
    height: Option<u32>,
    facing: Option<Facing>,
}

impl SyntheticOptions {
    fn parse(device: &str) -> Result<Self> {
        let url = Url::parse(device).with_context(|| format!("parse camera device {}", device))?;
        let mut options = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "deny" => options.deny = true,
                "absent" => options.absent = true,
                "fail" => options.fail = true,
                "width" => {
                    options.width = Some(value.parse().context("stub camera width")?);
                }
                "height" => {
                    options.height = Some(value.parse().context("stub camera height")?);
                }
                "facing" => {
                    options.facing = Some(match value.as_ref() {
                        "user" => Facing::User,
                        "environment" => Facing::Environment,
                        other => return Err(anyhow!("unknown stub camera facing '{}'", other)),
                    });
                }
                other => return Err(anyhow!("unknown stub camera option '{}'", other)),
            }
        }
        Ok(options)
    }
}

struct SyntheticCamera {
    config: CameraConfig,
    options: SyntheticOptions,
    frame_count: u64,
    streaming: bool,
}

impl SyntheticCamera {
    fn new(config: CameraConfig, options: SyntheticOptions) -> Self {
        Self {
            config,
            options,
            frame_count: 0,
            streaming: false,
        }
    }

    fn connect(&mut self) -> Result<(), CameraError> {
        if self.options.absent {
            return Err(CameraError::Unavailable(self.config.device.clone()));
        }
        if self.options.deny {
            return Err(CameraError::Denied(self.config.device.clone()));
        }
        if self.options.fail {
            return Err(CameraError::StreamStart(format!(
                "{} refused to stream",
                self.config.device
            )));
        }
        let lens = self.options.facing.unwrap_or(Facing::Environment);
        if lens != self.config.facing {
            log::warn!(
                "CameraStream: {} has no {:?} camera, using {:?}",
                self.config.device,
                self.config.facing,
                lens
            );
        }
        self.streaming = true;
        log::info!(
            "CameraStream: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (
            self.options.width.unwrap_or(self.config.width),
            self.options.height.unwrap_or(self.config.height),
        )
    }

    fn grab_frame(&mut self, width: u32, height: u32) -> Result<RgbImage> {
        if !self.streaming {
            return Err(anyhow!("synthetic camera not streaming"));
        }
        self.frame_count += 1;
        let tint = (self.frame_count % 256) as u8;
        // Grey wall with a grid of darker "holds".
        Ok(RgbImage::from_fn(width, height, |x, y| {
            if (x / 40 + y / 40) % 5 == 0 && x % 40 > 10 && y % 40 > 10 {
                image::Rgb([120, 60u8.wrapping_add(tint), 40])
            } else {
                image::Rgb([200, 200, 196])
            }
        }))
    }

    fn stop(&mut self) {
        self.streaming = false;
    }
}

// ----------------------------------------------------------------------------
// V4L2 device camera
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceCameraState>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "camera-v4l2")]
#[ouroboros::self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            state: None,
            active_width: 0,
            active_height: 0,
        }
    }

    fn connect(&mut self) -> Result<(), CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = self.config.device.clone();
        let mut device = v4l::Device::with_path(&device_path).map_err(|err| match err.kind() {
            std::io::ErrorKind::PermissionDenied => CameraError::Denied(device_path.clone()),
            std::io::ErrorKind::NotFound => CameraError::Unavailable(device_path.clone()),
            _ => CameraError::StreamStart(format!("open {}: {}", device_path, err)),
        })?;
        let mut format = device
            .format()
            .map_err(|err| CameraError::StreamStart(format!("read format: {}", err)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraStream: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device.format().map_err(|err| {
                    CameraError::StreamStart(format!("read format after set failure: {}", err))
                })?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(CameraError::StreamStart(format!(
                "{} does not offer RGB3 frames",
                device_path
            )));
        }
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceCameraStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| CameraError::StreamStart(format!("create buffer stream: {}", err)))?;
        self.state = Some(state);

        log::info!(
            "CameraStream: connected to {} ({}x{})",
            device_path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    fn grab_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height) = (self.active_width, self.active_height);
        let state = self.state.as_mut().context("camera device not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture camera frame")?;
            Ok(buf.to_vec())
        })?;
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() < expected {
            return Err(anyhow!(
                "camera frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        RgbImage::from_raw(width, height, pixels[..expected].to_vec())
            .ok_or_else(|| anyhow!("camera frame does not fit {}x{}", width, height))
    }

    fn stop(&mut self) {
        self.state = None;
    }
}
