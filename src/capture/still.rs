//! Still images submitted for detection.
//!
//! A `StillImage` carries the encoded bytes that go to the detection service and a
//! displayable URL for the same bytes. Camera snapshots are JPEG-encoded exactly once;
//! the data URL is built from those bytes, so display and payload are pixel-identical.
//! Uploaded files are wrapped without re-encoding.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use url::Url;

/// JPEG quality for camera snapshots (0-100).
pub const SNAPSHOT_JPEG_QUALITY: u8 = 92;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StillOrigin {
    Camera,
    Upload,
}

#[derive(Clone, Debug)]
pub struct StillImage {
    bytes: Vec<u8>,
    content_type: &'static str,
    file_name: String,
    display_url: String,
    width: u32,
    height: u32,
    origin: StillOrigin,
}

impl StillImage {
    /// Encode a camera frame as JPEG and derive the display URL from the same bytes.
    pub fn from_camera_frame(frame: &RgbImage) -> Result<Self> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot encode an empty camera frame"));
        }
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, SNAPSHOT_JPEG_QUALITY)
            .encode_image(frame)
            .context("encode camera snapshot")?;
        let content_type = ImageFormat::Jpeg.to_mime_type();
        let display_url = data_url(content_type, &bytes);
        Ok(Self {
            bytes,
            content_type,
            file_name: "image.jpg".to_string(),
            display_url,
            width,
            height,
            origin: StillOrigin::Camera,
        })
    }

    /// Wrap a user-selected image file. The bytes are submitted as-is.
    pub fn from_upload(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read upload {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("{} is empty", path.display()));
        }
        let format = image::guess_format(&bytes)
            .with_context(|| format!("{} is not a recognised image", path.display()))?;
        let (width, height) = image::ImageReader::with_format(Cursor::new(&bytes), format)
            .into_dimensions()
            .with_context(|| format!("read dimensions of {}", path.display()))?;
        let absolute = path
            .canonicalize()
            .with_context(|| format!("resolve {}", path.display()))?;
        let display_url = Url::from_file_path(&absolute)
            .map_err(|_| anyhow!("{} cannot be expressed as a file URL", absolute.display()))?
            .to_string();
        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        Ok(Self {
            bytes,
            content_type: format.to_mime_type(),
            file_name: format!("image.{}", extension),
            display_url,
            width,
            height,
            origin: StillOrigin::Upload,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        self.content_type
    }

    /// File name used for the multipart upload field.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    /// Natural (source) pixel dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn origin(&self) -> StillOrigin {
        self.origin
    }

    /// SHA-256 of the payload, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, base64::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn camera_snapshot_url_wraps_the_submitted_bytes() -> Result<()> {
        let frame = RgbImage::from_pixel(32, 16, image::Rgb([10, 200, 30]));
        let still = StillImage::from_camera_frame(&frame)?;
        assert_eq!(still.content_type(), "image/jpeg");
        assert_eq!(still.dimensions(), (32, 16));
        assert_eq!(still.origin(), StillOrigin::Camera);

        let encoded = still
            .display_url()
            .strip_prefix("data:image/jpeg;base64,")
            .expect("jpeg data url");
        assert_eq!(base64::decode(encoded)?, still.bytes());
        Ok(())
    }

    #[test]
    fn upload_keeps_original_bytes() -> Result<()> {
        let frame = RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]));
        let mut png = Vec::new();
        frame.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut file = tempfile::Builder::new().suffix(".png").tempfile()?;
        file.write_all(&png)?;

        let still = StillImage::from_upload(file.path())?;
        assert_eq!(still.bytes(), png.as_slice());
        assert_eq!(still.content_type(), "image/png");
        assert_eq!(still.file_name(), "image.png");
        assert_eq!(still.dimensions(), (8, 6));
        assert!(still.display_url().starts_with("file://"));
        Ok(())
    }

    #[test]
    fn upload_rejects_empty_and_non_image_files() -> Result<()> {
        let empty = tempfile::NamedTempFile::new()?;
        assert!(StillImage::from_upload(empty.path()).is_err());

        let mut text = tempfile::NamedTempFile::new()?;
        text.write_all(b"route notes, not a photo")?;
        assert!(StillImage::from_upload(text.path()).is_err());
        Ok(())
    }
}
