mod client;
mod response;

pub use client::{DetectionClient, DetectorConfig, RenderMode, DEFAULT_BASE_URL, DEFAULT_OVERLAP};
pub use response::{
    parse_rejection, parse_success_body, AnnotatedImage, DetectionError, DetectionResponse,
    GENERIC_REJECTION,
};

use crate::capture::StillImage;

/// Detection service seam.
///
/// `DetectionClient` is the HTTP implementation. Sessions are generic over this
/// trait so the capture flow can run against any backend that returns the same
/// normalized response.
pub trait DetectionService {
    /// Submit one still. `confidence` and `overlap` are in 0.0..=1.0.
    fn detect(
        &self,
        image: &StillImage,
        confidence: f32,
        overlap: f32,
    ) -> Result<DetectionResponse, DetectionError>;
}

impl<T: DetectionService + ?Sized> DetectionService for &T {
    fn detect(
        &self,
        image: &StillImage,
        confidence: f32,
        overlap: f32,
    ) -> Result<DetectionResponse, DetectionError> {
        (**self).detect(image, confidence, overlap)
    }
}
