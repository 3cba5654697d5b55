//! HTTP client for the remote hold-detection service.
//!
//! The client is responsible for:
//! - Building `POST {base}/detect?confidence=..&overlap=..&mode=..` requests
//! - Sending the still as a single multipart `file` field
//! - Normalizing responses into `DetectionResponse` / `DetectionError`
//!
//! Exactly one request is sent per call. No retries, no coalescing.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::time::Duration;
use url::Url;

use super::response::{parse_rejection, parse_success_body, AnnotatedImage};
use super::{DetectionError, DetectionResponse, DetectionService};
use crate::capture::StillImage;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";
pub const DEFAULT_OVERLAP: f32 = 0.30;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;

/// What the service should render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Predictions only.
    Json,
    /// Annotated image only.
    Image,
    /// Predictions plus annotated image.
    #[default]
    Both,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Json => "json",
            RenderMode::Image => "image",
            RenderMode::Both => "both",
        }
    }
}

/// Configuration injected into the client at construction.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Service base URL, e.g. "http://localhost:5001".
    pub base_url: String,
    /// Overlap (NMS) threshold sent with every request.
    pub overlap: f32,
    pub mode: RenderMode,
    pub timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            overlap: DEFAULT_OVERLAP,
            mode: RenderMode::Both,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

pub struct DetectionClient {
    config: DetectorConfig,
    endpoint: Url,
    agent: ureq::Agent,
}

impl DetectionClient {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("parse detection base url {}", config.base_url))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detection scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let mut endpoint = base;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("detection base url cannot carry a path"))?
            .pop_if_empty()
            .push("detect");
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            config,
            endpoint,
            agent,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Full request URL for the given thresholds.
    pub fn request_url(&self, confidence: f32, overlap: f32) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("confidence", &format!("{:.2}", confidence))
            .append_pair("overlap", &format!("{:.2}", overlap))
            .append_pair("mode", self.config.mode.as_str());
        url
    }

    /// Submit a still for detection.
    pub fn detect(
        &self,
        image: &StillImage,
        confidence: f32,
        overlap: f32,
    ) -> Result<DetectionResponse, DetectionError> {
        validate_request(image, confidence, overlap)?;

        let url = self.request_url(confidence, overlap);
        let boundary = multipart_boundary(image.bytes());
        let body = multipart_body(&boundary, image);
        log::debug!("POST {} ({} bytes)", url, body.len());

        let result = self
            .agent
            .post(url.as_str())
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .set("Accept", "application/json")
            .send_bytes(&body);

        match result {
            Ok(response) => {
                let body = read_body(response).map_err(|err| {
                    DetectionError::Network(format!("read detection response: {:#}", err))
                })?;
                let parsed = parse_success_body(&body)?;
                log::info!(
                    "detection returned {} predictions{}",
                    parsed.predictions.len(),
                    if parsed.annotated.is_some() {
                        " with annotated image"
                    } else {
                        ""
                    }
                );
                Ok(parsed)
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = read_body(response).unwrap_or_default();
                let err = parse_rejection(status, &body);
                log::warn!("detection service rejected request ({}): {}", status, err);
                Err(err)
            }
            Err(ureq::Error::Transport(transport)) => {
                log::warn!("detection service unreachable: {}", transport);
                Err(DetectionError::Network(transport.to_string()))
            }
        }
    }

    /// Fetch the bytes of a server-rendered image.
    pub fn fetch_annotated(&self, annotated: &AnnotatedImage) -> Result<Vec<u8>> {
        match annotated {
            AnnotatedImage::Inline { bytes, .. } => Ok(bytes.clone()),
            AnnotatedImage::Hosted(url) => {
                let response = self
                    .agent
                    .get(url.as_str())
                    .call()
                    .with_context(|| format!("fetch annotated image from {}", url))?;
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .take(MAX_RESPONSE_BYTES)
                    .read_to_end(&mut bytes)
                    .context("read annotated image")?;
                if bytes.is_empty() {
                    return Err(anyhow!("empty annotated image"));
                }
                Ok(bytes)
            }
        }
    }
}

impl DetectionService for DetectionClient {
    fn detect(
        &self,
        image: &StillImage,
        confidence: f32,
        overlap: f32,
    ) -> Result<DetectionResponse, DetectionError> {
        DetectionClient::detect(self, image, confidence, overlap)
    }
}

fn validate_request(image: &StillImage, confidence: f32, overlap: f32) -> Result<(), DetectionError> {
    if image.bytes().is_empty() {
        return Err(DetectionError::InvalidRequest("image is empty".to_string()));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(DetectionError::InvalidRequest(format!(
            "confidence {} outside 0.0..=1.0",
            confidence
        )));
    }
    if !(0.0..=1.0).contains(&overlap) {
        return Err(DetectionError::InvalidRequest(format!(
            "overlap {} outside 0.0..=1.0",
            overlap
        )));
    }
    Ok(())
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut body)
        .context("read response body")?;
    Ok(body)
}

fn multipart_boundary(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    format!("----climblog{}", hex::encode(&digest[..12]))
}

fn multipart_body(boundary: &str, image: &StillImage) -> Vec<u8> {
    let mut body = Vec::with_capacity(image.bytes().len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            image.file_name()
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", image.content_type()).as_bytes());
    body.extend_from_slice(image.bytes());
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn still() -> StillImage {
        StillImage::from_camera_frame(&RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9])))
            .expect("encode still")
    }

    #[test]
    fn request_url_carries_thresholds_and_mode() -> Result<()> {
        let client = DetectionClient::new(DetectorConfig {
            base_url: "http://detector.local:5001/api/".to_string(),
            ..DetectorConfig::default()
        })?;
        assert_eq!(
            client.request_url(0.35, 0.3).as_str(),
            "http://detector.local:5001/api/detect?confidence=0.35&overlap=0.30&mode=both"
        );
        Ok(())
    }

    #[test]
    fn rejects_non_http_base_urls() {
        assert!(DetectionClient::new(DetectorConfig {
            base_url: "ftp://detector.local".to_string(),
            ..DetectorConfig::default()
        })
        .is_err());
    }

    #[test]
    fn invalid_inputs_fail_before_any_request() -> Result<()> {
        // Nothing listens on the discard port; validation must win.
        let client = DetectionClient::new(DetectorConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..DetectorConfig::default()
        })?;
        let image = still();
        assert!(matches!(
            client.detect(&image, 1.5, 0.3),
            Err(DetectionError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.detect(&image, 0.35, -0.1),
            Err(DetectionError::InvalidRequest(_))
        ));
        Ok(())
    }

    #[test]
    fn multipart_body_wraps_payload_once() {
        let image = still();
        let boundary = multipart_boundary(image.bytes());
        let body = multipart_body(&boundary, &image);
        let head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"image.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
            boundary
        );
        assert!(body.starts_with(head.as_bytes()));
        assert!(body.ends_with(format!("\r\n--{}--\r\n", boundary).as_bytes()));
        assert_eq!(
            body.len(),
            head.len() + image.bytes().len() + format!("\r\n--{}--\r\n", boundary).len()
        );
    }
}
