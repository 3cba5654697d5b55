use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::filter::Summary;
use crate::prediction::{Prediction, WirePrediction};

/// Shown when the service rejects a request without saying why.
pub const GENERIC_REJECTION: &str = "detection failed";

/// Detection failures. All are recoverable: the caller keeps its prior image and
/// predictions and may retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("invalid detection request: {0}")]
    InvalidRequest(String),
    #[error("detection service unreachable: {0}")]
    Network(String),
    /// Non-2xx response; carries the service's own reason.
    #[error("{0}")]
    ServiceRejected(String),
    #[error("malformed detection response: {0}")]
    MalformedResponse(String),
}

/// Normalized result of one detection call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResponse {
    /// May be empty: "nothing detected" is a valid outcome.
    pub predictions: Vec<Prediction>,
    /// Server-rendered image (data URL or hosted URL).
    pub annotated: Option<String>,
    /// Summary computed by the service over its unfiltered predictions.
    pub summary: Option<Summary>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    predictions: Vec<WirePrediction>,
    #[serde(default)]
    annotated: Option<String>,
    #[serde(default)]
    summary: Option<WireSummary>,
}

#[derive(Debug, Deserialize)]
struct WireSummary {
    total: usize,
    #[serde(default)]
    by_class: Vec<(String, usize)>,
}

/// Parse a 2xx response body. Anything but a JSON object is malformed.
pub fn parse_success_body(body: &[u8]) -> Result<DetectionResponse, DetectionError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| DetectionError::MalformedResponse(err.to_string()))?;
    if !value.is_object() {
        return Err(DetectionError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let wire: WireResponse = serde_json::from_value(value)
        .map_err(|err| DetectionError::MalformedResponse(err.to_string()))?;
    let predictions = wire
        .predictions
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            Prediction::try_from(p).map_err(|err| {
                DetectionError::MalformedResponse(format!("prediction {}: {}", i, err))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DetectionResponse {
        predictions,
        annotated: wire.annotated.filter(|url| !url.trim().is_empty()),
        summary: wire.summary.map(|summary| Summary {
            total: summary.total,
            by_class: summary.by_class,
        }),
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Turn a non-2xx response into `ServiceRejected`, preferring `detail`, then `error`.
pub fn parse_rejection(status: u16, body: &[u8]) -> DetectionError {
    let reason = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error"]
                .iter()
                .find_map(|key| match value.get(*key) {
                    Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
                        Some(text.clone())
                    }
                    Some(serde_json::Value::Null) | None => None,
                    Some(serde_json::Value::String(_)) => None,
                    Some(other) => Some(other.to_string()),
                })
        });
    match reason {
        Some(reason) => DetectionError::ServiceRejected(reason),
        None => {
            log::debug!("detection service returned {} without a reason", status);
            DetectionError::ServiceRejected(format!("{} (HTTP {})", GENERIC_REJECTION, status))
        }
    }
}

/// Server-rendered image, decoded from the `annotated` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotatedImage {
    Inline { mime: String, bytes: Vec<u8> },
    Hosted(Url),
}

impl AnnotatedImage {
    pub fn parse(value: &str) -> Result<Self> {
        if let Some(rest) = value.strip_prefix("data:") {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("data url is missing its payload"))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| anyhow!("only base64 data urls are supported"))?;
            let bytes = base64::decode(payload.trim()).context("decode annotated image")?;
            return Ok(Self::Inline {
                mime: if mime.is_empty() {
                    "application/octet-stream".to_string()
                } else {
                    mime.to_string()
                },
                bytes,
            });
        }
        let url = Url::parse(value).context("parse annotated image url")?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Hosted(url)),
            other => Err(anyhow!(
                "unsupported annotated image scheme '{}'; expected data, http(s)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_predictions_annotation_and_summary() -> Result<()> {
        let body = r#"{
            "predictions": [
                {"x": 100, "y": 50, "width": 40, "height": 20, "class": "hold", "confidence": 0.9,
                 "class_id": 0, "detection_id": "a1"}
            ],
            "summary": {"total": 1, "by_class": [["hold", 1]]},
            "annotated": "data:image/png;base64,iVBORw0KGgo="
        }"#;
        let response = parse_success_body(body.as_bytes())?;
        assert_eq!(response.predictions.len(), 1);
        assert_eq!(response.predictions[0].class_name, "hold");
        assert_eq!(
            response.summary,
            Some(Summary {
                total: 1,
                by_class: vec![("hold".to_string(), 1)]
            })
        );
        assert!(response.annotated.is_some());
        Ok(())
    }

    #[test]
    fn missing_predictions_means_nothing_detected() -> Result<()> {
        let response = parse_success_body(b"{}")?;
        assert!(response.predictions.is_empty());
        assert!(response.annotated.is_none());
        Ok(())
    }

    #[test]
    fn blank_annotation_is_treated_as_absent() -> Result<()> {
        let response = parse_success_body(br#"{"predictions": [], "annotated": ""}"#)?;
        assert!(response.annotated.is_none());
        Ok(())
    }

    #[test]
    fn unparseable_or_invalid_bodies_are_malformed() {
        assert!(matches!(
            parse_success_body(b"<html>oops</html>"),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_success_body(b"[]"),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_success_body(br#"[[], null, {}]"#),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_success_body(b"null"),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_success_body(b"{\"predictions\": [], \"note\": \"\xff\xfe\"}"),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_success_body(
                br#"{"predictions": [{"x": 1, "y": 1, "width": 0, "height": 2, "class": "hold", "confidence": 0.5}]}"#
            ),
            Err(DetectionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejection_prefers_detail_then_error() {
        assert_eq!(
            parse_rejection(500, br#"{"error": "model unavailable"}"#),
            DetectionError::ServiceRejected("model unavailable".to_string())
        );
        assert_eq!(
            parse_rejection(400, br#"{"detail": "Empty file", "error": "ignored"}"#),
            DetectionError::ServiceRejected("Empty file".to_string())
        );
        assert_eq!(
            parse_rejection(422, br#"{"detail": [{"msg": "field required"}]}"#),
            DetectionError::ServiceRejected(r#"[{"msg":"field required"}]"#.to_string())
        );
        assert_eq!(
            parse_rejection(502, b"Bad Gateway"),
            DetectionError::ServiceRejected("detection failed (HTTP 502)".to_string())
        );
    }

    #[test]
    fn annotated_data_url_decodes() -> Result<()> {
        let parsed = AnnotatedImage::parse("data:image/png;base64,aGVsbG8=")?;
        assert_eq!(
            parsed,
            AnnotatedImage::Inline {
                mime: "image/png".to_string(),
                bytes: b"hello".to_vec()
            }
        );
        assert!(matches!(
            AnnotatedImage::parse("https://cdn.example.com/a.png")?,
            AnnotatedImage::Hosted(_)
        ));
        assert!(AnnotatedImage::parse("ftp://example.com/a.png").is_err());
        assert!(AnnotatedImage::parse("data:image/png,raw").is_err());
        Ok(())
    }
}
