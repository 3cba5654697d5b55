//! HTTP behavior of the detection client against an in-process server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

use climblog_capture::capture::{CameraConfig, StillImage};
use climblog_capture::detect::{DetectionClient, DetectionError, DetectorConfig};
use climblog_capture::session::{CaptureSession, SessionConfig};

const SUCCESS_BODY: &str = r#"{
    "predictions": [
        {"x": 100, "y": 50, "width": 40, "height": 20, "class": "hold", "confidence": 0.91},
        {"x": 30, "y": 80, "width": 20, "height": 20, "class": "volume", "confidence": 0.22}
    ],
    "summary": {"total": 2, "by_class": [["hold", 1], ["volume", 1]]},
    "annotated": "data:image/jpeg;base64,/9j/4AAQ"
}"#;

/// Accept one connection, capture the raw request, answer with `status` and `body`.
fn serve_once(status: &'static str, body: &'static [u8]) -> (String, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let request = read_request(&mut stream);
        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        stream.write_all(head.as_bytes()).expect("write head");
        stream.write_all(body).expect("write body");
        let _ = tx.send(request);
    });
    (format!("http://{}", addr), rx)
}

fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    buf
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn client(base_url: String) -> DetectionClient {
    DetectionClient::new(DetectorConfig {
        base_url,
        ..DetectorConfig::default()
    })
    .expect("client")
}

fn still() -> StillImage {
    StillImage::from_camera_frame(&image::RgbImage::from_pixel(
        32,
        24,
        image::Rgb([200, 180, 160]),
    ))
    .expect("encode still")
}

#[test]
fn posts_multipart_file_and_parses_predictions() {
    let (base, requests) = serve_once("200 OK", SUCCESS_BODY.as_bytes());
    let image = still();
    let response = client(base).detect(&image, 0.35, 0.3).expect("detect");

    assert_eq!(response.predictions.len(), 2);
    assert_eq!(response.predictions[0].class_name, "hold");
    assert_eq!(response.predictions[1].confidence, 0.22);
    assert!(response.annotated.is_some());
    assert_eq!(response.summary.map(|s| s.total), Some(2));

    let raw = requests.recv().expect("captured request");
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("POST /detect?confidence=0.35&overlap=0.30&mode=both HTTP/1.1\r\n"));
    assert!(text
        .to_ascii_lowercase()
        .contains("content-type: multipart/form-data; boundary=----climblog"));
    assert!(text.contains("Content-Disposition: form-data; name=\"file\"; filename=\"image.jpg\""));
    assert_eq!(text.matches("name=\"file\"").count(), 1);
    assert!(find(&raw, image.bytes()).is_some());
}

#[test]
fn server_error_surfaces_the_service_reason() {
    let (base, _requests) = serve_once(
        "500 Internal Server Error",
        br#"{"error":"model unavailable"}"#,
    );
    let err = client(base).detect(&still(), 0.35, 0.3).unwrap_err();
    assert_eq!(
        err,
        DetectionError::ServiceRejected("model unavailable".to_string())
    );
    assert_eq!(err.to_string(), "model unavailable");
}

#[test]
fn unparseable_success_body_is_malformed() {
    let (base, _requests) = serve_once("200 OK", b"<html>gateway</html>");
    assert!(matches!(
        client(base).detect(&still(), 0.35, 0.3),
        Err(DetectionError::MalformedResponse(_))
    ));
}

#[test]
fn non_utf8_success_body_is_malformed() {
    let (base, _requests) = serve_once("200 OK", b"{\"predictions\": [], \"x\": \"\xff\xfe\"}");
    assert!(matches!(
        client(base).detect(&still(), 0.35, 0.3),
        Err(DetectionError::MalformedResponse(_))
    ));
}

#[test]
fn json_array_success_body_is_malformed() {
    let (base, _requests) = serve_once("200 OK", b"[]");
    assert!(matches!(
        client(base).detect(&still(), 0.35, 0.3),
        Err(DetectionError::MalformedResponse(_))
    ));
}

#[test]
fn unreachable_service_is_a_network_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    assert!(matches!(
        client(format!("http://127.0.0.1:{}", port)).detect(&still(), 0.35, 0.3),
        Err(DetectionError::Network(_))
    ));
}

#[test]
fn session_keeps_the_still_when_the_service_fails() {
    let (base, _requests) = serve_once(
        "500 Internal Server Error",
        br#"{"error":"model unavailable"}"#,
    );
    let mut session = CaptureSession::new(
        client(base),
        SessionConfig {
            camera: CameraConfig {
                device: "stub://rear?width=48&height=64".to_string(),
                ..CameraConfig::default()
            },
            ..SessionConfig::default()
        },
    );
    let mut picker = || -> Option<std::path::PathBuf> { None };
    session.press_capture(&mut picker);
    session.press_capture(&mut picker);

    assert_eq!(session.error_message(), Some("model unavailable"));
    assert_eq!(session.still().map(StillImage::dimensions), Some((48, 64)));
    assert!(session.has_result());
}
