//! Helpers shared by the HTTP tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use attachment_inspector::{AnalysisError, DataUri, ImageDescriber, IntakeController, IntakeSnapshot};
use axum::body::Body;
use axum::http::{header, Request};

pub const BOUNDARY: &str = "inspector-test-boundary";

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    buf
}

/// `multipart/form-data` body with one file field named `image`.
pub fn upload_request(filename: &str, mime: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    multipart_request(body)
}

pub fn multipart_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Wait for the current upload to stop processing.
pub async fn settle(controller: &IntakeController) -> IntakeSnapshot {
    let mut events = controller.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        events.wait_for(|s| !s.is_processing),
    )
    .await
    .expect("upload never settled")
    .unwrap()
    .clone();
    snapshot
}

/// Describes every image with the same text, or always fails.
pub struct StubDescriber(pub Option<&'static str>);

#[async_trait]
impl ImageDescriber for StubDescriber {
    async fn describe(&self, _image: &DataUri) -> Result<String, AnalysisError> {
        self.0.map(str::to_string).ok_or(AnalysisError::Api {
            status: 500,
            body: "internal".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}
