//! Shared fixtures for the unit tests: in-memory images and scripted
//! describers standing in for the remote model.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::analysis::{AnalysisError, ImageDescriber};
use crate::encode::{encode_data_uri, DataUri};
use crate::intake::{IntakeController, IntakeSnapshot, Phase, UploadCandidate};

// =========================================================================
// Images
// =========================================================================

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, image::ImageOutputFormat::Png)
}

pub fn image_bytes(width: u32, height: u32, format: image::ImageOutputFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn encoded_image(
    width: u32,
    height: u32,
    format: image::ImageOutputFormat,
    mime: &str,
) -> DataUri {
    encode_data_uri(&image_bytes(width, height, format), mime)
}

pub fn png_candidate(name: &str, width: u32, height: u32) -> (UploadCandidate, DataUri) {
    let bytes = png_bytes(width, height);
    let uri = encode_data_uri(&bytes, "image/png");
    (UploadCandidate::from_bytes(name, "image/png", bytes), uri)
}

// =========================================================================
// Describers
// =========================================================================

/// Answers every call the same way.
pub struct FixedDescriber {
    answer: Option<String>,
}

impl FixedDescriber {
    pub fn ok(text: &str) -> Self {
        Self {
            answer: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { answer: None }
    }
}

#[async_trait]
impl ImageDescriber for FixedDescriber {
    async fn describe(&self, _image: &DataUri) -> Result<String, AnalysisError> {
        self.answer.clone().ok_or(AnalysisError::Api {
            status: 503,
            body: "model overloaded".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Holds the answer for a specific image until the test releases it.
/// Images without a gate are described immediately.
#[derive(Default)]
pub struct GatedDescriber {
    gates: Mutex<HashMap<String, oneshot::Receiver<Result<String, String>>>>,
}

impl GatedDescriber {
    /// Gate calls for `image`. Send `Ok(text)` or `Err(reason)` to release.
    pub fn hold(&self, image: &DataUri) -> oneshot::Sender<Result<String, String>> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .unwrap()
            .insert(image.as_str().to_string(), rx);
        tx
    }
}

#[async_trait]
impl ImageDescriber for GatedDescriber {
    async fn describe(&self, image: &DataUri) -> Result<String, AnalysisError> {
        let gate = self.gates.lock().unwrap().remove(image.as_str());
        let Some(gate) = gate else {
            return Ok("described".to_string());
        };
        match gate.await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(reason)) => Err(AnalysisError::Api {
                status: 500,
                body: reason,
            }),
            Err(_) => Err(AnalysisError::Empty),
        }
    }

    fn model_name(&self) -> &str {
        "gated"
    }
}

// =========================================================================
// Waiting on the controller
// =========================================================================

/// Wait until the controller publishes `phase` for `generation`.
pub async fn wait_for_phase(
    controller: &IntakeController,
    generation: u64,
    phase: Phase,
) -> IntakeSnapshot {
    let mut events = controller.subscribe();
    let waited = tokio::time::timeout(
        Duration::from_secs(5),
        events.wait_for(|s| s.generation == generation && s.phase == phase),
    )
    .await
    .unwrap_or_else(|_| panic!("generation {generation} never reached {phase:?}"));
    let snapshot = waited.unwrap().clone();
    snapshot
}
