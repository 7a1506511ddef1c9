//! File details derived from an accepted upload.
//!
//! Dimensions come from a full decode of the encoded image, the way a
//! browser only reports them once the image has loaded. Decoding runs on the
//! blocking pool so it never stalls the intake tasks.

use std::fmt;
use std::io::Cursor;

use image::GenericImageView;
use serde::Serialize;

use crate::encode::DataUri;
use crate::error::IntakeError;

/// Intrinsic pixel size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} px", self.width, self.height)
    }
}

/// What the inspector shows about an accepted file. Built once per
/// candidate and replaced wholesale by the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDetails {
    pub name: String,
    pub size: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub dimensions: String,
}

impl FileDetails {
    pub fn new(name: &str, len: u64, mime_type: &str, dimensions: Dimensions) -> Self {
        Self {
            name: name.to_string(),
            size: format_size(len),
            mime_type: mime_type.to_string(),
            dimensions: dimensions.to_string(),
        }
    }
}

/// Kilobytes with two decimals: `1536` -> `"1.50 KB"`.
pub fn format_size(len: u64) -> String {
    format!("{:.2} KB", len as f64 / 1024.0)
}

/// Decode the image held by `uri` and report its pixel size.
pub async fn probe_dimensions(uri: &DataUri) -> Result<Dimensions, IntakeError> {
    let uri = uri.clone();
    tokio::task::spawn_blocking(move || decode_dimensions(&uri))
        .await
        .map_err(|e| IntakeError::DecodeError(format!("decoder task failed: {e}")))?
}

fn decode_dimensions(uri: &DataUri) -> Result<Dimensions, IntakeError> {
    let (_, bytes) = uri.decode()?;
    // The declared type only gated the upload; the bytes pick the decoder.
    let img = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| IntakeError::DecodeError(e.to_string()))?
        .decode()
        .map_err(|e| IntakeError::DecodeError(e.to_string()))?;
    let (width, height) = img.dimensions();
    Ok(Dimensions { width, height })
}
