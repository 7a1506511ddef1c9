//! Upload validation: MIME allow-list and size ceiling.

use std::path::Path;

use crate::error::IntakeError;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_ALLOWED_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Accepted types and maximum size for an upload candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub allowed_types: Vec<String>,
    pub max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl UploadLimits {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Check a candidate's declared type and length.
    ///
    /// Size is checked first, so an oversized file is `TooLarge` whatever
    /// its type.
    pub fn check(&self, mime: &str, len: u64) -> Result<(), IntakeError> {
        if len > self.max_bytes {
            return Err(IntakeError::TooLarge {
                len,
                max: self.max_bytes,
            });
        }

        let essence = normalize_mime(mime);
        if !self.allowed_types.iter().any(|t| *t == essence) {
            return Err(IntakeError::InvalidType {
                mime: mime.to_string(),
            });
        }

        Ok(())
    }
}

/// Lower-cased MIME type without parameters: `"Image/PNG; q=1"` -> `"image/png"`.
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// MIME type for a local file, from its extension. Unknown extensions map
/// to `application/octet-stream`, which validation rejects.
pub fn mime_from_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
