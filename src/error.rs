//! Failure taxonomy for one intake attempt.
//!
//! Every variant is terminal for the step that produced it and is never
//! retried. `Display` carries the detail for logs; [`IntakeError::user_message`]
//! is the short text shown to whoever uploaded the file.

use std::time::Duration;

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::metadata::format_size;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("invalid file type: {mime}")]
    InvalidType { mime: String },

    #[error("file is {len} bytes, maximum is {max}")]
    TooLarge { len: u64, max: u64 },

    #[error("read error: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("analysis timed out after {0:?}")]
    AnalysisTimeout(Duration),
}

impl IntakeError {
    /// Message stored in the intake state for this failure.
    pub fn user_message(&self) -> String {
        match self {
            IntakeError::InvalidType { .. } => {
                "Invalid file type. Please upload a PNG, JPG, GIF, or WEBP image.".to_string()
            }
            IntakeError::TooLarge { max, .. } => {
                format!("File is too large. Maximum size is {}.", format_limit(*max))
            }
            IntakeError::ReadError(_) => "Failed to read file.".to_string(),
            IntakeError::DecodeError(_) => {
                "Could not load image to get dimensions. The file might be corrupted.".to_string()
            }
            IntakeError::AnalysisUnavailable(_) => "Failed to analyze image. The AI model might \
                be unavailable or encountered an issue."
                .to_string(),
            IntakeError::AnalysisTimeout(_) => {
                "Image analysis timed out. The AI model took too long to respond.".to_string()
            }
        }
    }

    /// Whether this failure came from the remote analysis step. Those keep
    /// the already computed file details.
    pub fn is_analysis(&self) -> bool {
        matches!(
            self,
            IntakeError::AnalysisUnavailable(_) | IntakeError::AnalysisTimeout(_)
        )
    }
}

fn format_limit(max: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if max >= MIB && max % MIB == 0 {
        format!("{}MB", max / MIB)
    } else {
        format_size(max)
    }
}

impl From<AnalysisError> for IntakeError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Timeout(after) => IntakeError::AnalysisTimeout(after),
            other => IntakeError::AnalysisUnavailable(other.to_string()),
        }
    }
}
