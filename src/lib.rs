//! Attachment inspector: accept an uploaded image, work out its file
//! details, and ask a multimodal model to describe it.
//!
//! The pipeline for one upload is validate -> read and encode as a data URI
//! -> decode for dimensions -> remote analysis, driven by
//! [`intake::IntakeController`]. Everything else is surface: an axum server
//! in [`server`] and the `inspect` command in the binary.

pub mod analysis;
pub mod config;
pub mod encode;
pub mod error;
pub mod intake;
pub mod metadata;
pub mod server;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use analysis::{AnalysisError, GeminiDescriber, ImageDescriber};
pub use config::Config;
pub use encode::{encode_data_uri, DataUri};
pub use error::IntakeError;
pub use intake::{IntakeController, IntakeSettings, IntakeSnapshot, IntakeState, Phase, UploadCandidate};
pub use metadata::{Dimensions, FileDetails};
pub use validate::UploadLimits;
