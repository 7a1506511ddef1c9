//! Data URI encoding of uploaded files.
//!
//! The same `data:<mime>;base64,<payload>` string is the preview source and
//! the payload handed to the analysis client.

use std::fmt;
use std::io;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::IntakeError;

const BASE64_MARKER: &str = ";base64";

/// A `data:` URI holding a base64 payload. Clones share the underlying string.
#[derive(Clone, PartialEq, Eq)]
pub struct DataUri(Arc<str>);

impl DataUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Declared MIME type, or `None` when the string is not a base64 data URI.
    pub fn mime(&self) -> Option<&str> {
        self.split().map(|(mime, _)| mime)
    }

    /// The base64 text after the comma.
    pub fn payload(&self) -> Option<&str> {
        self.split().map(|(_, payload)| payload)
    }

    /// Parse back into the MIME type and the original bytes.
    pub fn decode(&self) -> Result<(String, Vec<u8>), IntakeError> {
        let (mime, payload) = self
            .split()
            .ok_or_else(|| IntakeError::DecodeError("not a base64 data URI".to_string()))?;
        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| IntakeError::DecodeError(format!("invalid base64 payload: {e}")))?;
        Ok((mime.to_string(), bytes))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        DataUri(raw.into())
    }

    fn split(&self) -> Option<(&str, &str)> {
        let (header, payload) = self.0.strip_prefix("data:")?.split_once(',')?;
        let mime = header.strip_suffix(BASE64_MARKER)?;
        Some((mime, payload))
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Payloads run to megabytes; keep debug output readable.
impl fmt::Debug for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataUri")
            .field("mime", &self.mime())
            .field("len", &self.0.len())
            .finish()
    }
}

/// Encode bytes as a data URI. Deterministic for identical input.
pub fn encode_data_uri(bytes: &[u8], mime: &str) -> DataUri {
    let payload = general_purpose::STANDARD.encode(bytes);
    DataUri(format!("data:{mime}{BASE64_MARKER},{payload}").into())
}

/// Read exactly `declared_len` bytes from `source` and encode them.
///
/// A failing source, or one that yields a different number of bytes than
/// declared, is a `ReadError`.
pub async fn read_data_uri<R>(source: R, mime: &str, declared_len: u64) -> Result<DataUri, IntakeError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::with_capacity(usize::try_from(declared_len).unwrap_or(0));
    source
        .take(declared_len.saturating_add(1))
        .read_to_end(&mut bytes)
        .await?;

    let read = bytes.len() as u64;
    if read < declared_len {
        return Err(IntakeError::ReadError(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {read} of {declared_len} bytes"),
        )));
    }
    if read > declared_len {
        return Err(IntakeError::ReadError(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("source is longer than the declared {declared_len} bytes"),
        )));
    }

    Ok(encode_data_uri(&bytes, mime))
}
