//! Danmaku error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while decoding or exporting danmaku.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// Malformed segment payload
    #[error("Decode error at byte {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    /// Export format name that is not one of xml/json/csv/txt
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Serialization failure while producing an export
    #[error("Export error: {0}")]
    Export(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DanmakuError {
    /// Create a decode error at the given buffer offset.
    pub fn decode(offset: usize, reason: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an export error.
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Whether this error came from a malformed payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
