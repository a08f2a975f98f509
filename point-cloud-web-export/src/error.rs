//! Error types for the export pipeline

use thiserror::Error;

/// Export pipeline error type.
///
/// Validation findings are never errors; they land in the
/// [`ValidationReport`](crate::validate::ValidationReport) instead.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Bad tier or mode name, wrong width or shape, non-finite input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Envelope is missing a field its mode requires.
    #[error("Quantization envelope is missing required field '{0}'")]
    MissingField(&'static str),

    /// Envelope mode does not describe the array being decoded.
    #[error("Invalid quantization mode: envelope declares '{found}', array is '{expected}'")]
    InvalidMode { expected: String, found: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    /// Container bytes do not follow the frame layout.
    #[error("Malformed container: {0}")]
    Container(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;
