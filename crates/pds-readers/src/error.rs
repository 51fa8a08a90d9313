//! Error types for reading waveform files.

use pds_types::TypesError;
use thiserror::Error;

/// Errors that can occur while turning a file into a `WaveformSet`.
#[derive(Debug, Error)]
pub enum ReadError {
    /// I/O error reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Syntax error in a text dump.
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The text dump has no `time_step_ns = ...` header.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// A record parsed but does not describe a valid waveform.
    #[error("Invalid record at line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: TypesError,
    },

    /// Data-model violation over the whole file (empty, ragged lengths).
    #[error(transparent)]
    Types(#[from] TypesError),

    /// No reader handles this file extension.
    #[error("Unsupported file extension: '{0}'")]
    UnsupportedExtension(String),

    /// `read_many` was given no path.
    #[error("No input file was given")]
    NoInputs,
}

impl ReadError {
    /// Syntax error carrying a short preview of the offending input.
    pub(crate) fn syntax(line: usize, err: nom::Err<nom::error::Error<&str>>) -> Self {
        let message = match err {
            nom::Err::Incomplete(_) => "Incomplete input".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let preview: String = e.input.chars().take(20).collect();
                format!("{:?} at '{}'", e.code, preview)
            }
        };
        Self::Syntax { line, message }
    }
}

/// Result type for reader operations.
pub type ReadResult<T> = Result<T, ReadError>;
