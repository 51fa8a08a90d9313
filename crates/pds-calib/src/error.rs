//! Error types for calibration operations.

use pds_types::TypesError;
use thiserror::Error;

/// Errors that can occur while building or fitting calibration data.
#[derive(Debug, Error)]
pub enum CalibError {
    /// Data-model error.
    #[error(transparent)]
    Types(#[from] TypesError),

    /// A histogram needs at least two bins.
    #[error("The number of bins must be greater than 1, got {0}")]
    InvalidBinsNumber(usize),

    /// Input length mismatch.
    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A bin's index list disagrees with its count.
    #[error("Bin {bin} counts {count} entries but records {indices} indices")]
    ProvenanceMismatch { bin: usize, count: u64, indices: usize },

    /// Histogram domain is not a finite, increasing interval.
    #[error("Invalid domain [{0}, {1}]")]
    InvalidDomain(f64, f64),

    /// Histogram edges are not strictly increasing.
    #[error("Histogram edges must be strictly increasing")]
    NonMonotonicEdges,

    /// Variable not supported for calibration histograms yet.
    #[error("Calibration histograms over '{0}' are not implemented")]
    UnsupportedVariable(String),

    /// A channel set holds more than one (endpoint, channel).
    #[error("Expected a single (endpoint, channel), found {0}")]
    NonHomogeneousChannel(String),

    /// Invalid configuration parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Too few data points for the requested fit.
    #[error("Insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Histogram provenance no longer matches the waveform set.
    #[error("The histogram was not built from the current contents of this waveform set")]
    StaleHistogram,
}

/// Result type for calibration operations.
pub type CalibResult<T> = Result<T, CalibError>;
