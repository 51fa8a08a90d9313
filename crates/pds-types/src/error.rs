//! Error types for the waveform data model.

use thiserror::Error;

/// Errors raised by waveform, waveform-set and map construction or access.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A waveform set must hold at least one waveform.
    #[error("A waveform set must contain at least one waveform")]
    EmptyWaveformSet,

    /// Waveforms within one set must share their number of samples.
    #[error("Waveform #{index} has {actual} samples, expected {expected}")]
    NonHomogeneousLength {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// A waveform needs at least two samples.
    #[error("A waveform needs at least 2 samples, got {0}")]
    TooFewSamples(usize),

    /// The time offset leaves fewer than two usable samples.
    #[error("Time offset {offset} must belong to [0, {max}]")]
    InvalidTimeOffset { offset: usize, max: usize },

    /// An analysis with this label already exists and overwriting was not requested.
    #[error("There is already an analysis labelled '{0}'; set overwrite to replace it")]
    DuplicateAnalysis(String),

    /// `get_analysis()` was called on a waveform without analyses.
    #[error("The waveform has not been analysed yet")]
    NotAnalysed,

    /// The requested analysis label does not exist.
    #[error("There is no analysis labelled '{0}'")]
    AnalysisNotFound(String),

    /// Analysis windows are not well-formed sub-intervals of the waveform.
    #[error("Invalid {window} window: {message}")]
    InvalidWindow {
        window: &'static str,
        message: String,
    },

    /// Invalid peak description.
    #[error("Invalid peak: {0}")]
    InvalidPeak(String),

    /// Invalid baseline statistics.
    #[error("Invalid baseline range: min ({min}) must be smaller than max ({max})")]
    InvalidBaselineRange { min: f64, max: f64 },

    /// A mean-waveform selection produced no waveform.
    #[error("No waveform was selected for averaging")]
    EmptySelection,

    /// Two sets cannot be merged because their waveform lengths differ.
    #[error("Cannot merge a set of {actual}-sample waveforms into a set of {expected}-sample waveforms")]
    IncompatibleWaveformSet { expected: usize, actual: usize },

    /// Map shape violation.
    #[error("Invalid map shape: {0}")]
    InvalidMapShape(String),
}

/// Result type for data-model operations.
pub type TypesResult<T> = Result<T, TypesError>;
