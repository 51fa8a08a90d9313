//! # pds-calib
//!
//! Calibration engine for photon-detector waveforms.
//!
//! This crate turns waveform sets into single-photoelectron calibrations:
//!
//! - **Analysers**: pluggable per-waveform feature extraction (baseline, integral, amplitude, peaks)
//! - **Peak finding**: plateau-aware local maxima with prominence and width
//! - **Calibration histograms**: binned features with per-bin waveform provenance
//! - **Least squares**: Levenberg-Marquardt curve fitting
//! - **Peak fitting**: multi-peak Gaussian fits with adaptive peak search
//! - **Channel grids**: per-channel partitions arranged on the physical map
//! - **Gain/SNR**: derivation and export records

pub mod error;
pub mod analysis;
pub mod peaks;
pub mod histogram;
pub mod fit;
pub mod fit_peaks;
pub mod channel_ws;
pub mod grid;
pub mod gain;

pub use error::{CalibError, CalibResult};
pub use analysis::{Analyser, AnalyserKind, BasicAnalyser, StubAnalyser};
pub use peaks::{find_peaks, PeakSearch, Peaks};
pub use histogram::{CalibrationHistogram, GaussianFitsParameters, HistogramSpec};
pub use fit::{curve_fit, FitOutcome, LmOptions};
pub use fit_peaks::{fit_peaks, FitType, PeakFitConfig};
pub use channel_ws::ChannelWs;
pub use grid::{clusterize, ChannelPartition, ChannelWsGrid};
pub use gain::{collect_gain_and_snr, gain_and_snr, CalibrationRecord, ChannelGain, GainSnr};
