//! Per-waveform analysis contract and records.
//!
//! An analysis turns the samples of one trace into a [`WfAnaResult`] plus a
//! pass/fail flag. Concrete analysers live downstream and plug in through the
//! object-safe [`WfAnalyser`] trait, so a waveform can hold the output of
//! several analysers at once under distinct labels.

use crate::error::{TypesError, TypesResult};
use crate::units::Nanoseconds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form diagnostics an analyser may hand back to the caller.
pub type AnalysisInfo = BTreeMap<String, Vec<f64>>;

/// Read-only view of a sampled trace, as seen by analysers.
pub trait AdcTrace {
    /// Sampling period.
    fn time_step(&self) -> Nanoseconds;

    /// Offset (in samples) aligning this trace with its siblings.
    fn time_offset(&self) -> usize;

    /// Number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample value at `index`, as a float.
    fn value(&self, index: usize) -> f64;
}

/// Sample windows an analysis operates on.
///
/// All bounds are sample indices in the aligned frame of the trace, i.e. index
/// `k` refers to sample `k - time_offset` of the raw array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindows {
    /// Flattened `[start, end)` pairs used to estimate the baseline.
    pub baseline_limits: Vec<usize>,

    /// Inclusive lower integration bound.
    pub int_ll: usize,

    /// Inclusive upper integration bound.
    pub int_ul: usize,

    /// Inclusive lower amplitude-window bound.
    pub amp_ll: usize,

    /// Inclusive upper amplitude-window bound.
    pub amp_ul: usize,
}

impl AnalysisWindows {
    /// Iterate the baseline `[start, end)` pairs.
    pub fn baseline_ranges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.baseline_limits.chunks_exact(2).map(|c| (c[0], c[1]))
    }

    /// Check that every window is a well-formed sub-interval of `[0, points)`.
    pub fn validate(&self, points: usize) -> TypesResult<()> {
        let limits = &self.baseline_limits;
        if limits.is_empty() || limits.len() % 2 != 0 {
            return Err(TypesError::InvalidWindow {
                window: "baseline",
                message: format!(
                    "expected a non-empty, even number of limits, got {}",
                    limits.len()
                ),
            });
        }
        if limits.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TypesError::InvalidWindow {
                window: "baseline",
                message: format!("limits {:?} must be strictly increasing", limits),
            });
        }
        if let Some(&last) = limits.last() {
            if last > points {
                return Err(TypesError::InvalidWindow {
                    window: "baseline",
                    message: format!("limit {} exceeds the {} available points", last, points),
                });
            }
        }

        check_inclusive("integration", self.int_ll, self.int_ul, points)?;
        check_inclusive("amplitude", self.amp_ll, self.amp_ul, points)
    }
}

fn check_inclusive(window: &'static str, ll: usize, ul: usize, points: usize) -> TypesResult<()> {
    if ll > ul {
        return Err(TypesError::InvalidWindow {
            window,
            message: format!("lower limit {} is above upper limit {}", ll, ul),
        });
    }
    if ul >= points {
        return Err(TypesError::InvalidWindow {
            window,
            message: format!("upper limit {} must be smaller than {}", ul, points),
        });
    }
    Ok(())
}

/// A peak spotted within a waveform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WfPeak {
    /// Sample index of the peak.
    pub position: usize,
    baseline: Option<f64>,
    amplitude: Option<f64>,
    integration_window: Option<(usize, usize)>,
    integral: Option<f64>,
}

impl WfPeak {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            baseline: None,
            amplitude: None,
            integration_window: None,
            integral: None,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Attach the peak amplitude, which must be strictly positive.
    pub fn with_amplitude(mut self, amplitude: f64) -> TypesResult<Self> {
        if !(amplitude > 0.0) {
            return Err(TypesError::InvalidPeak(format!(
                "amplitude must be positive, got {}",
                amplitude
            )));
        }
        self.amplitude = Some(amplitude);
        Ok(self)
    }

    /// Attach the peak integral together with its `[int_ll, int_ul]` window.
    pub fn with_integral(mut self, int_ll: usize, int_ul: usize, integral: f64) -> TypesResult<Self> {
        if int_ll >= int_ul {
            return Err(TypesError::InvalidPeak(format!(
                "integration upper limit ({}) must be above the lower one ({})",
                int_ul, int_ll
            )));
        }
        self.integration_window = Some((int_ll, int_ul));
        self.integral = Some(integral);
        Ok(self)
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn amplitude(&self) -> Option<f64> {
        self.amplitude
    }

    pub fn integration_window(&self) -> Option<(usize, usize)> {
        self.integration_window
    }

    pub fn integral(&self) -> Option<f64> {
        self.integral
    }
}

/// Output of one analysis. `None` marks unavailable data, never zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WfAnaResult {
    pub baseline: Option<f64>,
    baseline_min: Option<f64>,
    baseline_max: Option<f64>,
    pub baseline_rms: Option<f64>,
    pub peaks: Option<Vec<WfPeak>>,
    pub integral: Option<f64>,
    pub amplitude: Option<f64>,
    pub deconvoluted_adcs: Option<Vec<f64>>,
}

impl WfAnaResult {
    /// Set the baseline extrema; `min` must be strictly below `max`.
    pub fn with_baseline_range(mut self, min: f64, max: f64) -> TypesResult<Self> {
        if !(min < max) {
            return Err(TypesError::InvalidBaselineRange { min, max });
        }
        self.baseline_min = Some(min);
        self.baseline_max = Some(max);
        Ok(self)
    }

    pub fn baseline_min(&self) -> Option<f64> {
        self.baseline_min
    }

    pub fn baseline_max(&self) -> Option<f64> {
        self.baseline_max
    }

    /// Scalar value of a result variable, if it was computed.
    pub fn scalar(&self, variable: ResultVariable) -> Option<f64> {
        match variable {
            ResultVariable::Integral => self.integral,
            ResultVariable::Amplitude => self.amplitude,
        }
    }
}

/// Scalar features a result exposes by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultVariable {
    Integral,
    Amplitude,
}

impl fmt::Display for ResultVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integral => write!(f, "integral"),
            Self::Amplitude => write!(f, "amplitude"),
        }
    }
}

impl FromStr for ResultVariable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "integral" => Ok(Self::Integral),
            "amplitude" => Ok(Self::Amplitude),
            other => Err(format!("unknown result variable '{}'", other)),
        }
    }
}

/// Analysis record stored on a waveform under a label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WfAna {
    pub windows: AnalysisWindows,
    pub result: WfAnaResult,
    pub passed: bool,
}

/// What an analyser hands back for one trace.
#[derive(Clone, Debug, Default)]
pub struct AnalysisOutcome {
    pub result: WfAnaResult,
    pub passed: bool,
    pub extra: Option<AnalysisInfo>,
}

/// A pluggable per-waveform computation.
pub trait WfAnalyser: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Analyse one trace within the given windows.
    fn analyse(&self, trace: &dyn AdcTrace, windows: &AnalysisWindows) -> TypesResult<AnalysisOutcome>;
}
