//! Digitised photodetector traces.
//!
//! A [`Waveform`] is one readout window of one channel: the raw ADC samples
//! plus the acquisition metadata needed to group it (run, record, endpoint,
//! channel) and to place it in time (timestamps, offset).
//!
//! # Sample alignment
//!
//! Traces from different channels may start at different physical times. Rather
//! than resampling, each waveform carries a `time_offset` so that aligned index
//! `k` maps to raw sample `k - time_offset`. The offset must leave at least two
//! usable samples.

use crate::analysis::{AdcTrace, AnalysisInfo, AnalysisOutcome, AnalysisWindows, WfAna, WfAnalyser};
use crate::channel_map::UniqueChannel;
use crate::error::{TypesError, TypesResult};
use crate::units::Nanoseconds;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Acquisition metadata attached to every trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcquisitionInfo {
    /// Trace timestamp, in timing-system ticks.
    pub timestamp: u64,
    /// Timestamp of the DAQ/trigger window, in ticks.
    pub daq_window_timestamp: u64,
    pub run_number: u32,
    pub record_number: u32,
    pub endpoint: u32,
    pub channel: u32,
    /// Position of this trace within a longer acquired trace, if truncated.
    pub starting_tick: u64,
}

/// One digitised trace with its named analyses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    info: AcquisitionInfo,
    time_step: Nanoseconds,
    adcs: Vec<i32>,
    time_offset: usize,
    analyses: IndexMap<String, WfAna>,
}

impl Waveform {
    /// Create a waveform, checking that `0 <= time_offset < len(adcs) - 1`.
    pub fn new(
        info: AcquisitionInfo,
        time_step: Nanoseconds,
        adcs: Vec<i32>,
        time_offset: usize,
    ) -> TypesResult<Self> {
        if adcs.len() < 2 {
            return Err(TypesError::TooFewSamples(adcs.len()));
        }
        let max = adcs.len() - 2;
        if time_offset > max {
            return Err(TypesError::InvalidTimeOffset { offset: time_offset, max });
        }
        Ok(Self {
            info,
            time_step,
            adcs,
            time_offset,
            analyses: IndexMap::new(),
        })
    }

    #[inline]
    pub fn info(&self) -> &AcquisitionInfo {
        &self.info
    }

    #[inline]
    pub fn adcs(&self) -> &[i32] {
        &self.adcs
    }

    #[inline]
    pub fn time_step(&self) -> Nanoseconds {
        self.time_step
    }

    #[inline]
    pub fn time_offset(&self) -> usize {
        self.time_offset
    }

    #[inline]
    pub fn run_number(&self) -> u32 {
        self.info.run_number
    }

    #[inline]
    pub fn record_number(&self) -> u32 {
        self.info.record_number
    }

    #[inline]
    pub fn endpoint(&self) -> u32 {
        self.info.endpoint
    }

    #[inline]
    pub fn channel(&self) -> u32 {
        self.info.channel
    }

    /// The `(endpoint, channel)` identity of this trace.
    #[inline]
    pub fn unique_channel(&self) -> UniqueChannel {
        UniqueChannel::new(self.info.endpoint, self.info.channel)
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.adcs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.adcs.is_empty()
    }

    /// Time of a raw sample relative to the aligned origin.
    pub fn time_at(&self, index: usize) -> Nanoseconds {
        self.time_step * (index as f64 - self.time_offset as f64)
    }

    /// Clamp an index into `[0, len)`.
    #[inline]
    pub fn confine_index(&self, index: usize) -> usize {
        index.min(self.adcs.len() - 1)
    }

    /// Run `analyser` over this trace and store the outcome under `label`.
    ///
    /// Returns whatever extra diagnostics the analyser produced. Fails with
    /// [`TypesError::InvalidWindow`] when `windows` do not fit this trace, and
    /// with [`TypesError::DuplicateAnalysis`] when `label` exists and
    /// `overwrite` is false; the existing analysis is then left untouched.
    pub fn analyse(
        &mut self,
        label: &str,
        analyser: &dyn WfAnalyser,
        windows: AnalysisWindows,
        overwrite: bool,
    ) -> TypesResult<Option<AnalysisInfo>> {
        windows.validate(self.len())?;
        if !overwrite && self.analyses.contains_key(label) {
            return Err(TypesError::DuplicateAnalysis(label.to_string()));
        }

        let outcome = analyser.analyse(&*self, &windows)?;
        Ok(self.store_analysis(label, windows, outcome))
    }

    /// Record an already computed outcome under `label`.
    pub(crate) fn store_analysis(
        &mut self,
        label: &str,
        windows: AnalysisWindows,
        outcome: AnalysisOutcome,
    ) -> Option<AnalysisInfo> {
        let record = WfAna {
            windows,
            result: outcome.result,
            passed: outcome.passed,
        };
        // Overwriting keeps the label's original insertion slot.
        self.analyses.insert(label.to_string(), record);
        outcome.extra
    }

    /// Get an analysis by label, or the most recently added one.
    pub fn get_analysis(&self, label: Option<&str>) -> TypesResult<&WfAna> {
        match label {
            Some(label) => self
                .analyses
                .get(label)
                .ok_or_else(|| TypesError::AnalysisNotFound(label.to_string())),
            None => self
                .analyses
                .last()
                .map(|(_, ana)| ana)
                .ok_or(TypesError::NotAnalysed),
        }
    }

    pub fn has_analysis(&self, label: &str) -> bool {
        self.analyses.contains_key(label)
    }

    /// Analyses in insertion order.
    pub fn analyses(&self) -> impl Iterator<Item = (&str, &WfAna)> {
        self.analyses.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl AdcTrace for Waveform {
    fn time_step(&self) -> Nanoseconds {
        self.time_step
    }

    fn time_offset(&self) -> usize {
        self.time_offset
    }

    fn len(&self) -> usize {
        self.adcs.len()
    }

    fn value(&self, index: usize) -> f64 {
        self.adcs[index] as f64
    }
}

/// Sample-wise average of several traces.
///
/// An average has no run, endpoint or channel identity, and its offset is 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanWaveform {
    time_step: Nanoseconds,
    adcs: Vec<f64>,
    source_indices: Vec<usize>,
}

impl MeanWaveform {
    pub(crate) fn new(time_step: Nanoseconds, adcs: Vec<f64>, source_indices: Vec<usize>) -> Self {
        Self {
            time_step,
            adcs,
            source_indices,
        }
    }

    pub fn adcs(&self) -> &[f64] {
        &self.adcs
    }

    /// Indices (in the source set) of the averaged waveforms.
    pub fn source_indices(&self) -> &[usize] {
        &self.source_indices
    }
}

impl AdcTrace for MeanWaveform {
    fn time_step(&self) -> Nanoseconds {
        self.time_step
    }

    fn time_offset(&self) -> usize {
        0
    }

    fn len(&self) -> usize {
        self.adcs.len()
    }

    fn value(&self, index: usize) -> f64 {
        self.adcs[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisOutcome, WfAnaResult};

    struct Constant(f64);

    impl WfAnalyser for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn analyse(&self, _: &dyn AdcTrace, _: &AnalysisWindows) -> TypesResult<AnalysisOutcome> {
            let mut result = WfAnaResult::default();
            result.integral = Some(self.0);
            Ok(AnalysisOutcome {
                result,
                passed: true,
                extra: None,
            })
        }
    }

    fn windows() -> AnalysisWindows {
        AnalysisWindows {
            baseline_limits: vec![0, 2],
            int_ll: 2,
            int_ul: 3,
            amp_ll: 2,
            amp_ul: 3,
        }
    }

    fn waveform() -> Waveform {
        Waveform::new(AcquisitionInfo::default(), Nanoseconds(16.0), vec![10, 10, 4, 7], 0).unwrap()
    }

    #[test]
    fn test_time_offset_invariant() {
        let info = AcquisitionInfo::default();
        assert!(Waveform::new(info, Nanoseconds(16.0), vec![1, 2, 3], 1).is_ok());
        assert!(matches!(
            Waveform::new(info, Nanoseconds(16.0), vec![1, 2, 3], 2),
            Err(TypesError::InvalidTimeOffset { offset: 2, max: 1 })
        ));
        assert!(Waveform::new(info, Nanoseconds(16.0), vec![1], 0).is_err());
    }

    #[test]
    fn test_get_analysis_before_analysing() {
        assert!(matches!(waveform().get_analysis(None), Err(TypesError::NotAnalysed)));
        assert!(matches!(
            waveform().get_analysis(Some("x")),
            Err(TypesError::AnalysisNotFound(_))
        ));
    }

    #[test]
    fn test_analyse_labels() {
        let mut wf = waveform();
        wf.analyse("a", &Constant(1.0), windows(), false).unwrap();
        wf.analyse("b", &Constant(2.0), windows(), false).unwrap();

        assert_eq!(wf.get_analysis(None).unwrap().result.integral, Some(2.0));
        assert_eq!(wf.get_analysis(Some("a")).unwrap().result.integral, Some(1.0));

        assert!(matches!(
            wf.analyse("a", &Constant(3.0), windows(), false),
            Err(TypesError::DuplicateAnalysis(_))
        ));
        assert_eq!(wf.get_analysis(Some("a")).unwrap().result.integral, Some(1.0));

        wf.analyse("a", &Constant(3.0), windows(), true).unwrap();
        assert_eq!(wf.get_analysis(Some("a")).unwrap().result.integral, Some(3.0));
        let labels: Vec<_> = wf.analyses().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn test_malformed_windows_are_rejected() {
        let mut wf = waveform();

        let mut inverted = windows();
        inverted.int_ll = 3;
        inverted.int_ul = 2;
        assert!(matches!(
            wf.analyse("a", &Constant(1.0), inverted, false),
            Err(TypesError::InvalidWindow { window: "integration", .. })
        ));

        let mut odd = windows();
        odd.baseline_limits = vec![0, 1, 2];
        assert!(matches!(
            wf.analyse("a", &Constant(1.0), odd, false),
            Err(TypesError::InvalidWindow { window: "baseline", .. })
        ));

        let mut beyond = windows();
        beyond.amp_ul = 4;
        assert!(matches!(
            wf.analyse("a", &Constant(1.0), beyond, false),
            Err(TypesError::InvalidWindow { window: "amplitude", .. })
        ));

        assert!(!wf.has_analysis("a"));
        wf.analyse("a", &Constant(1.0), windows(), false).unwrap();
    }

    #[test]
    fn test_time_helpers() {
        let wf = Waveform::new(AcquisitionInfo::default(), Nanoseconds(16.0), vec![0; 8], 2).unwrap();
        assert!((wf.time_at(2).0).abs() < 1e-12);
        assert!((wf.time_at(5).0 - 48.0).abs() < 1e-12);
        assert_eq!(wf.confine_index(100), 7);
    }
}
