//! Concrete waveform analysers.
//!
//! [`Analyser`] is the closed registry of analysers selectable from
//! configuration; each variant implements [`WfAnalyser`].

use crate::peaks::{find_peaks, PeakSearch};
use pds_types::{
    AdcTrace, AnalysisInfo, AnalysisOutcome, AnalysisWindows, TypesError, TypesResult, WfAnaResult,
    WfAnalyser, WfPeak,
};
use serde::{Deserialize, Serialize};

/// Analyser selector used in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyserKind {
    Stub,
    #[default]
    Basic,
}

/// Returns fixed dummy values; useful to exercise the analysis plumbing.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubAnalyser;

impl WfAnalyser for StubAnalyser {
    fn name(&self) -> &str {
        "stub"
    }

    fn analyse(&self, _trace: &dyn AdcTrace, _windows: &AnalysisWindows) -> TypesResult<AnalysisOutcome> {
        let mut result = WfAnaResult::default();
        result.baseline = Some(0.0);
        result.peaks = Some(Vec::new());
        result.integral = Some(0.0);
        result.amplitude = Some(0.0);
        Ok(AnalysisOutcome {
            result,
            passed: true,
            extra: None,
        })
    }
}

/// Median baseline, baseline-subtracted integral, peak-to-peak amplitude and
/// peak search over the inverted trace.
#[derive(Clone, Debug, Default)]
pub struct BasicAnalyser {
    pub peak_search: PeakSearch,
}

impl BasicAnalyser {
    pub fn new(peak_search: PeakSearch) -> Self {
        Self { peak_search }
    }
}

/// Map an aligned index onto the raw samples of `trace`.
fn raw_index(trace: &dyn AdcTrace, window: &'static str, aligned: usize) -> TypesResult<usize> {
    aligned
        .checked_sub(trace.time_offset())
        .filter(|&i| i < trace.len())
        .ok_or_else(|| TypesError::InvalidWindow {
            window,
            message: format!(
                "index {} falls outside the trace once shifted by its offset {}",
                aligned,
                trace.time_offset()
            ),
        })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}

impl WfAnalyser for BasicAnalyser {
    fn name(&self) -> &str {
        "basic"
    }

    fn analyse(&self, trace: &dyn AdcTrace, windows: &AnalysisWindows) -> TypesResult<AnalysisOutcome> {
        windows.validate(trace.len())?;

        let mut baseline_samples = Vec::new();
        for (start, end) in windows.baseline_ranges() {
            let lo = raw_index(trace, "baseline", start)?;
            let hi = raw_index(trace, "baseline", end - 1)? + 1;
            baseline_samples.extend((lo..hi).map(|i| trace.value(i)));
        }
        let baseline = median(&mut baseline_samples).ok_or_else(|| TypesError::InvalidWindow {
            window: "baseline",
            message: "no baseline samples".into(),
        })?;

        let int_ll = raw_index(trace, "integration", windows.int_ll)?;
        let int_ul = raw_index(trace, "integration", windows.int_ul)?;
        let area: f64 = (int_ll..=int_ul).map(|i| trace.value(i)).sum();
        let integral = trace.time_step().0 * ((int_ul - int_ll + 1) as f64 * baseline - area);

        let amp_ll = raw_index(trace, "amplitude", windows.amp_ll)?;
        let amp_ul = raw_index(trace, "amplitude", windows.amp_ul)?;
        let (lo, hi) = (amp_ll..=amp_ul)
            .map(|i| trace.value(i))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

        // Pulses dip below the baseline.
        let inverted: Vec<f64> = (0..trace.len()).map(|i| -trace.value(i)).collect();
        let found = find_peaks(&inverted, &self.peak_search);

        let offset = trace.time_offset();
        let mut peaks = Vec::with_capacity(found.len());
        for &p in &found.positions {
            let mut peak = WfPeak::new(p + offset).with_baseline(baseline);
            let depth = baseline - trace.value(p);
            if depth > 0.0 {
                peak = peak.with_amplitude(depth)?;
            }
            peaks.push(peak);
        }

        let mut extra = AnalysisInfo::new();
        extra.insert("peaks".into(), found.positions.iter().map(|&p| (p + offset) as f64).collect());
        extra.insert("prominences".into(), found.prominences.clone());
        extra.insert("widths".into(), found.widths.clone());

        let mut result = WfAnaResult::default();
        result.baseline = Some(baseline);
        result.peaks = Some(peaks);
        result.integral = Some(integral);
        result.amplitude = Some(hi - lo);
        Ok(AnalysisOutcome {
            result,
            passed: true,
            extra: Some(extra),
        })
    }
}

/// Registry of the analysers available to configuration-driven runs.
#[derive(Clone, Debug)]
pub enum Analyser {
    Stub(StubAnalyser),
    Basic(BasicAnalyser),
}

impl Analyser {
    pub fn from_kind(kind: AnalyserKind, peak_search: Option<PeakSearch>) -> Self {
        match kind {
            AnalyserKind::Stub => Self::Stub(StubAnalyser),
            AnalyserKind::Basic => Self::Basic(BasicAnalyser::new(peak_search.unwrap_or_default())),
        }
    }
}

impl WfAnalyser for Analyser {
    fn name(&self) -> &str {
        match self {
            Self::Stub(a) => a.name(),
            Self::Basic(a) => a.name(),
        }
    }

    fn analyse(&self, trace: &dyn AdcTrace, windows: &AnalysisWindows) -> TypesResult<AnalysisOutcome> {
        match self {
            Self::Stub(a) => a.analyse(trace, windows),
            Self::Basic(a) => a.analyse(trace, windows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pds_types::{AcquisitionInfo, Nanoseconds, Waveform};

    fn pulse(offset: usize) -> Waveform {
        let adcs = vec![100, 102, 98, 100, 100, 60, 80, 95, 100, 101];
        Waveform::new(AcquisitionInfo::default(), Nanoseconds(16.0), adcs, offset).unwrap()
    }

    fn windows() -> AnalysisWindows {
        AnalysisWindows {
            baseline_limits: vec![0, 4],
            int_ll: 4,
            int_ul: 8,
            amp_ll: 4,
            amp_ul: 8,
        }
    }

    #[test]
    fn test_basic_analyser_features() {
        let mut wf = pulse(0);
        let extra = wf
            .analyse("std", &BasicAnalyser::default(), windows(), false)
            .unwrap()
            .unwrap();
        let result = &wf.get_analysis(Some("std")).unwrap().result;

        assert_eq!(result.baseline, Some(100.0));
        // 5 * 100 - (100 + 60 + 80 + 95 + 100) = 65
        assert!((result.integral.unwrap() - 16.0 * 65.0).abs() < 1e-9);
        assert_eq!(result.amplitude, Some(40.0));

        let peaks = result.peaks.as_ref().unwrap();
        assert!(peaks.iter().any(|p| p.position == 5 && p.amplitude() == Some(40.0)));
        assert!(extra["peaks"].contains(&5.0));
    }

    #[test]
    fn test_basic_analyser_peak_filter() {
        let mut wf = pulse(0);
        let analyser = BasicAnalyser::new(PeakSearch { prominence: Some(10.0), ..Default::default() });
        wf.analyse("std", &analyser, windows(), false).unwrap();
        let peaks = wf.get_analysis(None).unwrap().result.peaks.clone().unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].position, 5);
    }

    #[test]
    fn test_windows_are_shifted_by_offset() {
        let mut wf = pulse(1);
        let shifted = AnalysisWindows {
            baseline_limits: vec![1, 5],
            int_ll: 5,
            int_ul: 9,
            amp_ll: 5,
            amp_ul: 9,
        };
        wf.analyse("std", &BasicAnalyser::default(), shifted, false).unwrap();
        let result = &wf.get_analysis(None).unwrap().result;
        assert!((result.integral.unwrap() - 16.0 * 65.0).abs() < 1e-9);

        let mut early = pulse(1);
        assert!(early.analyse("std", &BasicAnalyser::default(), windows(), false).is_err());
    }

    #[test]
    fn test_malformed_windows_fail_cleanly() {
        let wf = pulse(0);
        let analyser = BasicAnalyser::default();

        let inverted = AnalysisWindows { int_ll: 5, int_ul: 3, ..windows() };
        assert!(matches!(
            analyser.analyse(&wf, &inverted),
            Err(TypesError::InvalidWindow { window: "integration", .. })
        ));

        let odd = AnalysisWindows { baseline_limits: vec![0, 2, 3], ..windows() };
        assert!(matches!(
            analyser.analyse(&wf, &odd),
            Err(TypesError::InvalidWindow { window: "baseline", .. })
        ));

        let mut stored = pulse(0);
        assert!(stored.analyse("std", &analyser, inverted, false).is_err());
        assert!(!stored.has_analysis("std"));
    }

    #[test]
    fn test_stub_and_registry() {
        let mut wf = pulse(0);
        let analyser = Analyser::from_kind(AnalyserKind::Stub, None);
        assert_eq!(analyser.name(), "stub");
        wf.analyse("dummy", &analyser, windows(), false).unwrap();
        let ana = wf.get_analysis(Some("dummy")).unwrap();
        assert!(ana.passed);
        assert_eq!(ana.result.integral, Some(0.0));
    }
}
