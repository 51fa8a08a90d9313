//! Calibration histograms.
//!
//! A [`CalibrationHistogram`] bins one scalar feature of a waveform
//! population while recording, per bin, which waveforms landed there. Counts
//! and provenance are built in the same pass, so `indices[i].len() ==
//! counts[i]` holds by construction; the direct constructor checks it.
//!
//! Binning follows the usual convention: `edges[i] <= x < edges[i + 1]`, with
//! the last bin closed on both ends. Samples outside the domain, NaNs and
//! unavailable values are not counted.

use crate::error::{CalibError, CalibResult};
use pds_types::{ResultVariable, Waveform, WaveformSet};
use serde::{Deserialize, Serialize};

/// Fitted Gaussian parameters, one `(value, uncertainty)` per peak, in
/// ascending position along the domain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GaussianFitsParameters {
    pub scale: Vec<(f64, f64)>,
    pub mean: Vec<(f64, f64)>,
    pub std: Vec<(f64, f64)>,
}

impl GaussianFitsParameters {
    /// Number of fitted peaks.
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn push(&mut self, scale: (f64, f64), mean: (f64, f64), std: (f64, f64)) {
        self.scale.push(scale);
        self.mean.push(mean);
        self.std.push(std);
    }

    pub fn clear(&mut self) {
        self.scale.clear();
        self.mean.clear();
        self.std.clear();
    }
}

/// How a calibration histogram is built from a waveform set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramSpec {
    pub bins_number: usize,
    pub domain: [f64; 2],
    #[serde(default = "default_variable")]
    pub variable: ResultVariable,
    /// Analysis to read the variable from; the most recent one when absent.
    #[serde(default)]
    pub analysis_label: Option<String>,
}

fn default_variable() -> ResultVariable {
    ResultVariable::Integral
}

/// A histogram of a waveform feature with per-bin provenance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationHistogram {
    bins_number: usize,
    edges: Vec<f64>,
    mean_bin_width: f64,
    counts: Vec<u64>,
    indices: Vec<Vec<usize>>,
    gaussian_fits_parameters: GaussianFitsParameters,
    #[serde(skip)]
    source_revision: Option<u64>,
}

impl CalibrationHistogram {
    /// Build a histogram from precomputed bins, checking every shape invariant.
    pub fn new(
        bins_number: usize,
        edges: Vec<f64>,
        counts: Vec<u64>,
        indices: Vec<Vec<usize>>,
    ) -> CalibResult<Self> {
        if bins_number < 2 {
            return Err(CalibError::InvalidBinsNumber(bins_number));
        }
        check_len("edges", bins_number + 1, edges.len())?;
        check_len("counts", bins_number, counts.len())?;
        check_len("indices", bins_number, indices.len())?;
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(CalibError::NonMonotonicEdges);
        }
        for (bin, (&count, idcs)) in counts.iter().zip(&indices).enumerate() {
            if idcs.len() as u64 != count {
                return Err(CalibError::ProvenanceMismatch {
                    bin,
                    count,
                    indices: idcs.len(),
                });
            }
        }

        let mean_bin_width = (edges[bins_number] - edges[0]) / bins_number as f64;
        Ok(Self {
            bins_number,
            edges,
            mean_bin_width,
            counts,
            indices,
            gaussian_fits_parameters: GaussianFitsParameters::default(),
            source_revision: None,
        })
    }

    /// Bin a plain sample population; indices refer to positions in `samples`.
    pub fn from_samples(samples: &[f64], bins_number: usize, domain: [f64; 2]) -> CalibResult<Self> {
        Self::binned(
            samples.iter().copied().enumerate().map(|(i, x)| (i, Some(x))),
            bins_number,
            domain,
        )
    }

    /// Bin `variable` as found in each waveform's analysis.
    ///
    /// Indices refer to positions in `set`, whose revision is remembered so
    /// that stale provenance can be detected later.
    pub fn from_waveform_set(
        set: &WaveformSet,
        bins_number: usize,
        domain: [f64; 2],
        variable: ResultVariable,
        analysis_label: Option<&str>,
    ) -> CalibResult<Self> {
        if variable != ResultVariable::Integral {
            return Err(CalibError::UnsupportedVariable(variable.to_string()));
        }

        let values = set
            .iter()
            .map(|wf| wf.get_analysis(analysis_label).map(|ana| ana.result.scalar(variable)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut histo = Self::binned(values.into_iter().enumerate(), bins_number, domain)?;
        histo.source_revision = Some(set.revision());
        Ok(histo)
    }

    /// Build from a [`HistogramSpec`].
    pub fn from_spec(set: &WaveformSet, spec: &HistogramSpec) -> CalibResult<Self> {
        Self::from_waveform_set(
            set,
            spec.bins_number,
            spec.domain,
            spec.variable,
            spec.analysis_label.as_deref(),
        )
    }

    fn binned<I>(values: I, bins_number: usize, domain: [f64; 2]) -> CalibResult<Self>
    where
        I: Iterator<Item = (usize, Option<f64>)>,
    {
        if bins_number < 2 {
            return Err(CalibError::InvalidBinsNumber(bins_number));
        }
        let [lo, hi] = domain;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(CalibError::InvalidDomain(lo, hi));
        }

        let step = (hi - lo) / bins_number as f64;
        let mut edges: Vec<f64> = (0..bins_number).map(|i| lo + i as f64 * step).collect();
        edges.push(hi);

        let inv_step = bins_number as f64 / (hi - lo);
        let mut counts = vec![0u64; bins_number];
        let mut indices = vec![Vec::new(); bins_number];
        for (i, value) in values {
            let Some(x) = value else { continue };
            if !(x >= lo && x <= hi) {
                continue;
            }
            let mut bin = (((x - lo) * inv_step) as usize).min(bins_number - 1);
            // The scaled index can miss by one next to an edge; the edges decide.
            if x < edges[bin] {
                bin -= 1;
            } else if bin + 1 < bins_number && x >= edges[bin + 1] {
                bin += 1;
            }
            counts[bin] += 1;
            indices[bin].push(i);
        }

        Self::new(bins_number, edges, counts, indices)
    }

    #[inline]
    pub fn bins_number(&self) -> usize {
        self.bins_number
    }

    #[inline]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    #[inline]
    pub fn mean_bin_width(&self) -> f64 {
        self.mean_bin_width
    }

    #[inline]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Contributing sample positions, per bin.
    #[inline]
    pub fn indices(&self) -> &[Vec<usize>] {
        &self.indices
    }

    pub fn bin_centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Total number of binned samples.
    pub fn entries(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn gaussian_fits_parameters(&self) -> &GaussianFitsParameters {
        &self.gaussian_fits_parameters
    }

    /// Replace the fit results wholesale.
    pub fn set_gaussian_fits_parameters(&mut self, params: GaussianFitsParameters) {
        self.gaussian_fits_parameters = params;
    }

    pub fn reset_gaussian_fits_parameters(&mut self) {
        self.gaussian_fits_parameters.clear();
    }

    /// Whether this histogram's provenance still refers to `set`.
    pub fn is_current_for(&self, set: &WaveformSet) -> bool {
        self.source_revision == Some(set.revision())
    }

    /// Waveforms of `set` that fell into `bin`.
    ///
    /// Fails with [`CalibError::StaleHistogram`] if the histogram was not built
    /// from the current membership of `set`.
    pub fn waveforms_in_bin<'a>(&self, set: &'a WaveformSet, bin: usize) -> CalibResult<Vec<&'a Waveform>> {
        if !self.is_current_for(set) {
            return Err(CalibError::StaleHistogram);
        }
        let idcs = self.indices.get(bin).ok_or(CalibError::LengthMismatch {
            what: "bin index",
            expected: self.bins_number,
            actual: bin,
        })?;
        Ok(idcs.iter().filter_map(|&i| set.get(i)).collect())
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> CalibResult<()> {
    if expected != actual {
        return Err(CalibError::LengthMismatch { what, expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pds_types::{
        AcquisitionInfo, AdcTrace, AnalysisOutcome, AnalysisWindows, FilterOptions, Nanoseconds,
        TypesResult, WfAnaResult, WfAnalyser,
    };

    #[test]
    fn test_literal_binning() {
        let histo = CalibrationHistogram::from_samples(&[1.0, 1.0, 1.0, 5.0, 5.0, 9.0], 5, [0.0, 10.0]).unwrap();
        assert_eq!(histo.edges(), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(histo.counts(), &[3, 0, 2, 0, 1]);
        assert_eq!(histo.indices()[0], vec![0, 1, 2]);
        assert_eq!(histo.indices()[2], vec![3, 4]);
        assert!((histo.mean_bin_width() - 2.0).abs() < 1e-12);
        assert_eq!(histo.bin_centers()[4], 9.0);
    }

    #[test]
    fn test_out_of_domain_and_closed_last_bin() {
        let samples = [-1.0, 0.0, 10.0, 10.5, f64::NAN, 3.9];
        let histo = CalibrationHistogram::from_samples(&samples, 5, [0.0, 10.0]).unwrap();
        assert_eq!(histo.counts(), &[1, 1, 0, 0, 1]);
        assert_eq!(histo.indices()[4], vec![2]);
        assert!(histo.entries() <= samples.len() as u64);
        for (count, idcs) in histo.counts().iter().zip(histo.indices()) {
            assert_eq!(*count, idcs.len() as u64);
        }
    }

    #[test]
    fn test_values_on_edges_follow_the_edges() {
        let samples = [0.3, 0.6, 0.7];
        let histo = CalibrationHistogram::from_samples(&samples, 10, [0.0, 1.0]).unwrap();
        for (i, &x) in samples.iter().enumerate() {
            let bin = histo.indices().iter().position(|idcs| idcs.contains(&i)).unwrap();
            assert!(histo.edges()[bin] <= x && x < histo.edges()[bin + 1], "{} in bin {}", x, bin);
        }

        for (bins, domain) in [(10, [0.0, 1.0]), (7, [-3.0, 4.1]), (30, [-1080.0, 3240.0])] {
            let samples: Vec<f64> = (0..=2000)
                .map(|k| domain[0] + (domain[1] - domain[0]) * k as f64 / 2000.0)
                .collect();
            let histo = CalibrationHistogram::from_samples(&samples, bins, domain).unwrap();
            assert_eq!(histo.entries(), samples.len() as u64);
            let edges = histo.edges();
            for (bin, idcs) in histo.indices().iter().enumerate() {
                for &i in idcs {
                    let x = samples[i];
                    let upper_ok = x < edges[bin + 1] || (bin + 1 == bins && x == edges[bin + 1]);
                    assert!(edges[bin] <= x && upper_ok, "{} in bin {} of {:?}", x, bin, domain);
                }
            }
        }
    }

    #[test]
    fn test_direct_construction_checks() {
        let edges = vec![0.0, 1.0, 2.0, 3.0];
        let err = CalibrationHistogram::new(3, edges.clone(), vec![1, 0, 0, 0], vec![vec![0], vec![], vec![]]);
        assert!(matches!(err, Err(CalibError::LengthMismatch { what: "counts", expected: 3, actual: 4 })));

        let err = CalibrationHistogram::new(3, edges.clone(), vec![2, 0, 0], vec![vec![0], vec![], vec![]]);
        assert!(matches!(err, Err(CalibError::ProvenanceMismatch { bin: 0, count: 2, indices: 1 })));

        assert!(matches!(
            CalibrationHistogram::new(1, vec![0.0, 1.0], vec![0], vec![vec![]]),
            Err(CalibError::InvalidBinsNumber(1))
        ));
        assert!(CalibrationHistogram::from_samples(&[1.0], 4, [2.0, 2.0]).is_err());
        assert!(CalibrationHistogram::new(3, edges, vec![1, 0, 0], vec![vec![7], vec![], vec![]]).is_ok());
    }

    struct Integral(f64);

    impl WfAnalyser for Integral {
        fn name(&self) -> &str {
            "integral"
        }

        fn analyse(&self, trace: &dyn AdcTrace, _: &AnalysisWindows) -> TypesResult<AnalysisOutcome> {
            let mut result = WfAnaResult::default();
            result.integral = Some(trace.value(0) * self.0);
            Ok(AnalysisOutcome {
                result,
                passed: true,
                extra: None,
            })
        }
    }

    fn analysed_set() -> WaveformSet {
        let waveforms = [1, 1, 5, 9]
            .iter()
            .map(|&v| Waveform::new(AcquisitionInfo::default(), Nanoseconds(16.0), vec![v, 0], 0).unwrap())
            .collect();
        let mut set = WaveformSet::new(waveforms).unwrap();
        let windows = AnalysisWindows {
            baseline_limits: vec![0, 1],
            int_ll: 0,
            int_ul: 1,
            amp_ll: 0,
            amp_ul: 1,
        };
        set.analyse("unit", &Integral(1.0), &windows, false).unwrap();
        set
    }

    #[test]
    fn test_from_waveform_set_provenance() {
        let mut set = analysed_set();
        let histo = CalibrationHistogram::from_waveform_set(&set, 5, [0.0, 10.0], ResultVariable::Integral, None)
            .unwrap();
        assert_eq!(histo.counts(), &[2, 0, 1, 0, 1]);
        let in_bin = histo.waveforms_in_bin(&set, 2).unwrap();
        assert_eq!(in_bin[0].adcs()[0], 5);

        assert!(matches!(
            CalibrationHistogram::from_waveform_set(&set, 5, [0.0, 10.0], ResultVariable::Amplitude, None),
            Err(CalibError::UnsupportedVariable(_))
        ));

        set.filter(|wf| wf.adcs()[0] != 9, FilterOptions { actually_filter: true, ..Default::default() })
            .unwrap();
        assert!(matches!(histo.waveforms_in_bin(&set, 2), Err(CalibError::StaleHistogram)));
    }

    #[test]
    fn test_missing_analysis_label() {
        let set = analysed_set();
        let result =
            CalibrationHistogram::from_waveform_set(&set, 5, [0.0, 10.0], ResultVariable::Integral, Some("other"));
        assert!(matches!(result, Err(CalibError::Types(_))));
    }
}
