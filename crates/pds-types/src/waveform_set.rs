//! Length-homogeneous collections of waveforms.
//!
//! A [`WaveformSet`] owns its waveforms and keeps derived indices (runs,
//! record numbers per run, channels per run and endpoint) in sync with them.
//! The collection is private: the only mutations are [`WaveformSet::filter`],
//! [`WaveformSet::merge`] and [`WaveformSet::analyse`], which keep the indices
//! consistent and bump the set's membership revision.

use crate::analysis::{AnalysisInfo, AnalysisWindows, WfAnalyser};
use crate::error::{TypesError, TypesResult};
use crate::waveform::{MeanWaveform, Waveform};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// Channels available per endpoint.
pub type ChannelsByEndpoint = BTreeMap<u32, BTreeSet<u32>>;

/// How `compute_mean_waveform` picks the waveforms to average.
pub enum MeanSelection<'a> {
    /// Every waveform in the set.
    All,
    /// Waveforms for which the predicate holds.
    Selector(&'a dyn Fn(&Waveform) -> bool),
    /// Explicit indices; out-of-range entries are skipped.
    Indices(&'a [usize]),
}

/// Options for [`WaveformSet::filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterOptions {
    /// Remove the failing waveforms from the set.
    pub actually_filter: bool,
    /// Return the indices of the passing waveforms (otherwise the failing ones).
    pub return_the_staying_ones: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            actually_filter: false,
            return_the_staying_ones: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct DerivedIndices {
    runs: BTreeSet<u32>,
    record_numbers: BTreeMap<u32, BTreeSet<u32>>,
    available_channels: BTreeMap<u32, ChannelsByEndpoint>,
}

impl DerivedIndices {
    fn from_waveforms(waveforms: &[Waveform]) -> Self {
        let mut indices = Self::default();
        for wf in waveforms {
            indices.absorb(wf);
        }
        indices
    }

    fn absorb(&mut self, wf: &Waveform) {
        let run = wf.run_number();
        self.runs.insert(run);
        self.record_numbers
            .entry(run)
            .or_default()
            .insert(wf.record_number());
        self.available_channels
            .entry(run)
            .or_default()
            .entry(wf.endpoint())
            .or_default()
            .insert(wf.channel());
    }

    fn union(&mut self, other: DerivedIndices) {
        self.runs.extend(other.runs);
        for (run, records) in other.record_numbers {
            self.record_numbers.entry(run).or_default().extend(records);
        }
        for (run, endpoints) in other.available_channels {
            let target = self.available_channels.entry(run).or_default();
            for (endpoint, channels) in endpoints {
                target.entry(endpoint).or_default().extend(channels);
            }
        }
    }
}

/// A non-empty, length-homogeneous collection of waveforms.
#[derive(Clone, Debug)]
pub struct WaveformSet {
    waveforms: Vec<Waveform>,
    points_per_wf: usize,
    indices: DerivedIndices,
    mean_adcs: Option<MeanWaveform>,
    revision: u64,
}

impl WaveformSet {
    /// Build a set, checking that it is non-empty and length-homogeneous.
    pub fn new(waveforms: Vec<Waveform>) -> TypesResult<Self> {
        let points_per_wf = check_length_homogeneity(&waveforms)?;
        let indices = DerivedIndices::from_waveforms(&waveforms);
        Ok(Self {
            waveforms,
            points_per_wf,
            indices,
            mean_adcs: None,
            revision: next_revision(),
        })
    }

    /// Number of waveforms.
    #[inline]
    pub fn len(&self) -> usize {
        self.waveforms.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waveforms.is_empty()
    }

    /// Samples per waveform, shared by the whole set.
    #[inline]
    pub fn points_per_wf(&self) -> usize {
        self.points_per_wf
    }

    #[inline]
    pub fn waveforms(&self) -> &[Waveform] {
        &self.waveforms
    }

    pub fn get(&self, index: usize) -> Option<&Waveform> {
        self.waveforms.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Waveform> {
        self.waveforms.iter()
    }

    #[inline]
    pub fn is_valid_index(&self, index: usize) -> bool {
        index < self.waveforms.len()
    }

    /// Token identifying the current membership of the set.
    ///
    /// It changes whenever waveforms are removed or merged in, so anything
    /// that stores positions into the set can detect that they went stale.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Distinct run numbers.
    pub fn runs(&self) -> &BTreeSet<u32> {
        &self.indices.runs
    }

    /// Record numbers present for each run.
    pub fn record_numbers(&self) -> &BTreeMap<u32, BTreeSet<u32>> {
        &self.indices.record_numbers
    }

    /// Channels present for each run, grouped by endpoint.
    pub fn available_channels(&self) -> &BTreeMap<u32, ChannelsByEndpoint> {
        &self.indices.available_channels
    }

    /// Channels present in any run, grouped by endpoint.
    pub fn run_collapsed_available_channels(&self) -> ChannelsByEndpoint {
        let mut collapsed = ChannelsByEndpoint::new();
        for endpoints in self.indices.available_channels.values() {
            for (endpoint, channels) in endpoints {
                collapsed
                    .entry(*endpoint)
                    .or_default()
                    .extend(channels.iter().copied());
            }
        }
        collapsed
    }

    /// Distinct endpoints over every run.
    pub fn endpoints(&self) -> BTreeSet<u32> {
        self.indices
            .available_channels
            .values()
            .flat_map(|endpoints| endpoints.keys().copied())
            .collect()
    }

    /// Last cached mean waveform, if any and still valid.
    pub fn mean_waveform(&self) -> Option<&MeanWaveform> {
        self.mean_adcs.as_ref()
    }

    /// Average the selected waveforms sample by sample and cache the result.
    pub fn compute_mean_waveform(&mut self, selection: MeanSelection<'_>) -> TypesResult<&MeanWaveform> {
        let selected: Vec<usize> = match selection {
            MeanSelection::All => (0..self.waveforms.len()).collect(),
            MeanSelection::Selector(selector) => self
                .waveforms
                .iter()
                .enumerate()
                .filter(|(_, wf)| selector(wf))
                .map(|(i, _)| i)
                .collect(),
            MeanSelection::Indices(indices) => indices
                .iter()
                .copied()
                .filter(|&i| self.is_valid_index(i))
                .collect(),
        };
        if selected.is_empty() {
            return Err(TypesError::EmptySelection);
        }

        let mut sums = vec![0.0_f64; self.points_per_wf];
        for &i in &selected {
            for (acc, &adc) in sums.iter_mut().zip(self.waveforms[i].adcs()) {
                *acc += adc as f64;
            }
        }
        let n = selected.len() as f64;
        for acc in &mut sums {
            *acc /= n;
        }

        let time_step = self.waveforms[selected[0]].time_step();
        let mean = self.mean_adcs.insert(MeanWaveform::new(time_step, sums, selected));
        Ok(&*mean)
    }

    /// Evaluate `predicate` on every waveform, optionally dropping the failing ones.
    ///
    /// The returned indices refer to the ordering before filtering. A filter
    /// that would leave the set empty fails with
    /// [`TypesError::EmptyWaveformSet`] and does not modify the set.
    pub fn filter<P>(&mut self, mut predicate: P, options: FilterOptions) -> TypesResult<Vec<usize>>
    where
        P: FnMut(&Waveform) -> bool,
    {
        let verdicts: Vec<bool> = self.waveforms.iter().map(|wf| predicate(wf)).collect();
        let staying = verdicts.iter().filter(|&&v| v).count();

        let reported: Vec<usize> = verdicts
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v == options.return_the_staying_ones)
            .map(|(i, _)| i)
            .collect();

        if options.actually_filter && staying < self.waveforms.len() {
            if staying == 0 {
                return Err(TypesError::EmptyWaveformSet);
            }
            let mut verdict = verdicts.iter();
            self.waveforms.retain(|_| verdict.next().copied().unwrap_or(false));
            self.indices = DerivedIndices::from_waveforms(&self.waveforms);
            self.mean_adcs = None;
            self.revision = next_revision();
        }

        Ok(reported)
    }

    /// Build a new set holding clones of the waveforms that satisfy `predicate`.
    pub fn from_filtered<P>(&self, mut predicate: P) -> TypesResult<WaveformSet>
    where
        P: FnMut(&Waveform) -> bool,
    {
        let kept: Vec<Waveform> = self.waveforms.iter().filter(|wf| predicate(wf)).cloned().collect();
        WaveformSet::new(kept)
    }

    /// Build a new set holding clones of the waveforms at `indices`.
    pub fn select(&self, indices: &[usize]) -> TypesResult<WaveformSet> {
        let picked: Vec<Waveform> = indices
            .iter()
            .filter_map(|&i| self.waveforms.get(i))
            .cloned()
            .collect();
        WaveformSet::new(picked)
    }

    /// Absorb every waveform of `other`, unioning the derived indices.
    pub fn merge(&mut self, other: WaveformSet) -> TypesResult<()> {
        if other.points_per_wf != self.points_per_wf {
            return Err(TypesError::IncompatibleWaveformSet {
                expected: self.points_per_wf,
                actual: other.points_per_wf,
            });
        }
        self.waveforms.extend(other.waveforms);
        self.indices.union(other.indices);
        self.mean_adcs = None;
        self.revision = next_revision();
        Ok(())
    }

    /// Analyse every waveform under `label`, returning per-waveform extra info.
    ///
    /// The windows are validated once against `points_per_wf`. Every
    /// waveform is analysed before anything is stored, so a failure on any of
    /// them leaves the whole set untouched. Nothing is stored either when the
    /// label already exists somewhere and `overwrite` is false.
    pub fn analyse(
        &mut self,
        label: &str,
        analyser: &dyn WfAnalyser,
        windows: &AnalysisWindows,
        overwrite: bool,
    ) -> TypesResult<Vec<Option<AnalysisInfo>>> {
        windows.validate(self.points_per_wf)?;
        if !overwrite && self.waveforms.iter().any(|wf| wf.has_analysis(label)) {
            return Err(TypesError::DuplicateAnalysis(label.to_string()));
        }

        let outcomes = self
            .waveforms
            .iter()
            .map(|wf| analyser.analyse(wf, windows))
            .collect::<TypesResult<Vec<_>>>()?;

        Ok(self
            .waveforms
            .iter_mut()
            .zip(outcomes)
            .map(|(wf, outcome)| wf.store_analysis(label, windows.clone(), outcome))
            .collect())
    }

    /// Consume the set, returning its waveforms.
    pub fn into_waveforms(self) -> Vec<Waveform> {
        self.waveforms
    }
}

impl<'a> IntoIterator for &'a WaveformSet {
    type Item = &'a Waveform;
    type IntoIter = std::slice::Iter<'a, Waveform>;

    fn into_iter(self) -> Self::IntoIter {
        self.waveforms.iter()
    }
}

/// Check that `waveforms` is non-empty and that every waveform has the same
/// number of samples; returns that number.
pub fn check_length_homogeneity(waveforms: &[Waveform]) -> TypesResult<usize> {
    let first = waveforms.first().ok_or(TypesError::EmptyWaveformSet)?;
    let expected = first.len();
    for (index, wf) in waveforms.iter().enumerate().skip(1) {
        if wf.len() != expected {
            return Err(TypesError::NonHomogeneousLength {
                index,
                expected,
                actual: wf.len(),
            });
        }
    }
    Ok(expected)
}
