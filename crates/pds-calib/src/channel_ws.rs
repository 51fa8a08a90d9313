//! Channel-homogeneous waveform sets.

use crate::error::{CalibError, CalibResult};
use crate::fit_peaks::PeakFitConfig;
use crate::histogram::{CalibrationHistogram, HistogramSpec};
use pds_types::{AnalysisInfo, AnalysisWindows, UniqueChannel, WaveformSet, WfAnalyser};
use std::ops::Deref;
use tracing::debug;

/// A waveform set whose waveforms all share one `(endpoint, channel)`,
/// optionally carrying a calibration histogram.
///
/// Read access to the underlying set goes through `Deref`; membership can
/// not change once the channel set exists, so a histogram built here stays
/// valid.
#[derive(Clone, Debug)]
pub struct ChannelWs {
    set: WaveformSet,
    channel: UniqueChannel,
    calib_histo: Option<CalibrationHistogram>,
}

impl ChannelWs {
    /// Wrap `set`, checking that it holds exactly one `(endpoint, channel)`.
    pub fn new(set: WaveformSet) -> CalibResult<Self> {
        let identities: Vec<UniqueChannel> = set
            .run_collapsed_available_channels()
            .into_iter()
            .flat_map(|(ep, chs)| chs.into_iter().map(move |ch| UniqueChannel::new(ep, ch)))
            .collect();

        let channel = match identities.as_slice() {
            [only] => *only,
            found => {
                let names: Vec<String> = found.iter().map(|uc| uc.to_string()).collect();
                return Err(CalibError::NonHomogeneousChannel(names.join(", ")));
            }
        };

        Ok(Self {
            set,
            channel,
            calib_histo: None,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> u32 {
        self.channel.endpoint
    }

    #[inline]
    pub fn channel(&self) -> u32 {
        self.channel.channel
    }

    #[inline]
    pub fn unique_channel(&self) -> UniqueChannel {
        self.channel
    }

    pub fn calib_histo(&self) -> Option<&CalibrationHistogram> {
        self.calib_histo.as_ref()
    }

    pub fn calib_histo_mut(&mut self) -> Option<&mut CalibrationHistogram> {
        self.calib_histo.as_mut()
    }

    /// Attach a histogram built elsewhere, replacing any current one.
    pub fn set_calib_histo(&mut self, histo: CalibrationHistogram) {
        self.calib_histo = Some(histo);
    }

    /// Run an analysis over every waveform of the channel.
    pub fn analyse(
        &mut self,
        label: &str,
        analyser: &dyn WfAnalyser,
        windows: &AnalysisWindows,
        overwrite: bool,
    ) -> CalibResult<Vec<Option<AnalysisInfo>>> {
        Ok(self.set.analyse(label, analyser, windows, overwrite)?)
    }

    /// Build (or rebuild) the calibration histogram.
    pub fn compute_calib_histo(&mut self, spec: &HistogramSpec) -> CalibResult<&CalibrationHistogram> {
        let histo = CalibrationHistogram::from_spec(&self.set, spec)?;
        debug!(channel = %self.channel, entries = histo.entries(), "Calibration histogram built");
        Ok(&*self.calib_histo.insert(histo))
    }

    /// Fit the calibration histogram; `Ok(false)` if there is none.
    pub fn fit_peaks(&mut self, config: &PeakFitConfig) -> CalibResult<bool> {
        match self.calib_histo.as_mut() {
            Some(histo) => histo.fit_peaks(config),
            None => Ok(false),
        }
    }

    /// Release the underlying set.
    pub fn into_inner(self) -> WaveformSet {
        self.set
    }
}

impl Deref for ChannelWs {
    type Target = WaveformSet;

    fn deref(&self) -> &WaveformSet {
        &self.set
    }
}
