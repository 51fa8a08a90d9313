//! Per-channel partitions arranged on the physical channel map.
//!
//! [`clusterize`] buckets a waveform set by `(endpoint, channel)` in a single
//! pass; [`ChannelWsGrid`] binds the resulting partition to a shared
//! [`ChannelMap`]. The grid is sparse: map cells whose channel never appears
//! in the data simply have no entry, and every lookup returns an `Option`.

use crate::channel_ws::ChannelWs;
use crate::error::CalibResult;
use crate::fit_peaks::PeakFitConfig;
use crate::histogram::HistogramSpec;
use pds_types::{ChannelMap, Map, UniqueChannel, WaveformSet};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// `partition[endpoint][channel]`.
pub type ChannelPartition = BTreeMap<u32, BTreeMap<u32, ChannelWs>>;

/// Split `set` into one [`ChannelWs`] per `(endpoint, channel)`.
///
/// With a channel map, waveforms whose channel is not on the map are left
/// out. Every waveform of `set` ends up in exactly one bucket otherwise.
pub fn clusterize(set: &WaveformSet, ch_map: Option<&ChannelMap>) -> CalibResult<ChannelPartition> {
    let allowed: Option<BTreeSet<UniqueChannel>> =
        ch_map.map(|map| map.iter_positions().map(|(_, &uc)| uc).collect());

    let mut buckets: BTreeMap<UniqueChannel, Vec<usize>> = BTreeMap::new();
    for (i, wf) in set.iter().enumerate() {
        let uc = wf.unique_channel();
        if allowed.as_ref().map_or(true, |allowed| allowed.contains(&uc)) {
            buckets.entry(uc).or_default().push(i);
        }
    }

    let mut partition = ChannelPartition::new();
    for (uc, idcs) in buckets {
        let ch_ws = ChannelWs::new(set.select(&idcs)?)?;
        debug!(channel = %uc, waveforms = idcs.len(), "Channel partition");
        partition.entry(uc.endpoint).or_default().insert(uc.channel, ch_ws);
    }
    Ok(partition)
}

/// Channel sets looked up by physical position.
#[derive(Clone, Debug)]
pub struct ChannelWsGrid {
    ch_map: Arc<ChannelMap>,
    ch_wf_sets: ChannelPartition,
}

impl ChannelWsGrid {
    /// Partition `set` over the channels of `ch_map`, optionally building the
    /// calibration histograms right away.
    pub fn new(
        ch_map: Arc<ChannelMap>,
        set: &WaveformSet,
        histogram: Option<&HistogramSpec>,
    ) -> CalibResult<Self> {
        let ch_wf_sets = clusterize(set, Some(ch_map.as_ref()))?;
        let mut grid = Self { ch_map, ch_wf_sets };
        if let Some(spec) = histogram {
            grid.compute_calib_histos(spec)?;
        }
        Ok(grid)
    }

    /// Bind an already computed partition to a map, as is.
    ///
    /// Partitions for channels missing from the map are kept until
    /// [`purge`](Self::purge) is called.
    pub fn from_partition(ch_map: Arc<ChannelMap>, ch_wf_sets: ChannelPartition) -> Self {
        Self { ch_map, ch_wf_sets }
    }

    pub fn ch_map(&self) -> &ChannelMap {
        &self.ch_map
    }

    pub fn ch_wf_sets(&self) -> &ChannelPartition {
        &self.ch_wf_sets
    }

    /// Channel set at map position `(row, column)`, if there is data for it.
    pub fn get_by_position(&self, row: usize, column: usize) -> Option<&ChannelWs> {
        let uc = self.ch_map.get(row, column)?;
        self.get(uc.endpoint, uc.channel)
    }

    pub fn get(&self, endpoint: u32, channel: u32) -> Option<&ChannelWs> {
        self.ch_wf_sets.get(&endpoint)?.get(&channel)
    }

    pub fn get_mut(&mut self, endpoint: u32, channel: u32) -> Option<&mut ChannelWs> {
        self.ch_wf_sets.get_mut(&endpoint)?.get_mut(&channel)
    }

    /// All channel sets, by ascending endpoint then channel.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelWs> {
        self.ch_wf_sets.values().flat_map(|chs| chs.values())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelWs> {
        self.ch_wf_sets.values_mut().flat_map(|chs| chs.values_mut())
    }

    /// Number of channels with data.
    pub fn len(&self) -> usize {
        self.ch_wf_sets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `"endpoint-channel"` label for every map cell.
    pub fn titles(&self) -> Map<String> {
        self.ch_map.map(|uc| uc.to_string())
    }

    /// Drop the partitions whose channel is not on the map.
    pub fn purge(&mut self) {
        let ch_map = Arc::clone(&self.ch_map);
        for (&endpoint, channels) in self.ch_wf_sets.iter_mut() {
            channels.retain(|&channel, _| {
                let keep = ch_map.contains(UniqueChannel::new(endpoint, channel));
                if !keep {
                    debug!(endpoint, channel, "Purging channel absent from the map");
                }
                keep
            });
        }
        self.ch_wf_sets.retain(|_, channels| !channels.is_empty());
    }

    /// Build the calibration histogram of every channel.
    pub fn compute_calib_histos(&mut self, spec: &HistogramSpec) -> CalibResult<()> {
        for ch_ws in self.iter_mut() {
            ch_ws.compute_calib_histo(spec)?;
        }
        Ok(())
    }

    /// Fit the calibration histogram of every channel with data.
    ///
    /// Every channel is fitted even after a failure; the result is true only
    /// if every channel reported success. Channels without a histogram count
    /// as failures.
    pub fn fit_peaks(&mut self, config: &PeakFitConfig) -> CalibResult<bool> {
        config.validate()?;
        let mut all_fitted = true;
        for ch_ws in self.iter_mut() {
            let channel = ch_ws.unique_channel();
            if ch_ws.calib_histo().is_none() {
                warn!(%channel, "No calibration histogram; skipping channel");
                all_fitted = false;
                continue;
            }
            let fitted = ch_ws.fit_peaks(config)?;
            if !fitted {
                warn!(%channel, "Channel did not reach the requested peaks");
            }
            all_fitted &= fitted;
        }
        Ok(all_fitted)
    }
}
