//! Gain and signal-to-noise extraction.
//!
//! The gain is the spacing between the pedestal and the single
//! photoelectron peak; the SNR compares it with their combined spread.

use crate::grid::ChannelWsGrid;
use crate::histogram::GaussianFitsParameters;
use pds_types::UniqueChannel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GainSnr {
    pub gain: f64,
    pub snr: f64,
}

/// `gain = mean[1] - mean[0]`, `snr = gain / sqrt(std[0]^2 + std[1]^2)`.
///
/// `None` when fewer than two peaks were fitted.
pub fn gain_and_snr(params: &GaussianFitsParameters) -> Option<GainSnr> {
    if params.mean.len() < 2 || params.std.len() < 2 {
        return None;
    }
    let gain = params.mean[1].0 - params.mean[0].0;
    let (s0, s1) = (params.std[0].0, params.std[1].0);
    let snr = gain / (s0 * s0 + s1 * s1).sqrt();
    Some(GainSnr { gain, snr })
}

/// Gain and SNR of one channel, with its map position.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelGain {
    pub channel: UniqueChannel,
    pub position: (usize, usize),
    pub values: GainSnr,
}

/// Walk the map in row-major order and collect every computable gain.
///
/// Excluded channels (`endpoint -> channels`), cells without data and
/// channels with fewer than two fitted peaks are skipped.
pub fn collect_gain_and_snr(
    grid: &ChannelWsGrid,
    excluded: &BTreeMap<u32, BTreeSet<u32>>,
) -> Vec<ChannelGain> {
    let mut gains = Vec::new();
    for (position, &channel) in grid.ch_map().iter_positions() {
        if excluded
            .get(&channel.endpoint)
            .is_some_and(|chs| chs.contains(&channel.channel))
        {
            debug!(%channel, "Excluded channel");
            continue;
        }
        let Some(histo) = grid
            .get(channel.endpoint, channel.channel)
            .and_then(|ch_ws| ch_ws.calib_histo())
        else {
            continue;
        };
        match gain_and_snr(histo.gaussian_fits_parameters()) {
            Some(values) => gains.push(ChannelGain { channel, position, values }),
            None => debug!(%channel, "Fewer than two fitted peaks; no gain"),
        }
    }
    gains
}

/// One exported calibration row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub batch: u32,
    pub apa: u32,
    pub endpoint: u32,
    pub channel: u32,
    pub pde: f64,
    pub gain: f64,
    pub snr: f64,
}

impl CalibrationRecord {
    pub fn new(batch: u32, apa: u32, pde: f64, gain: &ChannelGain) -> Self {
        Self {
            batch,
            apa,
            endpoint: gain.channel.endpoint,
            channel: gain.channel.channel,
            pde,
            gain: gain.values.gain,
            snr: gain.values.snr,
        }
    }
}
