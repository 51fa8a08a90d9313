//! Calibration orchestration.

use crate::config::CalibrationConfig;
use anyhow::{Context, Result};
use pds_calib::{
    collect_gain_and_snr, Analyser, CalibrationRecord, ChannelWsGrid, GaussianFitsParameters,
};
use pds_readers::read_many;
use pds_types::{ChannelMap, UniqueChannel};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Calibration orchestrator.
pub struct Orchestrator {
    config: CalibrationConfig,
    ch_map: Arc<ChannelMap>,
    excluded: BTreeMap<u32, BTreeSet<u32>>,
}

/// Fit outcome of one channel.
#[derive(Clone, Debug)]
pub struct ChannelFit {
    pub channel: UniqueChannel,
    pub position: Option<(usize, usize)>,
    pub waveforms: usize,
    pub entries: u64,
    pub params: GaussianFitsParameters,
}

/// Everything a calibration run produces.
#[derive(Clone, Debug)]
pub struct CalibrationResults {
    pub name: String,
    /// Waveforms read from the inputs.
    pub waveforms: usize,
    /// Channels with data on the map.
    pub channels: usize,
    /// Whether every channel met its peak target with converged fits.
    pub all_fitted: bool,
    pub fits: Vec<ChannelFit>,
    pub records: Vec<CalibrationRecord>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        let ch_map = Arc::new(config.channel_map()?);
        let excluded = config.excluded()?;
        Ok(Self {
            config,
            ch_map,
            excluded,
        })
    }

    /// Run the calibration.
    pub fn run(&self) -> Result<CalibrationResults> {
        tracing::info!("Starting calibration: {}", self.config.name);

        let mut set = read_many(&self.config.inputs).context("Failed to read the input waveforms")?;
        let waveforms = set.len();

        let analysis = &self.config.analysis;
        let analyser = Analyser::from_kind(analysis.analyser, analysis.peak_search.clone());
        set.analyse(&analysis.label, &analyser, &analysis.windows(), analysis.overwrite)
            .with_context(|| format!("Analysis '{}' failed", analysis.label))?;
        tracing::info!("Analysed {} waveforms under '{}'", waveforms, analysis.label);

        let spec = self.config.histogram_spec();
        let mut grid = ChannelWsGrid::new(Arc::clone(&self.ch_map), &set, Some(&spec))
            .context("Failed to build the channel grid")?;
        drop(set);

        let all_fitted = grid.fit_peaks(&self.config.fit)?;
        if !all_fitted {
            tracing::warn!("Some channels did not reach {} fitted peaks", self.config.fit.max_peaks);
        }

        let fits = grid
            .iter()
            .map(|ch_ws| {
                let channel = ch_ws.unique_channel();
                let (entries, params) = ch_ws
                    .calib_histo()
                    .map(|h| (h.entries(), h.gaussian_fits_parameters().clone()))
                    .unwrap_or_default();
                ChannelFit {
                    channel,
                    position: self.ch_map.find_channel(channel),
                    waveforms: ch_ws.len(),
                    entries,
                    params,
                }
            })
            .collect();

        let records = collect_gain_and_snr(&grid, &self.excluded)
            .iter()
            .map(|gain| CalibrationRecord::new(self.config.batch, self.config.apa, self.config.pde, gain))
            .collect::<Vec<_>>();

        tracing::info!(
            "Calibration complete: {} channels, {} records",
            grid.len(),
            records.len()
        );

        Ok(CalibrationResults {
            name: self.config.name.clone(),
            waveforms,
            channels: grid.len(),
            all_fitted,
            fits,
            records,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, ChannelMapConfig};
    use pds_calib::{AnalyserKind, HistogramSpec, PeakFitConfig};
    use pds_types::ResultVariable;
    use std::fmt::Write as _;
    use std::path::Path;
    use tempfile::TempDir;

    /// Integrated-charge offsets, in units of 3 ADC counts, shaped as the sum
    /// of three discrete uniforms over `[0, 6]` (a bell over `[-9, 9]`).
    fn bell() -> impl Iterator<Item = i32> {
        (0..343).map(|i| i % 7 + (i / 7) % 7 + (i / 49) % 7 - 9)
    }

    fn line(out: &mut String, record: usize, endpoint: u32, channel: u32, deficit: i32) {
        let first = 1000 - deficit;
        writeln!(out, "1 {record} {endpoint} {channel} 0 0 : 1000 1000 1000 1000 {first} 1000 1000 1000").unwrap();
    }

    /// Channel (104, 0) sees a pedestal and a single photoelectron peak
    /// 39 * 3 ADC below it; channel (104, 1) sees the pedestal only.
    pub(crate) fn write_fixture(dir: &Path) -> std::path::PathBuf {
        let mut out = String::from("time_step_ns = 16\n");
        let mut record = 0;
        for _ in 0..2 {
            for d in bell() {
                line(&mut out, record, 104, 0, 3 * d);
                record += 1;
            }
        }
        for d in bell() {
            line(&mut out, record, 104, 0, 3 * (39 + d));
            record += 1;
        }
        for d in bell() {
            line(&mut out, record, 104, 1, 3 * d);
            record += 1;
        }
        let path = dir.join("run.txt");
        std::fs::write(&path, out).unwrap();
        path
    }

    pub(crate) fn fixture_config(input: std::path::PathBuf) -> CalibrationConfig {
        CalibrationConfig {
            name: "fixture".into(),
            batch: 1,
            apa: 2,
            pde: 0.4,
            inputs: vec![input],
            analysis: AnalysisConfig {
                label: "standard".into(),
                analyser: AnalyserKind::Basic,
                baseline_limits: vec![0, 4],
                int_ll: 4,
                int_ul: 7,
                amp_ll: 4,
                amp_ul: 7,
                overwrite: false,
                peak_search: None,
            },
            // Bins of 144 = 3 * 48 hold three consecutive charge values, the
            // central one on the bin center.
            histogram: HistogramSpec {
                bins_number: 30,
                domain: [-1080.0, 3240.0],
                variable: ResultVariable::Integral,
                analysis_label: None,
            },
            fit: PeakFitConfig::default(),
            channel_map: ChannelMapConfig {
                rows: vec![vec![[104, 0], [104, 1]]],
            },
            excluded_channels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_end_to_end_calibration() {
        let dir = TempDir::new().unwrap();
        let config = fixture_config(write_fixture(dir.path()));
        let results = Orchestrator::new(config).unwrap().run().unwrap();

        assert_eq!(results.waveforms, 4 * 343);
        assert_eq!(results.channels, 2);
        // The pedestal-only channel cannot reach two peaks.
        assert!(!results.all_fitted);

        assert_eq!(results.fits.len(), 2);
        assert_eq!(results.fits[0].position, Some((0, 0)));
        assert_eq!(results.fits[0].waveforms, 3 * 343);
        assert_eq!(results.fits[0].entries, 3 * 343);

        assert_eq!(results.records.len(), 1);
        let record = &results.records[0];
        assert_eq!((record.endpoint, record.channel, record.apa), (104, 0, 2));
        assert!((record.gain - 1872.0).abs() < 50.0, "gain {}", record.gain);
        assert!(record.snr > 1.0);
    }
}
