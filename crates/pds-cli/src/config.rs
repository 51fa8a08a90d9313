//! Calibration configuration loading and validation.

use anyhow::{Context, Result};
use pds_calib::{AnalyserKind, HistogramSpec, PeakFitConfig, PeakSearch};
use pds_types::{AnalysisWindows, ChannelMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Top-level calibration configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Run name/description.
    pub name: String,

    /// Production batch the records are filed under.
    #[serde(default)]
    pub batch: u32,

    /// Detector region (APA).
    #[serde(default)]
    pub apa: u32,

    /// Photon detection efficiency setting of the run.
    #[serde(default)]
    pub pde: f64,

    /// Waveform files, merged in order.
    pub inputs: Vec<PathBuf>,

    /// Per-waveform analysis.
    pub analysis: AnalysisConfig,

    /// Calibration histogram construction.
    pub histogram: HistogramSpec,

    /// Peak fitting.
    #[serde(default)]
    pub fit: PeakFitConfig,

    /// Physical channel arrangement.
    pub channel_map: ChannelMapConfig,

    /// `endpoint -> channels` left out of the gain/SNR export.
    ///
    /// Keys are strings so that TOML tables can carry them.
    #[serde(default)]
    pub excluded_channels: BTreeMap<String, Vec<u32>>,
}

/// Analysis settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Label the results are stored under.
    #[serde(default = "default_label")]
    pub label: String,

    #[serde(default)]
    pub analyser: AnalyserKind,

    /// Flat list of baseline `[start, end)` pairs.
    pub baseline_limits: Vec<usize>,
    pub int_ll: usize,
    pub int_ul: usize,
    pub amp_ll: usize,
    pub amp_ul: usize,

    #[serde(default)]
    pub overwrite: bool,

    /// Peak search used by the basic analyser.
    #[serde(default)]
    pub peak_search: Option<PeakSearch>,
}

fn default_label() -> String {
    "standard".to_string()
}

impl AnalysisConfig {
    pub fn windows(&self) -> AnalysisWindows {
        AnalysisWindows {
            baseline_limits: self.baseline_limits.clone(),
            int_ll: self.int_ll,
            int_ul: self.int_ul,
            amp_ll: self.amp_ll,
            amp_ul: self.amp_ul,
        }
    }
}

/// Channel map rows of `[endpoint, channel]` pairs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelMapConfig {
    pub rows: Vec<Vec<[u32; 2]>>,
}

impl CalibrationConfig {
    pub fn channel_map(&self) -> Result<ChannelMap> {
        ChannelMap::from_pairs(self.channel_map.rows.clone()).context("Invalid channel map")
    }

    /// Excluded channels keyed by numeric endpoint.
    pub fn excluded(&self) -> Result<BTreeMap<u32, BTreeSet<u32>>> {
        self.excluded_channels
            .iter()
            .map(|(endpoint, channels)| {
                let endpoint: u32 = endpoint
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid endpoint in excluded_channels: '{}'", endpoint))?;
                Ok((endpoint, channels.iter().copied().collect()))
            })
            .collect()
    }

    /// Histogram spec, reading from the configured analysis unless another
    /// label is given.
    pub fn histogram_spec(&self) -> HistogramSpec {
        let mut spec = self.histogram.clone();
        if spec.analysis_label.is_none() {
            spec.analysis_label = Some(self.analysis.label.clone());
        }
        spec
    }
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<CalibrationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: CalibrationConfig = if path.extension().map_or(false, |e| e == "json") {
        serde_json::from_str(&content).with_context(|| "Failed to parse config as JSON")?
    } else {
        // Assume TOML
        toml::from_str(&content).with_context(|| "Failed to parse config as TOML")?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration.
fn validate_config(config: &CalibrationConfig) -> Result<()> {
    if config.inputs.is_empty() {
        anyhow::bail!("At least one input file is required");
    }
    for input in &config.inputs {
        if !input.exists() {
            anyhow::bail!("Input file not found: {:?}", input);
        }
    }

    if config.histogram.bins_number < 2 {
        anyhow::bail!(
            "histogram.bins_number must be at least 2 (got {})",
            config.histogram.bins_number
        );
    }
    let [lo, hi] = config.histogram.domain;
    if !(lo < hi) {
        anyhow::bail!("histogram.domain must be increasing (got [{}, {}])", lo, hi);
    }

    if config.analysis.label.is_empty() {
        anyhow::bail!("analysis.label must not be empty");
    }

    config.fit.validate().context("Invalid fit configuration")?;
    config.channel_map()?;
    config.excluded()?;

    if !(0.0..=1.0).contains(&config.pde) {
        tracing::warn!("PDE {} is outside [0, 1]; exporting it as given", config.pde);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pds_calib::FitType;
    use pds_types::ResultVariable;
    use std::fs;
    use tempfile::TempDir;

    fn config_toml(input: &Path) -> String {
        format!(
            r#"
name = "apa2 run 27"
batch = 2
apa = 2
pde = 0.45
inputs = [{input:?}]

[analysis]
analyser = "basic"
baseline_limits = [0, 40, 90, 120]
int_ll = 50
int_ul = 80
amp_ll = 50
amp_ul = 80

[analysis.peak_search]
prominence = 20.0

[histogram]
bins_number = 80
domain = [-1000.0, 5000.0]
variable = "integral"

[fit]
max_peaks = 2
prominence = 0.2
fit_type = "correlated_gaussians"

[channel_map]
rows = [[[104, 0], [104, 1]], [[105, 0], [105, 1]]]

[excluded_channels]
104 = [1]
"#
        )
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("run.txt");
        fs::write(&input, "").unwrap();
        let path = dir.path().join("calib.toml");
        fs::write(&path, config_toml(&input)).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!((config.batch, config.apa), (2, 2));
        assert_eq!(config.analysis.label, "standard");
        assert_eq!(config.analysis.analyser, AnalyserKind::Basic);
        assert_eq!(config.analysis.peak_search.as_ref().unwrap().prominence, Some(20.0));
        assert_eq!(config.histogram.variable, ResultVariable::Integral);
        assert_eq!(config.fit.fit_type, FitType::CorrelatedGaussians);
        assert!((config.fit.initial_percentage - 0.1).abs() < 1e-12);
        assert_eq!(config.histogram_spec().analysis_label.as_deref(), Some("standard"));

        let map = config.channel_map().unwrap();
        assert_eq!((map.rows(), map.columns()), (2, 2));
        let excluded = config.excluded().unwrap();
        assert!(excluded[&104].contains(&1));
    }

    #[test]
    fn test_validation_failures() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("run.txt");
        let path = dir.path().join("calib.toml");

        fs::write(&path, config_toml(&input)).unwrap();
        assert!(load_config(&path).is_err(), "missing input must be rejected");

        fs::write(&input, "").unwrap();
        let bad_fit = config_toml(&input).replace("prominence = 0.2", "prominence = 1.5");
        fs::write(&path, bad_fit).unwrap();
        assert!(load_config(&path).is_err());

        let bad_map = config_toml(&input).replace("[[105, 0], [105, 1]]", "[[105, 0]]");
        fs::write(&path, bad_map).unwrap();
        assert!(load_config(&path).is_err());

        let single_bin = config_toml(&input).replace("bins_number = 80", "bins_number = 1");
        fs::write(&path, single_bin).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("bins_number"), "{}", err);

        let bad_endpoint = config_toml(&input).replace("104 = [1]", "apa = [1]");
        fs::write(&path, bad_endpoint).unwrap();
        assert!(load_config(&path).is_err());
    }
}
