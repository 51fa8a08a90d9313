//! Multi-peak Gaussian fitting of calibration histograms.
//!
//! # Peak spotting
//!
//! The counts are normalised to `(counts - min) / max`, so the configured
//! prominence is a fraction of the histogram's dynamic range. Peaks are first
//! searched over a prefix of `floor(initial_percentage * bins)` bins; while
//! fewer than `max_peaks` peaks are found the prefix grows by
//! `ceil(percentage_step * bins)` bins, until the whole histogram has been
//! searched. The first `max_peaks` peaks (ascending position) are kept.
//!
//! # Fitting
//!
//! - [`FitType::IndependentGaussians`]: one Gaussian per peak, fitted over
//!   `half_points_to_fit` bins on either side of the peak bin.
//! - [`FitType::CorrelatedGaussians`]: a single fit of a sum of Gaussians
//!   whose means are equally spaced and whose variances grow linearly with
//!   the peak number; on failure the last peak is dropped and the fit retried.
//!
//! A fit reports success only if `max_peaks` peaks were spotted and every
//! selected peak was fitted with a converged fit.

use crate::error::{CalibError, CalibResult};
use crate::fit::{curve_fit, gaussian, LmOptions};
use crate::histogram::{CalibrationHistogram, GaussianFitsParameters};
use crate::peaks::{find_peaks, PeakSearch, Peaks};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Full width at half maximum of a unit Gaussian.
const FWHM_PER_SIGMA: f64 = 2.355;

/// Fitting strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitType {
    #[default]
    IndependentGaussians,
    CorrelatedGaussians,
}

/// Peak-fit configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakFitConfig {
    /// Number of peaks to spot and fit.
    pub max_peaks: usize,
    /// Minimum prominence, as a fraction of the normalised counts.
    pub prominence: f64,
    pub initial_percentage: f64,
    pub percentage_step: f64,
    /// On failure, use the last search that added a peak.
    pub return_last_addition_if_fail: bool,
    pub fit_type: FitType,
    /// Independent fits only.
    pub half_points_to_fit: usize,
    /// Correlated fits only: seed for the std increment when it can't be
    /// derived from the first two peaks.
    pub std_increment_seed_fallback: f64,
    /// Correlated fits only: fraction of the bins added around the peaks.
    pub ch_span_fraction_around_peaks: f64,
    #[serde(skip)]
    pub lm: LmOptions,
}

impl Default for PeakFitConfig {
    fn default() -> Self {
        Self {
            max_peaks: 2,
            prominence: 0.15,
            initial_percentage: 0.1,
            percentage_step: 0.1,
            return_last_addition_if_fail: false,
            fit_type: FitType::IndependentGaussians,
            half_points_to_fit: 2,
            std_increment_seed_fallback: 1e2,
            ch_span_fraction_around_peaks: 0.05,
            lm: LmOptions::default(),
        }
    }
}

fn in_open_unit(name: &str, value: f64) -> CalibResult<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(CalibError::InvalidParameter(format!(
            "{} must belong to (0, 1), got {}",
            name, value
        )))
    }
}

fn in_unit_interval(name: &str, value: f64) -> CalibResult<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(CalibError::InvalidParameter(format!(
            "{} must belong to (0, 1], got {}",
            name, value
        )))
    }
}

impl PeakFitConfig {
    pub fn validate(&self) -> CalibResult<()> {
        if self.max_peaks < 1 {
            return Err(CalibError::InvalidParameter("max_peaks must be at least 1".into()));
        }
        in_open_unit("prominence", self.prominence)?;
        in_open_unit("initial_percentage", self.initial_percentage)?;
        in_open_unit("percentage_step", self.percentage_step)?;
        match self.fit_type {
            FitType::IndependentGaussians => {
                if self.half_points_to_fit < 1 {
                    return Err(CalibError::InvalidParameter(
                        "half_points_to_fit must be at least 1".into(),
                    ));
                }
            }
            FitType::CorrelatedGaussians => {
                in_unit_interval("ch_span_fraction_around_peaks", self.ch_span_fraction_around_peaks)?;
                if !(self.std_increment_seed_fallback > 0.0) {
                    return Err(CalibError::InvalidParameter(
                        "std_increment_seed_fallback must be positive".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Spot up to `max_peaks` peaks over growing prefixes of the histogram.
///
/// Returns whether `max_peaks` peaks were found, and the peaks to fit.
pub fn spot_first_peaks(counts: &[u64], config: &PeakFitConfig) -> (bool, Peaks) {
    let n = counts.len();
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return (false, Peaks::default());
    }
    let min = counts.iter().copied().min().unwrap_or(0);
    let signal: Vec<f64> = counts
        .iter()
        .map(|&c| (c - min) as f64 / max as f64)
        .collect();

    let search = PeakSearch {
        prominence: Some(config.prominence),
        rel_height: 0.5,
        ..Default::default()
    };
    let step = ((config.percentage_step * n as f64).ceil() as usize).max(1);
    let mut points = (config.initial_percentage * n as f64).floor() as usize;
    let mut last_spotted = 0;
    let mut last_addition: Option<Peaks> = None;

    loop {
        points = points.min(n);
        let mut peaks = find_peaks(&signal[..points], &search);
        debug!(points, spotted = peaks.len(), "Peak search");

        if peaks.len() > last_spotted {
            last_addition = Some(peaks.clone());
        }
        last_spotted = peaks.len();

        if peaks.len() >= config.max_peaks {
            peaks.truncate(config.max_peaks);
            return (true, peaks);
        }
        if points == n {
            return match last_addition {
                Some(added) if config.return_last_addition_if_fail => (false, added),
                _ => (false, peaks),
            };
        }
        points += step;
    }
}

fn std_seed(width_bins: f64, mean_bin_width: f64) -> f64 {
    let seed = width_bins * mean_bin_width / FWHM_PER_SIGMA;
    if seed > 0.0 && seed.is_finite() {
        seed
    } else {
        mean_bin_width
    }
}

fn fit_independent(
    histo: &CalibrationHistogram,
    peaks: &Peaks,
    config: &PeakFitConfig,
) -> (GaussianFitsParameters, bool) {
    let centers = histo.bin_centers();
    let counts: Vec<f64> = histo.counts().iter().map(|&c| c as f64).collect();
    let n = counts.len();
    let half = config.half_points_to_fit;

    let mut params = GaussianFitsParameters::default();
    let mut fit_all = true;
    for (k, &idx) in peaks.positions.iter().enumerate() {
        let lower = idx.saturating_sub(half);
        let upper = (idx + half + 1).min(n);
        let p0 = [
            counts[idx],
            centers[idx],
            std_seed(peaks.widths[k], histo.mean_bin_width()),
        ];
        if upper - lower < p0.len() {
            warn!(peak = k, points = upper - lower, "Too few points around peak; skipping it");
            fit_all = false;
            continue;
        }

        let fit = curve_fit(
            |x, p| gaussian(x, p[0], p[1], p[2]),
            &centers[lower..upper],
            &counts[lower..upper],
            &p0,
            &config.lm,
        );
        match fit {
            Ok(fit) if fit.converged => params.push(
                (fit.params[0], fit.errors[0]),
                (fit.params[1], fit.errors[1]),
                (fit.params[2].abs(), fit.errors[2]),
            ),
            Ok(fit) => {
                warn!(peak = k, iterations = fit.iterations, "Gaussian fit did not converge; skipping peak");
                fit_all = false;
            }
            Err(e) => {
                warn!(peak = k, error = %e, "Gaussian fit failed; skipping peak");
                fit_all = false;
            }
        }
    }
    (params, fit_all)
}

/// Sum of Gaussians with means `p[0] + i * p[1]`, stds `sqrt(p[2]^2 + i * p[3]^2)`
/// and scales `p[4 + i]`.
fn correlated_gaussians(x: f64, p: &[f64]) -> f64 {
    p[4..]
        .iter()
        .enumerate()
        .map(|(i, &scale)| {
            let i = i as f64;
            let std = (p[2] * p[2] + i * p[3] * p[3]).sqrt();
            gaussian(x, scale, p[0] + i * p[1], std)
        })
        .sum()
}

fn fit_correlated(
    histo: &CalibrationHistogram,
    spotted: &Peaks,
    config: &PeakFitConfig,
) -> (GaussianFitsParameters, bool) {
    let centers = histo.bin_centers();
    let counts: Vec<f64> = histo.counts().iter().map(|&c| c as f64).collect();
    let bins = counts.len();
    let mbw = histo.mean_bin_width();
    let span = (config.ch_span_fraction_around_peaks * bins as f64).round() as usize;

    let mut peaks = spotted.clone();
    loop {
        let (Some(&first), Some(&last)) = (peaks.positions.first(), peaks.positions.last()) else {
            break;
        };
        let n = peaks.len();
        let lower = first.saturating_sub(span);
        let upper = (last + span + 1).min(bins);
        let (x, y) = (&centers[lower..upper], &counts[lower..upper]);

        let mean_0 = centers[first];
        let std_0 = std_seed(peaks.widths[0], mbw);

        if n == 1 {
            let p0 = [counts[first], mean_0, std_0];
            match curve_fit(|xi, p| gaussian(xi, p[0], p[1], p[2]), x, y, &p0, &config.lm) {
                Ok(fit) if fit.converged => {
                    let mut params = GaussianFitsParameters::default();
                    params.push(
                        (fit.params[0], fit.errors[0]),
                        (fit.params[1], fit.errors[1]),
                        (fit.params[2].abs(), fit.errors[2]),
                    );
                    return (params, n == spotted.len());
                }
                _ => {
                    warn!("Single-peak fit did not converge");
                    return (GaussianFitsParameters::default(), false);
                }
            }
        }

        let std_1 = std_seed(peaks.widths[1], mbw);
        let std_inc = if std_1 > std_0 {
            (std_1 * std_1 - std_0 * std_0).sqrt()
        } else {
            config.std_increment_seed_fallback
        };
        let mut p0 = vec![mean_0, centers[peaks.positions[1]] - mean_0, std_0, std_inc];
        p0.extend(peaks.positions.iter().map(|&idx| counts[idx]));

        let outcome = curve_fit(correlated_gaussians, x, y, &p0, &config.lm);
        match outcome {
            Ok(fit) if fit.converged => {
                let p = &fit.params;
                let e = &fit.errors;
                let mut params = GaussianFitsParameters::default();
                for i in 0..n {
                    let fi = i as f64;
                    let mean = p[0] + fi * p[1];
                    let mean_err = (e[0] * e[0] + (fi * e[1]).powi(2)).sqrt();
                    let std = (p[2] * p[2] + fi * p[3] * p[3]).sqrt();
                    let std_err = ((p[2] * e[2]).powi(2) + (fi * p[3] * e[3]).powi(2)).sqrt() / std;
                    params.push((p[4 + i], e[4 + i]), (mean, mean_err), (std, std_err));
                }
                return (params, n == spotted.len());
            }
            Ok(_) => debug!(peaks = n, "Correlated fit did not converge; dropping the last peak"),
            Err(e) => debug!(peaks = n, error = %e, "Correlated fit failed; dropping the last peak"),
        }
        peaks.pop();
    }
    (GaussianFitsParameters::default(), false)
}

/// Spot and fit peaks, replacing any previous fit of `histo`.
///
/// Returns `Ok(false)` for statistical failures (too few peaks, unconverged
/// fits); errors are reserved for invalid configuration.
pub fn fit_peaks(histo: &mut CalibrationHistogram, config: &PeakFitConfig) -> CalibResult<bool> {
    config.validate()?;
    histo.reset_gaussian_fits_parameters();

    let (found_max, peaks) = spot_first_peaks(histo.counts(), config);
    if peaks.is_empty() {
        debug!("No peak spotted");
        return Ok(false);
    }

    let (params, fit_all) = match config.fit_type {
        FitType::IndependentGaussians => fit_independent(histo, &peaks, config),
        FitType::CorrelatedGaussians => fit_correlated(histo, &peaks, config),
    };
    debug!(spotted = peaks.len(), fitted = params.len(), found_max, fit_all, "Peak fit done");
    histo.set_gaussian_fits_parameters(params);
    Ok(found_max && fit_all)
}

impl CalibrationHistogram {
    /// See [`fit_peaks`].
    pub fn fit_peaks(&mut self, config: &PeakFitConfig) -> CalibResult<bool> {
        fit_peaks(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn bimodal_samples(seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let first = Normal::new(100.0, 10.0).unwrap();
        let second = Normal::new(400.0, 15.0).unwrap();
        let mut samples: Vec<f64> = (0..1000).map(|_| first.sample(&mut rng)).collect();
        samples.extend((0..1000).map(|_| second.sample(&mut rng)));
        samples
    }

    fn bimodal_histogram() -> CalibrationHistogram {
        CalibrationHistogram::from_samples(&bimodal_samples(42), 100, [-200.0, 800.0]).unwrap()
    }

    #[test]
    fn test_bimodal_independent_fit() {
        let mut histo = bimodal_histogram();
        let config = PeakFitConfig {
            max_peaks: 2,
            prominence: 0.2,
            half_points_to_fit: 2,
            ..Default::default()
        };
        assert!(histo.fit_peaks(&config).unwrap());

        let params = histo.gaussian_fits_parameters();
        assert_eq!(params.mean.len(), 2);
        assert!((params.mean[0].0 - 100.0).abs() < 5.0);
        assert!((params.mean[1].0 - 400.0).abs() < 20.0);
        let gain = params.mean[1].0 - params.mean[0].0;
        assert!((gain - 300.0).abs() < 15.0);
    }

    #[test]
    fn test_bimodal_correlated_fit() {
        let mut histo = bimodal_histogram();
        let config = PeakFitConfig {
            max_peaks: 2,
            prominence: 0.2,
            fit_type: FitType::CorrelatedGaussians,
            ..Default::default()
        };
        assert!(histo.fit_peaks(&config).unwrap());
        let params = histo.gaussian_fits_parameters();
        assert_eq!(params.len(), 2);
        assert!((params.mean[0].0 - 100.0).abs() < 5.0);
        assert!((params.mean[1].0 - 400.0).abs() < 20.0);
        assert!(params.std[1].0 >= params.std[0].0);
    }

    #[test]
    fn test_too_many_peaks_requested() {
        let mut histo = bimodal_histogram();
        let config = PeakFitConfig {
            max_peaks: 3,
            prominence: 0.2,
            ..Default::default()
        };
        assert!(!histo.fit_peaks(&config).unwrap());
        assert_eq!(histo.gaussian_fits_parameters().len(), 2);
    }

    #[test]
    fn test_refit_resets_parameters() {
        let mut histo = bimodal_histogram();
        let two = PeakFitConfig { max_peaks: 2, prominence: 0.2, ..Default::default() };
        histo.fit_peaks(&two).unwrap();
        let one = PeakFitConfig { max_peaks: 1, ..two };
        assert!(histo.fit_peaks(&one).unwrap());
        assert_eq!(histo.gaussian_fits_parameters().len(), 1);
    }

    #[test]
    fn test_spotting_grows_the_prefix() {
        let mut counts = vec![0u64; 20];
        counts[3] = 10;
        counts[15] = 8;
        let config = PeakFitConfig {
            max_peaks: 2,
            prominence: 0.5,
            initial_percentage: 0.25,
            percentage_step: 0.25,
            ..Default::default()
        };
        let (found, peaks) = spot_first_peaks(&counts, &config);
        assert!(found);
        assert_eq!(peaks.positions, vec![3, 15]);

        let (found, peaks) = spot_first_peaks(&counts, &PeakFitConfig { max_peaks: 3, ..config.clone() });
        assert!(!found);
        assert_eq!(peaks.len(), 2);

        let (found, peaks) = spot_first_peaks(&[0; 10], &config);
        assert!(!found && peaks.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(PeakFitConfig::default().validate().is_ok());
        assert!(PeakFitConfig { max_peaks: 0, ..Default::default() }.validate().is_err());
        assert!(PeakFitConfig { prominence: 1.0, ..Default::default() }.validate().is_err());
        assert!(PeakFitConfig { percentage_step: 0.0, ..Default::default() }.validate().is_err());

        let correlated = |fraction| PeakFitConfig {
            fit_type: FitType::CorrelatedGaussians,
            ch_span_fraction_around_peaks: fraction,
            ..Default::default()
        };
        assert!(correlated(1.0).validate().is_ok());
        assert!(correlated(0.0).validate().is_err());
        assert!(correlated(1.5).validate().is_err());

        let mut histo = bimodal_histogram();
        let bad = PeakFitConfig { initial_percentage: 1.5, ..Default::default() };
        assert!(matches!(histo.fit_peaks(&bad), Err(CalibError::InvalidParameter(_))));
    }
}
