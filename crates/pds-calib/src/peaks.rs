//! Generic 1-D peak finding.
//!
//! Local maxima (plateau-aware) are located first, then filtered by height,
//! prominence and width. Prominences and widths are always computed since
//! the peak-fit engine seeds its Gaussian widths from them.
//!
//! # Definitions
//!
//! - **Prominence**: height of the peak above the higher of the two minima
//!   reached when walking away from it until a higher sample (or the signal
//!   edge) is met. The positions of those minima are the peak's bases.
//! - **Width**: distance between the interpolated crossings of the level
//!   `x[peak] - rel_height * prominence`, searched between the bases.

use serde::{Deserialize, Serialize};

/// Filters applied by [`find_peaks`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakSearch {
    /// Minimum peak height.
    pub height: Option<f64>,
    /// Minimum prominence.
    pub prominence: Option<f64>,
    /// Relative height at which widths are measured.
    pub rel_height: f64,
    /// Minimum width, in samples.
    pub min_width: Option<f64>,
    /// Maximum width, in samples.
    pub max_width: Option<f64>,
}

impl Default for PeakSearch {
    fn default() -> Self {
        Self {
            height: None,
            prominence: None,
            rel_height: 0.5,
            min_width: None,
            max_width: None,
        }
    }
}

/// Peaks found in a signal, with their properties, in ascending position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Peaks {
    pub positions: Vec<usize>,
    pub prominences: Vec<f64>,
    pub left_bases: Vec<usize>,
    pub right_bases: Vec<usize>,
    pub widths: Vec<f64>,
    pub width_heights: Vec<f64>,
    pub left_ips: Vec<f64>,
    pub right_ips: Vec<f64>,
}

impl Peaks {
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Keep only the first `n` peaks.
    pub fn truncate(&mut self, n: usize) {
        self.positions.truncate(n);
        self.prominences.truncate(n);
        self.left_bases.truncate(n);
        self.right_bases.truncate(n);
        self.widths.truncate(n);
        self.width_heights.truncate(n);
        self.left_ips.truncate(n);
        self.right_ips.truncate(n);
    }

    /// Drop the last peak, if any.
    pub fn pop(&mut self) {
        let n = self.len().saturating_sub(1);
        self.truncate(n);
    }

    fn retain_by(&mut self, keep: &[bool]) {
        fn apply<T: Copy>(values: &mut Vec<T>, keep: &[bool]) {
            let mut flags = keep.iter();
            values.retain(|_| flags.next().copied().unwrap_or(false));
        }
        apply(&mut self.positions, keep);
        apply(&mut self.prominences, keep);
        apply(&mut self.left_bases, keep);
        apply(&mut self.right_bases, keep);
        apply(&mut self.widths, keep);
        apply(&mut self.width_heights, keep);
        apply(&mut self.left_ips, keep);
        apply(&mut self.right_ips, keep);
    }
}

/// Indices of local maxima; flat tops report their (floored) midpoint.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let n = x.len();
    let mut midpoints = Vec::new();
    if n < 3 {
        return midpoints;
    }

    let mut i = 1;
    let i_max = n - 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && x[i_ahead] == x[i] {
                i_ahead += 1;
            }
            if x[i_ahead] < x[i] {
                let left_edge = i;
                let right_edge = i_ahead - 1;
                midpoints.push((left_edge + right_edge) / 2);
                i = i_ahead;
            }
        }
        i += 1;
    }
    midpoints
}

/// Prominence and bases of one peak.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    let mut j = peak;
    while j < x.len() && x[j] <= height {
        if x[j] < right_min {
            right_min = x[j];
            right_base = j;
        }
        j += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width of one peak at `rel_height`, with the height and interpolated crossings.
fn width(
    x: &[f64],
    peak: usize,
    prominence: f64,
    rel_height: f64,
    left_base: usize,
    right_base: usize,
) -> (f64, f64, f64, f64) {
    let height = x[peak] - prominence * rel_height;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut j = peak;
    while j < right_base && height < x[j] {
        j += 1;
    }
    let mut right_ip = j as f64;
    if x[j] < height {
        right_ip -= (height - x[j]) / (x[j - 1] - x[j]);
    }

    (right_ip - left_ip, height, left_ip, right_ip)
}

/// Find the peaks of `x` that pass the filters in `search`.
pub fn find_peaks(x: &[f64], search: &PeakSearch) -> Peaks {
    let mut candidates = local_maxima(x);
    if let Some(min_height) = search.height {
        candidates.retain(|&p| x[p] >= min_height);
    }

    let mut peaks = Peaks::default();
    for &p in &candidates {
        let (prom, lb, rb) = prominence(x, p);
        peaks.positions.push(p);
        peaks.prominences.push(prom);
        peaks.left_bases.push(lb);
        peaks.right_bases.push(rb);
    }

    if let Some(min_prominence) = search.prominence {
        let keep: Vec<bool> = peaks.prominences.iter().map(|&p| p >= min_prominence).collect();
        peaks.retain_by(&keep);
    }

    for k in 0..peaks.len() {
        let (w, h, l, r) = width(
            x,
            peaks.positions[k],
            peaks.prominences[k],
            search.rel_height,
            peaks.left_bases[k],
            peaks.right_bases[k],
        );
        peaks.widths.push(w);
        peaks.width_heights.push(h);
        peaks.left_ips.push(l);
        peaks.right_ips.push(r);
    }

    if search.min_width.is_some() || search.max_width.is_some() {
        let lo = search.min_width.unwrap_or(f64::NEG_INFINITY);
        let hi = search.max_width.unwrap_or(f64::INFINITY);
        let keep: Vec<bool> = peaks.widths.iter().map(|&w| w >= lo && w <= hi).collect();
        peaks.retain_by(&keep);
    }

    peaks
}
