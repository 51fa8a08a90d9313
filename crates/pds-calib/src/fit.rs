//! Non-linear least squares.
//!
//! Levenberg-Marquardt with a forward-difference Jacobian, solved on
//! `nalgebra` dense matrices. The damping term scales the diagonal of `JᵀJ`
//! (Marquardt's variant).
//!
//! One-sigma uncertainties come from `cov = (JᵀJ)⁻¹ · χ² / (m - n)`, evaluated
//! at the solution. With as many points as parameters the covariance cannot
//! be estimated and every uncertainty is infinite.

use crate::error::{CalibError, CalibResult};
use nalgebra::{DMatrix, DVector};

/// Solver settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LmOptions {
    /// Maximum number of accepted-or-rejected iterations.
    pub max_iterations: usize,
    /// Relative reduction of χ² below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Initial damping.
    pub lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            lambda: 1e-3,
        }
    }
}

const LAMBDA_MAX: f64 = 1e12;
const LAMBDA_MIN: f64 = 1e-12;

/// Result of a least-squares fit.
#[derive(Clone, Debug, PartialEq)]
pub struct FitOutcome {
    pub params: Vec<f64>,
    /// One-sigma uncertainties.
    pub errors: Vec<f64>,
    pub chi2: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn residuals<F>(model: &F, x: &[f64], y: &[f64], p: &[f64]) -> DVector<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    DVector::from_iterator(x.len(), x.iter().zip(y).map(|(&xi, &yi)| yi - model(xi, p)))
}

fn jacobian<F>(model: &F, x: &[f64], p: &[f64]) -> DMatrix<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let m = x.len();
    let n = p.len();
    let base: Vec<f64> = x.iter().map(|&xi| model(xi, p)).collect();
    let mut jac = DMatrix::zeros(m, n);
    let mut shifted = p.to_vec();
    for j in 0..n {
        let h = f64::EPSILON.sqrt() * p[j].abs().max(1.0);
        shifted[j] = p[j] + h;
        for i in 0..m {
            jac[(i, j)] = (model(x[i], &shifted) - base[i]) / h;
        }
        shifted[j] = p[j];
    }
    jac
}

/// Fit `model(x, params)` to `(x, y)` starting from `p0`.
///
/// Fails only on malformed input (length mismatch, fewer points than
/// parameters); a fit that does not settle is reported through
/// [`FitOutcome::converged`].
pub fn curve_fit<F>(model: F, x: &[f64], y: &[f64], p0: &[f64], options: &LmOptions) -> CalibResult<FitOutcome>
where
    F: Fn(f64, &[f64]) -> f64,
{
    if x.len() != y.len() {
        return Err(CalibError::LengthMismatch {
            what: "fit ordinates",
            expected: x.len(),
            actual: y.len(),
        });
    }
    let m = x.len();
    let n = p0.len();
    if n == 0 || m < n {
        return Err(CalibError::InsufficientData { needed: n.max(1), got: m });
    }

    let mut p = DVector::from_column_slice(p0);
    let mut r = residuals(&model, x, y, p.as_slice());
    let mut chi2 = r.norm_squared();
    if !chi2.is_finite() {
        return Ok(FitOutcome {
            params: p0.to_vec(),
            errors: vec![f64::INFINITY; n],
            chi2,
            iterations: 0,
            converged: false,
        });
    }

    let mut lambda = options.lambda;
    let mut converged = chi2 == 0.0;
    let mut iterations = 0;

    while !converged && iterations < options.max_iterations {
        iterations += 1;
        let jac = jacobian(&model, x, p.as_slice());
        let jtj = jac.transpose() * &jac;
        let gradient = jac.transpose() * &r;

        loop {
            let mut damped = jtj.clone();
            for k in 0..n {
                damped[(k, k)] += lambda * jtj[(k, k)].max(f64::EPSILON);
            }
            let step = damped.cholesky().map(|c| c.solve(&gradient));

            if let Some(step) = step {
                let candidate = &p + &step;
                let r_new = residuals(&model, x, y, candidate.as_slice());
                let chi2_new = r_new.norm_squared();
                if chi2_new.is_finite() && chi2_new <= chi2 {
                    let reduction = (chi2 - chi2_new) / chi2.max(f64::MIN_POSITIVE);
                    let small_step = step.norm() <= options.xtol * (p.norm() + options.xtol);
                    p = candidate;
                    r = r_new;
                    chi2 = chi2_new;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                    converged = reduction <= options.ftol || small_step || chi2 == 0.0;
                    break;
                }
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No downhill step exists at any damping: p is a minimum.
                converged = true;
                break;
            }
        }
    }

    let errors = uncertainties(&model, x, p.as_slice(), chi2);
    Ok(FitOutcome {
        params: p.as_slice().to_vec(),
        errors,
        chi2,
        iterations,
        converged,
    })
}

fn uncertainties<F>(model: &F, x: &[f64], p: &[f64], chi2: f64) -> Vec<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let m = x.len();
    let n = p.len();
    if m <= n {
        return vec![f64::INFINITY; n];
    }
    let jac = jacobian(model, x, p);
    let jtj = jac.transpose() * &jac;
    match jtj.try_inverse() {
        Some(inv) => {
            let scale = chi2 / (m - n) as f64;
            (0..n).map(|k| (inv[(k, k)] * scale).abs().sqrt()).collect()
        }
        None => vec![f64::INFINITY; n],
    }
}

/// `scale * exp(-((x - mean) / (2 * std))^2)`.
#[inline]
pub fn gaussian(x: f64, scale: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / (2.0 * std);
    scale * (-z * z).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_fit_is_exact() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 3.0 * xi - 2.0).collect();
        let fit = curve_fit(|xi, p| p[0] * xi + p[1], &x, &y, &[1.0, 0.0], &LmOptions::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.params[0] - 3.0).abs() < 1e-6);
        assert!((fit.params[1] + 2.0).abs() < 1e-6);
        assert!(fit.chi2 < 1e-12);
    }

    #[test]
    fn test_gaussian_fit_recovers_parameters() {
        let x: Vec<f64> = (0..41).map(|i| -20.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| gaussian(xi, 50.0, 1.5, 3.0)).collect();
        let fit = curve_fit(
            |xi, p| gaussian(xi, p[0], p[1], p[2]),
            &x,
            &y,
            &[40.0, 0.0, 2.0],
            &LmOptions::default(),
        )
        .unwrap();
        assert!(fit.converged);
        assert!((fit.params[0] - 50.0).abs() < 1e-4);
        assert!((fit.params[1] - 1.5).abs() < 1e-4);
        assert!((fit.params[2].abs() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_uncertainties_scale_with_noise() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &xi)| 2.0 * xi + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let fit = curve_fit(|xi, p| p[0] * xi + p[1], &x, &y, &[0.0, 0.0], &LmOptions::default()).unwrap();
        assert!(fit.errors.iter().all(|e| e.is_finite() && *e > 0.0));

        let exact = curve_fit(|xi, p| p[0] * xi + p[1], &x[..2], &y[..2], &[0.0, 0.0], &LmOptions::default())
            .unwrap();
        assert!(exact.errors.iter().all(|e| e.is_infinite()));
    }

    #[test]
    fn test_too_few_points() {
        let result = curve_fit(|xi, p| p[0] * xi + p[1] + p[2], &[1.0, 2.0], &[1.0, 2.0], &[0.0; 3], &LmOptions::default());
        assert!(matches!(result, Err(CalibError::InsufficientData { needed: 3, got: 2 })));
    }
}
