//! Negative binomial GLM for pseudobulk counts.
//!
//! Log link with per-sample offsets (log library sizes). Each gene is first
//! fitted with its own method-of-moments dispersion, the per-gene estimates
//! are then shrunk towards the common dispersion of the cell type and the
//! final fit is refitted with the moderated value held fixed.

use crate::data::{CountMatrix, DesignMatrix};
use crate::error::{NicheError, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Maximum iterations for IRLS convergence.
const MAX_ITER: usize = 50;

/// Convergence tolerance for coefficient changes.
const TOL: f64 = 1e-8;

/// Minimum value for mean to avoid log(0).
const MIN_MU: f64 = 1e-10;

/// Bounds on the dispersion `phi` (Var = mu + phi * mu^2).
const MIN_PHI: f64 = 1e-8;
const MAX_PHI: f64 = 1e4;

/// Prior degrees of freedom given to the common dispersion when moderating.
pub const DISPERSION_PRIOR_DF: f64 = 10.0;

/// Fit of one gene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbFitSingle {
    pub gene_id: String,
    /// Estimated coefficients (natural log scale).
    pub coefficients: Vec<f64>,
    /// Inverse Fisher information at convergence, `None` when singular.
    #[serde(skip)]
    pub covariance: Option<DMatrix<f64>>,
    /// Moderated dispersion used for the final fit.
    pub dispersion: f64,
    /// Gene-wise method-of-moments dispersion before moderation.
    pub raw_dispersion: f64,
    pub log_likelihood: f64,
    pub deviance: f64,
    pub df_residual: usize,
    pub iterations: usize,
    pub converged: bool,
    #[serde(skip)]
    pub fitted_values: Vec<f64>,
}

impl NbFitSingle {
    /// Standard error of a coefficient.
    pub fn std_error(&self, index: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        (index < cov.nrows()).then(|| cov[(index, index)].max(0.0).sqrt())
    }

    /// Estimate and standard error of the linear combination `c'β`.
    pub fn contrast(&self, weights: &[f64]) -> Option<(f64, f64)> {
        let cov = self.covariance.as_ref()?;
        if weights.len() != self.coefficients.len() {
            return None;
        }
        let c = DVector::from_column_slice(weights);
        let beta = DVector::from_column_slice(&self.coefficients);
        let estimate = c.dot(&beta);
        let variance = (c.transpose() * cov * &c)[(0, 0)];
        Some((estimate, variance.max(0.0).sqrt()))
    }
}

/// Fits for every gene of one pseudobulk matrix.
#[derive(Debug, Clone)]
pub struct NbFit {
    pub fits: Vec<NbFitSingle>,
    pub coefficient_names: Vec<String>,
    pub n_samples: usize,
    /// Common dispersion the gene-wise values were moderated towards.
    pub common_dispersion: f64,
}

impl NbFit {
    pub fn get_gene(&self, gene_id: &str) -> Option<&NbFitSingle> {
        self.fits.iter().find(|f| f.gene_id == gene_id)
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    pub fn n_genes(&self) -> usize {
        self.fits.len()
    }

    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names.len()
    }

    pub fn n_converged(&self) -> usize {
        self.fits.iter().filter(|f| f.converged).count()
    }
}

/// Fit a negative binomial GLM to every gene.
///
/// # Arguments
/// * `counts` - Pseudobulk counts (genes × samples)
/// * `design` - Design matrix, rows in the same sample order as `counts`
/// * `offsets` - Per-sample offset added to the linear predictor
pub fn model_nb(counts: &CountMatrix, design: &DesignMatrix, offsets: &[f64]) -> Result<NbFit> {
    let n_genes = counts.n_genes();
    let n_samples = counts.n_columns();
    let n_coef = design.n_coefficients();

    if design.n_samples() != n_samples {
        return Err(NicheError::DimensionMismatch {
            expected: n_samples,
            actual: design.n_samples(),
        });
    }
    if offsets.len() != n_samples {
        return Err(NicheError::DimensionMismatch {
            expected: n_samples,
            actual: offsets.len(),
        });
    }
    if offsets.iter().any(|o| !o.is_finite()) {
        return Err(NicheError::Numerical(
            "Offsets must be finite (is a library size zero?)".to_string(),
        ));
    }
    let df_residual = n_samples.saturating_sub(n_coef);
    if df_residual == 0 {
        return Err(NicheError::Numerical(
            "Model is saturated (n_samples <= n_coefficients)".to_string(),
        ));
    }

    let x = design.matrix();
    let offsets = DVector::from_column_slice(offsets);
    let xtx_inv = (x.transpose() * x).try_inverse().ok_or_else(|| {
        NicheError::Numerical("Design matrix is not of full column rank".to_string())
    })?;

    let responses: Vec<DVector<f64>> = (0..n_genes)
        .map(|i| DVector::from_iterator(n_samples, counts.row_dense(i).into_iter().map(|c| c as f64)))
        .collect();

    // Pass 1: gene-wise dispersion from a fit with the dispersion re-estimated
    // at each iteration.
    let raw: Vec<f64> = responses
        .par_iter()
        .map(|y| {
            let start = initial_beta(y, x, &offsets, &xtx_inv);
            let (beta, _, _) = irls(y, x, &offsets, start, None, df_residual);
            let mu = compute_mu(x, &beta, &offsets);
            estimate_dispersion_mom(y, &mu, df_residual)
        })
        .collect();

    let common = common_dispersion(&raw);
    debug!(
        "NB fit of {} genes x {} samples, common dispersion {:.4}",
        n_genes, n_samples, common
    );

    // Pass 2: refit with the moderated dispersion held fixed.
    let df = df_residual as f64;
    let fits: Vec<NbFitSingle> = responses
        .par_iter()
        .zip(raw.par_iter())
        .enumerate()
        .map(|(i, (y, &raw_phi))| {
            let phi = (DISPERSION_PRIOR_DF * common + df * raw_phi) / (DISPERSION_PRIOR_DF + df);
            let start = initial_beta(y, x, &offsets, &xtx_inv);
            let (beta, iterations, converged) = irls(y, x, &offsets, start, Some(phi), df_residual);
            let mu = compute_mu(x, &beta, &offsets);
            let covariance = fisher_information(x, &mu, phi).try_inverse();
            NbFitSingle {
                gene_id: counts.gene_ids()[i].clone(),
                coefficients: beta.iter().copied().collect(),
                covariance,
                dispersion: phi,
                raw_dispersion: raw_phi,
                log_likelihood: nb_log_likelihood(y, &mu, phi),
                deviance: nb_deviance(y, &mu, phi),
                df_residual,
                iterations,
                converged,
                fitted_values: mu.iter().copied().collect(),
            }
        })
        .collect();

    Ok(NbFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples,
        common_dispersion: common,
    })
}

/// Least-squares start on `log(y + 0.5) - offset`.
fn initial_beta(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    offsets: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
) -> DVector<f64> {
    let z = DVector::from_iterator(
        y.len(),
        y.iter().zip(offsets.iter()).map(|(&yi, &o)| (yi + 0.5).ln() - o),
    );
    xtx_inv * (x.transpose() * z)
}

/// IRLS with log link. With `fixed_phi` set the dispersion is held constant,
/// otherwise it is re-estimated after every step.
fn irls(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    offsets: &DVector<f64>,
    mut beta: DVector<f64>,
    fixed_phi: Option<f64>,
    df_residual: usize,
) -> (DVector<f64>, usize, bool) {
    let n_samples = y.len();
    let mut mu = compute_mu(x, &beta, offsets);
    let mut phi = fixed_phi.unwrap_or_else(|| estimate_dispersion_mom(y, &mu, df_residual));
    let mut iterations = 0;

    for iter in 0..MAX_ITER {
        iterations = iter + 1;

        // Working weights W = mu / (1 + phi*mu) and response z = eta - o + (y - mu)/mu
        let w_sqrt = DVector::from_iterator(n_samples, mu.iter().map(|&m| (m / (1.0 + phi * m)).sqrt()));
        let z = DVector::from_iterator(
            n_samples,
            (0..n_samples).map(|i| {
                let m = mu[i].max(MIN_MU);
                m.ln() - offsets[i] + (y[i] - m) / m
            }),
        );

        let mut xw = x.clone();
        for (i, mut row) in xw.row_iter_mut().enumerate() {
            row *= w_sqrt[i];
        }
        let zw = z.component_mul(&w_sqrt);

        let Some(inv) = (xw.transpose() * &xw).try_inverse() else {
            return (beta, iterations, false);
        };
        let beta_new = inv * (xw.transpose() * zw);
        if beta_new.iter().any(|b| !b.is_finite()) {
            return (beta, iterations, false);
        }

        let delta: f64 = (&beta_new - &beta).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta.iter().map(|b| b.abs()).sum::<f64>().max(1.0);

        beta = beta_new;
        mu = compute_mu(x, &beta, offsets);
        if fixed_phi.is_none() {
            phi = estimate_dispersion_mom(y, &mu, df_residual);
        }

        if delta / scale < TOL {
            return (beta, iterations, true);
        }
    }
    (beta, iterations, false)
}

/// `X' W X` with NB working weights.
fn fisher_information(x: &DMatrix<f64>, mu: &DVector<f64>, phi: f64) -> DMatrix<f64> {
    let mut xw = x.clone();
    for (i, mut row) in xw.row_iter_mut().enumerate() {
        row *= (mu[i] / (1.0 + phi * mu[i])).sqrt();
    }
    xw.transpose() * &xw
}

/// mu = exp(X * beta + offset).
fn compute_mu(x: &DMatrix<f64>, beta: &DVector<f64>, offsets: &DVector<f64>) -> DVector<f64> {
    let eta = x * beta + offsets;
    DVector::from_iterator(eta.len(), eta.iter().map(|e| e.exp().max(MIN_MU)))
}

/// Method-of-moments dispersion: `sum(((y - mu)^2 - mu) / mu^2) / df`.
fn estimate_dispersion_mom(y: &DVector<f64>, mu: &DVector<f64>, df_residual: usize) -> f64 {
    let excess: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            ((yi - m).powi(2) - m) / (m * m)
        })
        .sum();
    (excess / df_residual.max(1) as f64).clamp(MIN_PHI, MAX_PHI)
}

/// Median of the finite gene-wise dispersions.
fn common_dispersion(raw: &[f64]) -> f64 {
    let mut finite: Vec<f64> = raw.iter().copied().filter(|d| d.is_finite()).collect();
    if finite.is_empty() {
        return MIN_PHI;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let n = finite.len();
    if n % 2 == 1 {
        finite[n / 2]
    } else {
        0.5 * (finite[n / 2 - 1] + finite[n / 2])
    }
}

fn nb_log_likelihood(y: &DVector<f64>, mu: &DVector<f64>, phi: f64) -> f64 {
    let t = 1.0 / phi;
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            ln_gamma(yi + t) - ln_gamma(t) - ln_gamma(yi + 1.0)
                + t * (t / (t + m)).ln()
                + yi * (m / (t + m)).ln()
        })
        .sum()
}

fn nb_deviance(y: &DVector<f64>, mu: &DVector<f64>, phi: f64) -> f64 {
    let t = 1.0 / phi;
    let dev_sum: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            let term1 = if yi > 0.0 { yi * (yi / m).ln() } else { 0.0 };
            let term2 = (yi + t) * ((yi + t) / (m + t)).ln();
            term1 - term2
        })
        .sum();
    2.0 * dev_sum
}
