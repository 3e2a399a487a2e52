//! Pearson and Spearman correlation with t-based p-values.

use crate::activity::midranks;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Fewest complete pairs for a defined correlation.
pub const MIN_PAIRS: usize = 3;

/// A correlation coefficient and its two-sided p-value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub r: f64,
    pub p_value: f64,
}

/// Pearson correlation of paired values.
///
/// `None` with fewer than [`MIN_PAIRS`] pairs or when either side has zero
/// variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<Correlation> {
    let n = x.len();
    if n != y.len() || n < MIN_PAIRS {
        return None;
    }
    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 || !cov.is_finite() {
        return None;
    }
    let r = (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0);
    Some(Correlation {
        r,
        p_value: correlation_p_value(r, n),
    })
}

/// Spearman rank correlation: Pearson on midranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<Correlation> {
    if x.len() != y.len() || x.len() < MIN_PAIRS {
        return None;
    }
    pearson(&midranks(x), &midranks(y))
}

/// Two-sided p-value of `r` from `t = r sqrt((n-2)/(1-r^2))` with n-2 df.
fn correlation_p_value(r: f64, n: usize) -> f64 {
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}
