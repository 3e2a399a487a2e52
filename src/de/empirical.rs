//! Empirical-null recalibration of DE p-values.

use crate::test::two_sided_p;
use statrs::distribution::{ContinuousCDF, Normal};

/// Consistency constant turning a MAD into a normal standard deviation.
const MAD_SCALE: f64 = 1.4826;

/// Smallest p-value fed to the quantile function.
const MIN_P: f64 = 1e-300;

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Signed z-scores `sign(logFC) * -Φ⁻¹(p/2)`; NaN where either input is.
///
/// The magnitude comes from the lower tail so p-values below machine
/// epsilon still give finite scores.
pub fn signed_z(logfc: &[f64], p_val: &[f64]) -> Vec<f64> {
    let normal = Normal::standard();
    logfc
        .iter()
        .zip(p_val)
        .map(|(&lfc, &p)| {
            if !lfc.is_finite() || !p.is_finite() {
                return f64::NAN;
            }
            let magnitude = -normal.inverse_cdf(p.clamp(MIN_P, 1.0) / 2.0);
            if lfc > 0.0 {
                magnitude
            } else if lfc < 0.0 {
                -magnitude
            } else {
                0.0
            }
        })
        .collect()
}

/// Recompute p-values against a null fitted to the observed z-scores.
///
/// The null location is the median z and the scale 1.4826 × MAD. With fewer
/// than three finite z-scores, or a zero scale, the input p-values are
/// returned unchanged.
pub fn empirical_null_pvalues(logfc: &[f64], p_val: &[f64]) -> Vec<f64> {
    let z = signed_z(logfc, p_val);
    let mut finite: Vec<f64> = z.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 3 {
        return p_val.to_vec();
    }
    let location = median(&mut finite);
    let mut deviations: Vec<f64> = finite.iter().map(|v| (v - location).abs()).collect();
    let scale = MAD_SCALE * median(&mut deviations);
    if scale.is_nan() || scale <= 0.0 {
        return p_val.to_vec();
    }
    z.iter()
        .map(|&zi| {
            if zi.is_finite() {
                two_sided_p((zi - location) / scale)
            } else {
                f64::NAN
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_signed_z() {
        let z = signed_z(&[1.0, -1.0, 0.5, f64::NAN], &[0.05, 0.05, 1.0, 0.1]);
        assert_relative_eq!(z[0], 1.959964, epsilon = 1e-5);
        assert_relative_eq!(z[1], -1.959964, epsilon = 1e-5);
        assert_relative_eq!(z[2], 0.0, epsilon = 1e-12);
        assert!(z[3].is_nan());
    }

    #[test]
    fn test_standard_null_is_identity() {
        // z-scores whose median is 0 and MAD-scale 1 leave p-values unchanged
        let q = 0.6744897501960817; // Φ⁻¹(0.75): MAD of N(0,1)
        let z = [-2.0 * q, -q, 0.0, q, 2.0 * q];
        let normal = Normal::standard();
        let lfc: Vec<f64> = z.iter().map(|&v: &f64| if v == 0.0 { 0.0 } else { v.signum() }).collect();
        let p: Vec<f64> = z.iter().map(|v: &f64| 2.0 * normal.sf(v.abs())).collect();
        let adjusted = empirical_null_pvalues(&lfc, &p);
        // MAD of [-2q,-q,0,q,2q] is q, so scale = 1.4826 q ≈ 1
        for (a, b) in adjusted.iter().zip(&p) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_inflated_statistics_are_deflated() {
        // All genes look strongly DE: the empirical null absorbs the shift.
        let lfc = vec![1.0; 7];
        let p = vec![1e-4, 2e-4, 5e-4, 1e-3, 2e-3, 5e-3, 1e-2];
        let adjusted = empirical_null_pvalues(&lfc, &p);
        let median_p = {
            let mut a = adjusted.clone();
            median(&mut a)
        };
        assert!(median_p > 0.4);
    }

    #[test]
    fn test_tiny_p_values_stay_finite() {
        let z = signed_z(&[3.0, -2.0], &[1e-20, 0.0]);
        assert!(z[0].is_finite() && z[0] > 9.0);
        assert!(z[1].is_finite() && z[1] < -30.0);

        let lfc = [3.0, 0.1, -0.2, 0.3, 1.0, -0.4, -5.0];
        let p = [1e-20, 0.5, 0.4, 0.6, 0.01, 0.3, 0.0];
        let adjusted = empirical_null_pvalues(&lfc, &p);
        for q in &adjusted {
            assert!(q.is_finite() && (0.0..=1.0).contains(q), "{}", q);
        }
        assert!(adjusted[0] < adjusted[4]);
        assert!(adjusted[6] < adjusted[4]);
    }

    #[test]
    fn test_too_few_values_unchanged() {
        let p = vec![0.01, 0.2];
        assert_eq!(empirical_null_pvalues(&[1.0, -1.0], &p), p);
    }
}
