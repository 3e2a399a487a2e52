//! Wald tests of linear contrasts of GLM coefficients.

use crate::data::ContrastMatrix;
use crate::error::{NicheError, Result};
use crate::model::NbFit;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Wald test of one contrast for one gene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResultSingle {
    pub gene_id: String,
    /// `c'β` on the natural log scale.
    pub estimate: f64,
    /// `sqrt(c'Σc)`.
    pub std_error: f64,
    pub statistic: f64,
    /// Two-sided normal p-value.
    pub p_value: f64,
}

impl WaldResultSingle {
    /// Estimate converted to a log2 fold change.
    pub fn log2_estimate(&self) -> f64 {
        self.estimate / std::f64::consts::LN_2
    }
}

/// Results of one contrast over all genes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResult {
    pub contrast: String,
    pub results: Vec<WaldResultSingle>,
}

impl WaldResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn p_values(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.p_value).collect()
    }

    pub fn get_gene(&self, gene_id: &str) -> Option<&WaldResultSingle> {
        self.results.iter().find(|r| r.gene_id == gene_id)
    }
}

/// Two-sided p-value of a standard normal statistic, NaN in gives NaN out.
pub fn two_sided_p(statistic: f64) -> f64 {
    if statistic.is_nan() {
        return f64::NAN;
    }
    (2.0 * Normal::standard().sf(statistic.abs())).min(1.0)
}

/// Wald z-test of `H0: c'β = 0` for every contrast column.
///
/// Genes whose covariance could not be computed get NaN statistics.
pub fn test_wald_contrasts(fit: &NbFit, contrasts: &ContrastMatrix) -> Result<Vec<WaldResult>> {
    if contrasts.matrix.nrows() != fit.n_coefficients() {
        return Err(NicheError::DimensionMismatch {
            expected: fit.n_coefficients(),
            actual: contrasts.matrix.nrows(),
        });
    }

    Ok((0..contrasts.n_contrasts())
        .map(|j| {
            let weights = contrasts.column(j);
            let results = fit
                .fits
                .iter()
                .map(|f| {
                    let (estimate, std_error) = f.contrast(&weights).unwrap_or((f64::NAN, f64::NAN));
                    let statistic = if std_error > 0.0 && std_error.is_finite() {
                        estimate / std_error
                    } else {
                        f64::NAN
                    };
                    WaldResultSingle {
                        gene_id: f.gene_id.clone(),
                        estimate,
                        std_error,
                        statistic,
                        p_value: two_sided_p(statistic),
                    }
                })
                .collect();
            WaldResult {
                contrast: contrasts.names[j].clone(),
                results,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, DesignMatrix};
    use crate::model::model_nb;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn fitted() -> NbFit {
        let control = [48u64, 52, 47, 53];
        let treated = [195u64, 205, 198, 202];
        let mut triplets = Vec::new();
        for s in 0..4 {
            triplets.push((0, s, control[s]));
            triplets.push((0, s + 4, treated[s]));
            triplets.push((1, s, 100 + s as u64));
            triplets.push((1, s + 4, 101 + s as u64));
        }
        let samples: Vec<String> = (1..=8).map(|i| format!("S{}", i)).collect();
        let counts = CountMatrix::from_triplets(vec!["up".into(), "flat".into()], samples.clone(), triplets)
            .unwrap();
        let mut m = DMatrix::zeros(8, 2);
        for s in 0..8 {
            m[(s, s / 4)] = 1.0;
        }
        let design =
            DesignMatrix::from_matrix(m, vec!["groupCtrl".into(), "groupTrt".into()], samples).unwrap();
        model_nb(&counts, &design, &[0.0; 8]).unwrap()
    }

    fn contrast_matrix() -> ContrastMatrix {
        ContrastMatrix {
            matrix: DMatrix::from_column_slice(2, 2, &[-1.0, 1.0, 1.0, -1.0]),
            names: vec!["Trt-Ctrl".into(), "Ctrl-Trt".into()],
        }
    }

    #[test]
    fn test_wald_contrasts() {
        let results = super::test_wald_contrasts(&fitted(), &contrast_matrix()).unwrap();
        assert_eq!(results.len(), 2);

        let up = results[0].get_gene("up").unwrap();
        assert_relative_eq!(up.log2_estimate(), 2.0, epsilon = 0.05);
        assert!(up.p_value < 1e-3);

        let flat = results[0].get_gene("flat").unwrap();
        assert!(flat.p_value > 0.05);

        // Opposite contrast flips the sign and keeps the p-value
        let down = results[1].get_gene("up").unwrap();
        assert_relative_eq!(down.estimate, -up.estimate, epsilon = 1e-12);
        assert_relative_eq!(down.p_value, up.p_value, epsilon = 1e-12);
    }

    #[test]
    fn test_wald_dimension_mismatch() {
        let cm = ContrastMatrix {
            matrix: DMatrix::from_column_slice(3, 1, &[1.0, -1.0, 0.0]),
            names: vec!["x".into()],
        };
        assert!(super::test_wald_contrasts(&fitted(), &cm).is_err());
    }

    #[test]
    fn test_two_sided_p() {
        assert_relative_eq!(two_sided_p(0.0), 1.0);
        assert_relative_eq!(two_sided_p(1.959964), 0.05, epsilon = 1e-5);
        assert!(two_sided_p(f64::NAN).is_nan());
    }
}
