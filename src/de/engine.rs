//! Pluggable pseudobulk differential expression engines.

use crate::data::{ContrastMatrix, CountMatrix, DesignMatrix};
use crate::error::Result;
use crate::model::model_nb;
use crate::test::test_wald_contrasts;

/// Statistics of one gene under one contrast.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneContrastStat {
    pub gene: String,
    pub contrast: String,
    /// log2 fold change.
    pub logfc: f64,
    pub p_val: f64,
}

/// A pseudobulk DE model: counts + design + contrasts in, per-gene
/// per-contrast log fold changes and p-values out.
///
/// Engines are shared across worker threads, one call per cell type.
pub trait PseudobulkDeEngine: Sync {
    /// Fit one cell type.
    ///
    /// `library_sizes` are the total counts of each sample over all genes,
    /// in the column order of `counts`.
    fn fit(
        &self,
        counts: &CountMatrix,
        design: &DesignMatrix,
        contrasts: &ContrastMatrix,
        library_sizes: &[f64],
    ) -> Result<Vec<GeneContrastStat>>;

    fn name(&self) -> &str;
}

/// Negative binomial GLM with log library-size offsets and Wald contrast tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NbGlmEngine;

impl PseudobulkDeEngine for NbGlmEngine {
    fn fit(
        &self,
        counts: &CountMatrix,
        design: &DesignMatrix,
        contrasts: &ContrastMatrix,
        library_sizes: &[f64],
    ) -> Result<Vec<GeneContrastStat>> {
        let offsets: Vec<f64> = library_sizes.iter().map(|l| l.ln()).collect();
        let fit = model_nb(counts, design, &offsets)?;
        let wald = test_wald_contrasts(&fit, contrasts)?;
        Ok(wald
            .into_iter()
            .flat_map(|w| {
                let contrast = w.contrast;
                w.results.into_iter().map(move |r| GeneContrastStat {
                    logfc: r.log2_estimate(),
                    p_val: r.p_value,
                    gene: r.gene_id,
                    contrast: contrast.clone(),
                })
            })
            .collect())
    }

    fn name(&self) -> &str {
        "nb-glm"
    }
}
