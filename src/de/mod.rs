//! Pseudobulk differential expression per cell type.
//!
//! Every cell type with enough kept samples is fitted once with all
//! contrasts; the result is a long table of (gene, cell type, contrast)
//! statistics with local and global BH adjustment.

mod empirical;
mod engine;
mod runner;

pub use empirical::{empirical_null_pvalues, signed_z};
pub use engine::{GeneContrastStat, NbGlmEngine, PseudobulkDeEngine};
pub use runner::{
    expressed_genes, run_de, CellTypeExclusion, DeConfig, DeOutput, DeRecord, MIN_SAMPLES_PER_GROUP,
};
