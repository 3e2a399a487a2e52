//! Per-cell-type differential expression across all contrasts.

use super::empirical::empirical_null_pvalues;
use super::engine::PseudobulkDeEngine;
use crate::abundance::PseudobulkTable;
use crate::correct::{correct_bh, n_significant};
use crate::data::table::{finite, na};
use crate::data::{
    CellAnnotation, ContrastSet, DesignMatrix, Formula, Metadata, Variable, VariableType,
};
use crate::error::Result;
use crate::parallel;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Name of the group factor in the sample-level design.
const GROUP_TERM: &str = "group";

/// Minimum kept samples per contrast group for a cell type to be tested.
pub const MIN_SAMPLES_PER_GROUP: usize = 2;

/// DE stage options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    /// Replace model p-values by empirical-null p-values.
    pub empirical_null: bool,
    /// Share of the smallest group's samples that must express a gene.
    pub min_sample_prop: f64,
    /// Minimum fraction of expressing cells for a sample to express a gene.
    pub fraction_cutoff: f64,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            empirical_null: false,
            min_sample_prop: 0.5,
            fraction_cutoff: 0.05,
        }
    }
}

/// Statistics of one gene in one cell type under one contrast.
///
/// Statistics the engine could not estimate are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeRecord {
    pub gene: String,
    pub celltype: String,
    pub contrast: String,
    #[serde(serialize_with = "na")]
    pub logfc: Option<f64>,
    #[serde(serialize_with = "na")]
    pub p_val: Option<f64>,
    /// BH within (cell type, contrast).
    #[serde(serialize_with = "na")]
    pub p_adj_loc: Option<f64>,
    /// BH over every tested gene, cell type and contrast.
    #[serde(serialize_with = "na")]
    pub p_adj: Option<f64>,
}

/// A cell type left out of the DE table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTypeExclusion {
    pub celltype: String,
    pub reason: String,
}

/// Everything the DE stage produces.
#[derive(Debug, Clone, Default)]
pub struct DeOutput {
    pub records: Vec<DeRecord>,
    /// Expressed genes of every tested cell type.
    pub expressed: BTreeMap<String, BTreeSet<String>>,
    pub excluded: Vec<CellTypeExclusion>,
}

impl DeOutput {
    /// Whether a cell type made it into the DE table.
    pub fn is_tested(&self, celltype: &str) -> bool {
        self.expressed.contains_key(celltype)
    }

    /// Records of one cell type under one contrast.
    pub fn records_for<'a>(
        &'a self,
        celltype: &'a str,
        contrast: &'a str,
    ) -> impl Iterator<Item = &'a DeRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.celltype == celltype && r.contrast == contrast)
    }

    /// Index by (cell type, contrast, gene).
    pub fn lookup(&self) -> HashMap<(&str, &str, &str), &DeRecord> {
        self.records
            .iter()
            .map(|r| ((r.celltype.as_str(), r.contrast.as_str(), r.gene.as_str()), r))
            .collect()
    }
}

/// Genes expressed in a cell type.
///
/// A gene is expressed when at least `ceil(min_sample_prop * n_min)` of the
/// given columns have `frac >= fraction_cutoff`, `n_min` being the smallest
/// number of columns per group.
pub fn expressed_genes(
    table: &PseudobulkTable,
    columns: &[usize],
    config: &DeConfig,
) -> Vec<usize> {
    let mut per_group: BTreeMap<usize, usize> = BTreeMap::new();
    for &j in columns {
        *per_group.entry(table.cells()[j].group_idx).or_insert(0) += 1;
    }
    let n_min = per_group.values().copied().min().unwrap_or(0);
    let required = ((config.min_sample_prop * n_min as f64).ceil() as usize).max(1);

    (0..table.genes().len())
        .filter(|&gene| {
            columns
                .iter()
                .filter(|&&j| table.frac(gene, j) >= config.fraction_cutoff)
                .count()
                >= required
        })
        .collect()
}

/// Sample-level design table of the given pseudobulk columns.
fn sample_metadata(table: &PseudobulkTable, annotation: &CellAnnotation, columns: &[usize]) -> Result<Metadata> {
    let infos: Vec<_> = columns
        .iter()
        .map(|&j| &annotation.samples()[table.cells()[j].sample_idx])
        .collect();

    let mut design_columns = vec![(
        GROUP_TERM.to_string(),
        VariableType::Categorical,
        infos.iter().map(|s| Variable::Categorical(s.group.clone())).collect(),
    )];
    for (b, name) in annotation.batch_names().iter().enumerate() {
        let values = infos
            .iter()
            .map(|s| match &s.batches[b] {
                Some(level) => Variable::Categorical(level.clone()),
                None => Variable::Missing,
            })
            .collect();
        design_columns.push((name.clone(), VariableType::Categorical, values));
    }
    for (c, name) in annotation.covariate_names().iter().enumerate() {
        let values = infos
            .iter()
            .map(|s| match s.covariates[c] {
                Some(x) => Variable::Continuous(x),
                None => Variable::Missing,
            })
            .collect();
        design_columns.push((name.clone(), VariableType::Continuous, values));
    }
    Metadata::from_columns(infos.iter().map(|s| s.sample.clone()).collect(), design_columns)
}

struct CellTypeResult {
    records: Vec<DeRecord>,
    expressed: BTreeSet<String>,
}

type Outcome = std::result::Result<CellTypeResult, String>;

fn test_celltype(
    celltype: usize,
    table: &PseudobulkTable,
    annotation: &CellAnnotation,
    contrasts: &ContrastSet,
    engine: &dyn PseudobulkDeEngine,
    config: &DeConfig,
) -> Outcome {
    let name = &annotation.celltypes()[celltype];
    let columns = table.kept_columns(celltype);

    for group in contrasts.groups() {
        let n = columns
            .iter()
            .filter(|&&j| table.cells()[j].group == group)
            .count();
        if n < MIN_SAMPLES_PER_GROUP {
            return Err(format!(
                "group '{}' has {} kept sample(s), at least {} required",
                group, n, MIN_SAMPLES_PER_GROUP
            ));
        }
    }

    let metadata = sample_metadata(table, annotation, &columns).map_err(|e| e.to_string())?;
    let formula = Formula::group_means(GROUP_TERM, annotation.batch_names(), annotation.covariate_names());
    let design = DesignMatrix::from_formula(&metadata, &formula).map_err(|e| e.to_string())?;
    if !design.is_estimable() {
        return Err("design matrix is rank deficient".to_string());
    }
    if design.n_samples() <= design.n_coefficients() {
        return Err(format!(
            "{} samples leave no residual degrees of freedom for {} coefficients",
            design.n_samples(),
            design.n_coefficients()
        ));
    }
    let contrast_matrix = contrasts
        .matrix(design.coefficient_names(), |g| format!("{}{}", GROUP_TERM, g))
        .map_err(|e| e.to_string())?;

    let expressed = expressed_genes(table, &columns, config);
    if expressed.is_empty() {
        return Err("no expressed genes".to_string());
    }

    let samples = table.counts().subset_columns(&columns).map_err(|e| e.to_string())?;
    let library_sizes: Vec<f64> = samples.col_sums().into_iter().map(|s| s as f64).collect();
    let counts = samples.subset_genes(&expressed).map_err(|e| e.to_string())?;

    debug!(
        "Fitting {} on {} genes x {} samples with {}",
        name,
        counts.n_genes(),
        counts.n_columns(),
        engine.name()
    );
    let stats = engine
        .fit(&counts, &design, &contrast_matrix, &library_sizes)
        .map_err(|e| format!("model fit failed: {}", e))?;

    let mut records = Vec::with_capacity(stats.len());
    for contrast in contrasts.names() {
        let block: Vec<_> = stats.iter().filter(|s| s.contrast == contrast).collect();
        let logfc: Vec<f64> = block.iter().map(|s| s.logfc).collect();
        let mut p_val: Vec<f64> = block.iter().map(|s| s.p_val).collect();
        if config.empirical_null {
            p_val = empirical_null_pvalues(&logfc, &p_val);
        }
        let p_adj_loc = correct_bh(&p_val);
        for (i, s) in block.iter().enumerate() {
            records.push(DeRecord {
                gene: s.gene.clone(),
                celltype: name.clone(),
                contrast: contrast.to_string(),
                logfc: finite(logfc[i]),
                p_val: finite(p_val[i]),
                p_adj_loc: finite(p_adj_loc[i]),
                p_adj: None,
            });
        }
    }

    Ok(CellTypeResult {
        records,
        expressed: expressed.iter().map(|&g| table.genes()[g].clone()).collect(),
    })
}

/// Run the DE engine on every cell type of the pseudobulk table.
///
/// Contrast groups are checked against the data before anything is fitted.
/// Cell types with fewer than two kept samples in a contrast group, or whose
/// fit fails, are excluded with a warning; they never abort the run.
pub fn run_de(
    table: &PseudobulkTable,
    annotation: &CellAnnotation,
    contrasts: &ContrastSet,
    engine: &dyn PseudobulkDeEngine,
    config: &DeConfig,
    n_threads: Option<usize>,
) -> Result<DeOutput> {
    contrasts.validate_groups(annotation.groups())?;

    let celltypes = table.celltype_indices();
    info!(
        "Differential expression for {} cell types and {} contrasts",
        celltypes.len(),
        contrasts.len()
    );

    let outcomes: Vec<(usize, Outcome)> = parallel::install(n_threads, || {
        celltypes
            .par_iter()
            .map(|&ct| (ct, test_celltype(ct, table, annotation, contrasts, engine, config)))
            .collect()
    })?;

    let mut out = DeOutput::default();
    for (ct, outcome) in outcomes {
        let name = annotation.celltypes()[ct].clone();
        match outcome {
            Ok(result) => {
                out.records.extend(result.records);
                out.expressed.insert(name, result.expressed);
            }
            Err(reason) => {
                warn!("Cell type {} excluded from DE: {}", name, reason);
                out.excluded.push(CellTypeExclusion { celltype: name, reason });
            }
        }
    }

    let p_val: Vec<f64> = out.records.iter().map(|r| r.p_val.unwrap_or(f64::NAN)).collect();
    let p_adj = correct_bh(&p_val);
    for (record, &q) in out.records.iter_mut().zip(&p_adj) {
        record.p_adj = finite(q);
    }

    info!(
        "DE table has {} rows ({} with p_adj < 0.05); {} cell types tested, {} excluded",
        out.records.len(),
        n_significant(&p_adj, 0.05),
        out.expressed.len(),
        out.excluded.len()
    );
    Ok(out)
}
