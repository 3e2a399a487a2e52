//! Cell-type abundance and pseudobulk expression summaries.
//!
//! Produces, for the sender and receiver cell types of interest:
//! - sample-level pseudobulk statistics with `keep` flags,
//! - group-level averages over kept samples,
//! - relative abundance of each cell type per group.

mod pseudobulk;
mod relative;

pub use pseudobulk::{AggregationScope, GroupCell, GroupPseudobulk, PseudobulkCell, PseudobulkTable};
pub use relative::{relative_abundance, RelAbundance, ABUNDANCE_FLOOR};

pub(crate) use pseudobulk::log_cpm;

use crate::data::{CellAnnotation, CountMatrix};
use crate::error::Result;
use serde::Serialize;

/// Everything the abundance stage produces.
#[derive(Debug, Clone)]
pub struct AbundanceInfo {
    pub samples: PseudobulkTable,
    pub groups: GroupPseudobulk,
    pub rel_abundance: Vec<RelAbundance>,
}

/// Long-form expression row, used for the TSV outputs.
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionRecord<'a> {
    pub gene: &'a str,
    pub celltype: &'a str,
    /// Sample id for sample-level rows, group for group-level rows.
    pub unit: &'a str,
    pub avg: f64,
    pub frac: f64,
    pub pb: f64,
}

impl AbundanceInfo {
    /// Run the full abundance stage.
    pub fn compute(
        counts: &CountMatrix,
        annotation: &CellAnnotation,
        scope: &AggregationScope,
    ) -> Result<Self> {
        let samples = PseudobulkTable::aggregate(counts, annotation, scope)?;
        let groups = GroupPseudobulk::from_samples(&samples);
        let rel_abundance = relative_abundance(&samples, annotation);
        Ok(Self {
            samples,
            groups,
            rel_abundance,
        })
    }

    /// Scaled relative abundance of a cell type in a group.
    pub fn rel_abundance_scaled(&self, celltype: &str, group: &str) -> Option<f64> {
        self.rel_abundance
            .iter()
            .find(|r| r.celltype == celltype && r.group == group)
            .map(|r| r.rel_abundance_scaled)
    }

    /// Sample-level expression rows for the given genes (all genes when `None`).
    pub fn sample_records<'a>(&'a self, genes: Option<&[usize]>) -> Vec<ExpressionRecord<'a>> {
        let table = &self.samples;
        let all: Vec<usize>;
        let genes = match genes {
            Some(g) => g,
            None => {
                all = (0..table.genes().len()).collect();
                &all
            }
        };
        let mut out = Vec::new();
        for &gene in genes {
            for (j, cell) in table.cells().iter().enumerate() {
                out.push(ExpressionRecord {
                    gene: &table.genes()[gene],
                    celltype: &cell.celltype,
                    unit: &cell.sample,
                    avg: table.avg(gene, j),
                    frac: table.frac(gene, j),
                    pb: table.pb(gene, j),
                });
            }
        }
        out
    }

    /// Group-level expression rows for the given genes (all genes when `None`).
    pub fn group_records<'a>(&'a self, genes: Option<&[usize]>) -> Vec<ExpressionRecord<'a>> {
        let all: Vec<usize>;
        let genes = match genes {
            Some(g) => g,
            None => {
                all = (0..self.samples.genes().len()).collect();
                &all
            }
        };
        let mut out = Vec::new();
        for &gene in genes {
            for (k, cell) in self.groups.cells().iter().enumerate() {
                out.push(ExpressionRecord {
                    gene: &self.samples.genes()[gene],
                    celltype: &cell.celltype,
                    unit: &cell.group,
                    avg: self.groups.avg(gene, k),
                    frac: self.groups.frac(gene, k),
                    pb: self.groups.pb(gene, k),
                });
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::data::{CellAnnotation, ColumnSchema, CountMatrix, Metadata, Variable, VariableType};

    /// 3 genes × 6 cells over samples S1, S2 (group A) and S3 (group B).
    pub fn toy_dataset() -> (CountMatrix, CellAnnotation) {
        let cells: Vec<String> = (0..6).map(|i| format!("c{}", i)).collect();
        let genes = vec!["G1".to_string(), "G2".to_string(), "G3".to_string()];
        let triplets = vec![
            (0, 0, 4),
            (1, 0, 6),
            (2, 1, 2),
            (0, 2, 1),
            (0, 3, 3),
            (1, 3, 1),
            (0, 4, 5),
            (1, 5, 2),
            (2, 5, 7),
        ];
        let counts = CountMatrix::from_triplets(genes, cells.clone(), triplets).unwrap();

        let cat = |v: &[&str]| -> Vec<Variable> {
            v.iter().map(|s| Variable::Categorical(s.to_string())).collect()
        };
        let meta = Metadata::from_columns(
            cells.clone(),
            vec![
                ("sample_id".into(), VariableType::Categorical, cat(&["S1", "S1", "S1", "S2", "S3", "S3"])),
                ("group_id".into(), VariableType::Categorical, cat(&["A", "A", "A", "A", "B", "B"])),
                ("celltype_id".into(), VariableType::Categorical, cat(&["T", "T", "B", "T", "T", "T"])),
            ],
        )
        .unwrap();
        let annotation = CellAnnotation::resolve(&meta, &ColumnSchema::default(), &cells).unwrap();
        (counts, annotation)
    }

    /// Genes UP, FLAT, DOWN, RARE over samples S1-S3 (Ctrl) and S4-S6 (Trt),
    /// cell types Fib and Tcell with 4 cells per present (sample, cell type).
    ///
    /// UP is ~4x higher and DOWN ~3x lower in Trt; RARE is expressed in one
    /// cell of S1 only. `include(sample, celltype)` drops combinations.
    pub fn two_group_dataset(include: impl Fn(usize, &str) -> bool) -> (CountMatrix, CellAnnotation) {
        let genes: Vec<String> = ["UP", "FLAT", "DOWN", "RARE"].iter().map(|g| g.to_string()).collect();
        let mut cells = Vec::new();
        let mut sample_col = Vec::new();
        let mut group_col = Vec::new();
        let mut celltype_col = Vec::new();
        let mut triplets = Vec::new();
        for s in 0..6usize {
            let treated = s >= 3;
            for celltype in ["Fib", "Tcell"] {
                if !include(s, celltype) {
                    continue;
                }
                for k in 0..4usize {
                    let col = cells.len();
                    cells.push(format!("S{}_{}_{}", s + 1, celltype, k));
                    sample_col.push(format!("S{}", s + 1));
                    group_col.push(if treated { "Trt" } else { "Ctrl" }.to_string());
                    celltype_col.push(celltype.to_string());
                    let up = if treated { 20 } else { 5 } + ((s + k) % 3) as u64;
                    let flat = 10 + ((s * k) % 4) as u64;
                    let down = if treated { 5 } else { 15 } + (k % 2) as u64;
                    triplets.push((0, col, up));
                    triplets.push((1, col, flat));
                    triplets.push((2, col, down));
                    if s == 0 && k == 0 {
                        triplets.push((3, col, 1));
                    }
                }
            }
        }
        let counts = CountMatrix::from_triplets(genes, cells.clone(), triplets).unwrap();
        let as_vars = |v: Vec<String>| -> Vec<Variable> { v.into_iter().map(Variable::Categorical).collect() };
        let meta = Metadata::from_columns(
            cells.clone(),
            vec![
                ("sample_id".into(), VariableType::Categorical, as_vars(sample_col)),
                ("group_id".into(), VariableType::Categorical, as_vars(group_col)),
                ("celltype_id".into(), VariableType::Categorical, as_vars(celltype_col)),
            ],
        )
        .unwrap();
        let annotation = CellAnnotation::resolve(&meta, &ColumnSchema::default(), &cells).unwrap();
        (counts, annotation)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::toy_dataset;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compute_and_records() {
        let (counts, annotation) = toy_dataset();
        let scope = AggregationScope::resolve(&annotation, &[], &[], 1).unwrap();
        let info = AbundanceInfo::compute(&counts, &annotation, &scope).unwrap();

        assert_eq!(info.sample_records(None).len(), 3 * 4);
        assert_eq!(info.group_records(Some(&[0])).len(), info.groups.cells().len());
        assert!(info.rel_abundance_scaled("T", "A").is_some());
    }

    proptest! {
        #[test]
        fn prop_raising_min_cells_never_adds_kept_cells(low in 0usize..4, extra in 0usize..4) {
            let (counts, annotation) = toy_dataset();
            let kept = |min_cells: usize| {
                let scope = AggregationScope::resolve(&annotation, &[], &[], min_cells).unwrap();
                PseudobulkTable::aggregate(&counts, &annotation, &scope).unwrap().n_kept()
            };
            prop_assert!(kept(low + extra) <= kept(low));
        }
    }
}
