//! Pseudobulk aggregation of single-cell counts per (cell type, sample).

use crate::data::{CellAnnotation, CountMatrix};
use crate::error::{NicheError, Result};
use log::{debug, info};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One aggregated (cell type, sample) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PseudobulkCell {
    pub celltype: String,
    pub sample: String,
    pub group: String,
    pub n_cells: usize,
    /// `n_cells >= min_cells`; only kept cells feed differential expression.
    pub keep: bool,
    #[serde(skip)]
    pub(crate) celltype_idx: usize,
    #[serde(skip)]
    pub(crate) sample_idx: usize,
    #[serde(skip)]
    pub(crate) group_idx: usize,
}

/// Per-gene statistics of every present (cell type, sample) combination.
///
/// All matrices are genes × pseudobulk cells, column `j` describing `cells[j]`.
#[derive(Debug, Clone)]
pub struct PseudobulkTable {
    cells: Vec<PseudobulkCell>,
    /// Summed raw counts.
    counts: CountMatrix,
    /// Mean raw count per cell.
    avg: DMatrix<f64>,
    /// Fraction of cells with a nonzero count.
    frac: DMatrix<f64>,
    /// log2(CPM + 1) of the summed counts.
    pb: DMatrix<f64>,
    column_index: HashMap<(usize, usize), usize>,
    min_cells: usize,
}

/// Which cell types to aggregate and the minimum cells per combination.
#[derive(Debug, Clone, Default)]
pub struct AggregationScope {
    /// Cell type indices of interest (senders ∪ receivers), sorted.
    pub celltypes: BTreeSet<usize>,
    pub min_cells: usize,
}

impl AggregationScope {
    /// Resolve sender and receiver names; empty lists mean every cell type.
    pub fn resolve(
        annotation: &CellAnnotation,
        senders: &[String],
        receivers: &[String],
        min_cells: usize,
    ) -> Result<Self> {
        let mut celltypes = BTreeSet::new();
        if senders.is_empty() || receivers.is_empty() {
            celltypes.extend(0..annotation.celltypes().len());
        }
        for name in senders.iter().chain(receivers) {
            let idx = annotation.celltype_position(name).ok_or_else(|| {
                NicheError::InvalidParameter(format!(
                    "Cell type of interest '{}' is not present in the data",
                    name
                ))
            })?;
            celltypes.insert(idx);
        }
        Ok(Self {
            celltypes,
            min_cells,
        })
    }
}

/// Library-size normalised log expression.
#[inline]
pub(crate) fn log_cpm(count: f64, library_size: f64) -> f64 {
    if library_size > 0.0 {
        (count / library_size * 1e6 + 1.0).log2()
    } else {
        0.0
    }
}

impl PseudobulkTable {
    /// Aggregate the cells of every (cell type, sample) combination in scope.
    ///
    /// Combinations without cells are absent; combinations with fewer than
    /// `min_cells` cells are kept in the table with `keep = false`.
    pub fn aggregate(
        counts: &CountMatrix,
        annotation: &CellAnnotation,
        scope: &AggregationScope,
    ) -> Result<Self> {
        if counts.n_columns() != annotation.n_cells() {
            return Err(NicheError::DimensionMismatch {
                expected: counts.n_columns(),
                actual: annotation.n_cells(),
            });
        }

        let mut n_cells: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for cell in 0..annotation.n_cells() {
            if let Some((s, ct)) = annotation.cell(cell) {
                if scope.celltypes.contains(&ct) {
                    *n_cells.entry((ct, s)).or_insert(0) += 1;
                }
            }
        }
        if n_cells.is_empty() {
            return Err(NicheError::EmptyData(
                "No cells belong to the cell types of interest".to_string(),
            ));
        }

        let column_index: HashMap<(usize, usize), usize> = n_cells
            .keys()
            .enumerate()
            .map(|(j, &key)| (key, j))
            .collect();
        let cells: Vec<PseudobulkCell> = n_cells
            .iter()
            .map(|(&(ct, s), &n)| {
                let g = annotation.sample_group(s);
                PseudobulkCell {
                    celltype: annotation.celltypes()[ct].clone(),
                    sample: annotation.samples()[s].sample.clone(),
                    group: annotation.groups()[g].clone(),
                    n_cells: n,
                    keep: n >= scope.min_cells,
                    celltype_idx: ct,
                    sample_idx: s,
                    group_idx: g,
                }
            })
            .collect();
        let cell_column: Vec<Option<usize>> = (0..annotation.n_cells())
            .map(|cell| {
                annotation
                    .cell(cell)
                    .and_then(|(s, ct)| column_index.get(&(ct, s)).copied())
            })
            .collect();

        let n_genes = counts.n_genes();
        let n_cols = cells.len();
        let per_gene: Vec<(Vec<u64>, Vec<u32>)> = (0..n_genes)
            .into_par_iter()
            .map(|gene| {
                let mut sums = vec![0u64; n_cols];
                let mut nnz = vec![0u32; n_cols];
                for (cell, val) in counts.row_entries(gene) {
                    if let Some(j) = cell_column[cell] {
                        sums[j] += val;
                        nnz[j] += 1;
                    }
                }
                (sums, nnz)
            })
            .collect();

        let mut library_sizes = vec![0.0f64; n_cols];
        for (sums, _) in &per_gene {
            for (j, &s) in sums.iter().enumerate() {
                library_sizes[j] += s as f64;
            }
        }

        let mut avg = DMatrix::zeros(n_genes, n_cols);
        let mut frac = DMatrix::zeros(n_genes, n_cols);
        let mut pb = DMatrix::zeros(n_genes, n_cols);
        let mut triplets = Vec::new();
        for (gene, (sums, nnz)) in per_gene.into_iter().enumerate() {
            for j in 0..n_cols {
                let n = cells[j].n_cells as f64;
                let sum = sums[j] as f64;
                avg[(gene, j)] = sum / n;
                frac[(gene, j)] = nnz[j] as f64 / n;
                pb[(gene, j)] = log_cpm(sum, library_sizes[j]);
                if sums[j] > 0 {
                    triplets.push((gene, j, sums[j]));
                }
            }
        }

        let column_ids = cells
            .iter()
            .map(|c| format!("{}|{}", c.celltype, c.sample))
            .collect();
        let summed = CountMatrix::from_triplets(counts.gene_ids().to_vec(), column_ids, triplets)?;

        let n_kept = cells.iter().filter(|c| c.keep).count();
        info!(
            "Aggregated {} pseudobulk cells ({} with >= {} cells)",
            n_cols, n_kept, scope.min_cells
        );
        for c in cells.iter().filter(|c| !c.keep) {
            debug!(
                "Pseudobulk {} / {} has {} cells, below the minimum",
                c.celltype, c.sample, c.n_cells
            );
        }

        Ok(Self {
            cells,
            counts: summed,
            avg,
            frac,
            pb,
            column_index,
            min_cells: scope.min_cells,
        })
    }

    pub fn cells(&self) -> &[PseudobulkCell] {
        &self.cells
    }

    pub fn genes(&self) -> &[String] {
        self.counts.gene_ids()
    }

    pub fn gene_position(&self, gene: &str) -> Option<usize> {
        self.counts.gene_position(gene)
    }

    pub fn min_cells(&self) -> usize {
        self.min_cells
    }

    /// Summed counts, one column per pseudobulk cell.
    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    /// Column of a (cell type, sample) pair, if it has cells.
    pub fn column(&self, celltype: usize, sample: usize) -> Option<usize> {
        self.column_index.get(&(celltype, sample)).copied()
    }

    #[inline]
    pub fn avg(&self, gene: usize, column: usize) -> f64 {
        self.avg[(gene, column)]
    }

    #[inline]
    pub fn frac(&self, gene: usize, column: usize) -> f64 {
        self.frac[(gene, column)]
    }

    #[inline]
    pub fn pb(&self, gene: usize, column: usize) -> f64 {
        self.pb[(gene, column)]
    }

    /// Number of pseudobulk cells flagged `keep`.
    pub fn n_kept(&self) -> usize {
        self.cells.iter().filter(|c| c.keep).count()
    }

    /// Kept columns of one cell type.
    pub fn kept_columns(&self, celltype: usize) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.keep && c.celltype_idx == celltype)
            .map(|(j, _)| j)
            .collect()
    }

    /// Cell type indices present in the table, sorted.
    pub fn celltype_indices(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.cells.iter().map(|c| c.celltype_idx).collect();
        set.into_iter().collect()
    }
}

/// Group-level aggregate of one cell type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCell {
    pub celltype: String,
    pub group: String,
    /// Kept samples averaged into this entry.
    pub n_samples: usize,
    #[serde(skip)]
    pub(crate) celltype_idx: usize,
    #[serde(skip)]
    pub(crate) group_idx: usize,
}

/// Per-group averages of the sample-level pseudobulk statistics.
///
/// Each group value is the unweighted mean over the group's kept samples,
/// so every sample counts once regardless of its number of cells. Cell type /
/// group pairs without a kept sample are absent.
#[derive(Debug, Clone)]
pub struct GroupPseudobulk {
    cells: Vec<GroupCell>,
    avg: DMatrix<f64>,
    frac: DMatrix<f64>,
    pb: DMatrix<f64>,
    column_index: HashMap<(usize, usize), usize>,
}

impl GroupPseudobulk {
    pub fn from_samples(table: &PseudobulkTable) -> Self {
        let mut members: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (j, cell) in table.cells().iter().enumerate() {
            if cell.keep {
                members
                    .entry((cell.celltype_idx, cell.group_idx))
                    .or_default()
                    .push(j);
            }
        }

        let n_genes = table.genes().len();
        let n_cols = members.len();
        let mut avg = DMatrix::zeros(n_genes, n_cols);
        let mut frac = DMatrix::zeros(n_genes, n_cols);
        let mut pb = DMatrix::zeros(n_genes, n_cols);
        let mut cells = Vec::with_capacity(n_cols);
        let mut column_index = HashMap::new();

        for (k, (&(ct, g), cols)) in members.iter().enumerate() {
            let first = &table.cells()[cols[0]];
            cells.push(GroupCell {
                celltype: first.celltype.clone(),
                group: first.group.clone(),
                n_samples: cols.len(),
                celltype_idx: ct,
                group_idx: g,
            });
            column_index.insert((ct, g), k);
            let n = cols.len() as f64;
            for gene in 0..n_genes {
                let (mut a, mut f, mut p) = (0.0, 0.0, 0.0);
                for &j in cols {
                    a += table.avg(gene, j);
                    f += table.frac(gene, j);
                    p += table.pb(gene, j);
                }
                avg[(gene, k)] = a / n;
                frac[(gene, k)] = f / n;
                pb[(gene, k)] = p / n;
            }
        }

        Self {
            cells,
            avg,
            frac,
            pb,
            column_index,
        }
    }

    pub fn cells(&self) -> &[GroupCell] {
        &self.cells
    }

    pub fn column(&self, celltype: usize, group: usize) -> Option<usize> {
        self.column_index.get(&(celltype, group)).copied()
    }

    #[inline]
    pub fn avg(&self, gene: usize, column: usize) -> f64 {
        self.avg[(gene, column)]
    }

    #[inline]
    pub fn frac(&self, gene: usize, column: usize) -> f64 {
        self.frac[(gene, column)]
    }

    #[inline]
    pub fn pb(&self, gene: usize, column: usize) -> f64 {
        self.pb[(gene, column)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::test_support::toy_dataset;
    use approx::assert_relative_eq;

    #[test]
    fn test_counts_and_keep_flags() {
        let (counts, annotation) = toy_dataset();
        let scope = AggregationScope::resolve(&annotation, &[], &[], 2).unwrap();
        let table = PseudobulkTable::aggregate(&counts, &annotation, &scope).unwrap();

        // T cells: S1 has 2 cells, S2 has 1, S3 has 2; B cells only in S1 (1 cell)
        let summary: Vec<(&str, &str, usize, bool)> = table
            .cells()
            .iter()
            .map(|c| (c.celltype.as_str(), c.sample.as_str(), c.n_cells, c.keep))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("B", "S1", 1, false),
                ("T", "S1", 2, true),
                ("T", "S2", 1, false),
                ("T", "S3", 2, true),
            ]
        );
        assert_eq!(table.n_kept(), 2);
    }

    #[test]
    fn test_avg_frac_pb() {
        let (counts, annotation) = toy_dataset();
        let scope = AggregationScope::resolve(&annotation, &[], &[], 1).unwrap();
        let table = PseudobulkTable::aggregate(&counts, &annotation, &scope).unwrap();

        let t = annotation.celltype_position("T").unwrap();
        let j = table.column(t, 0).unwrap();
        let g = table.gene_position("G1").unwrap();
        // T/S1 cells have G1 counts 4 and 0
        assert_relative_eq!(table.avg(g, j), 2.0);
        assert_relative_eq!(table.frac(g, j), 0.5);
        assert_eq!(table.counts().get(g, j), 4);
        // library size of T/S1 is 4 + 6 + 2 + 0 = 12
        assert_relative_eq!(table.pb(g, j), (4.0 / 12.0 * 1e6 + 1.0f64).log2(), epsilon = 1e-9);
    }

    #[test]
    fn test_group_is_mean_of_kept_samples() {
        let (counts, annotation) = toy_dataset();
        let scope = AggregationScope::resolve(&annotation, &[], &[], 1).unwrap();
        let table = PseudobulkTable::aggregate(&counts, &annotation, &scope).unwrap();
        let groups = GroupPseudobulk::from_samples(&table);

        let t = annotation.celltype_position("T").unwrap();
        let a = annotation.group_position("A").unwrap();
        let k = groups.column(t, a).unwrap();
        let s1 = table.column(t, 0).unwrap();
        let s2 = table.column(t, 1).unwrap();
        for gene in 0..table.genes().len() {
            assert_relative_eq!(
                groups.pb(gene, k),
                (table.pb(gene, s1) + table.pb(gene, s2)) / 2.0,
                epsilon = 1e-12
            );
            assert_relative_eq!(
                groups.frac(gene, k),
                (table.frac(gene, s1) + table.frac(gene, s2)) / 2.0,
                epsilon = 1e-12
            );
        }
        assert_eq!(groups.cells()[k].n_samples, 2);
    }

    #[test]
    fn test_unknown_celltype_of_interest() {
        let (_, annotation) = toy_dataset();
        let err = AggregationScope::resolve(&annotation, &["NK".into()], &[], 1).unwrap_err();
        assert!(err.is_configuration());
    }
}
