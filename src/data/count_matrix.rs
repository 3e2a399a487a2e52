//! Sparse gene-by-column count matrix.
//!
//! Columns are cells for the raw single-cell input and pseudobulk samples
//! once counts have been aggregated.

use crate::error::{NicheError, Result};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sparse count matrix storing gene counts across cells or samples.
///
/// Rows represent genes, columns represent cells (or pseudobulk samples).
/// Uses CSR format so per-gene passes touch contiguous memory.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Sparse matrix in CSR format (genes × columns)
    data: CsMat<u64>,
    /// Gene symbols (row names)
    gene_ids: Vec<String>,
    /// Cell or sample identifiers (column names)
    column_ids: Vec<String>,
    /// Gene symbol -> row lookup
    gene_index: HashMap<String, usize>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix and identifiers.
    pub fn new(data: CsMat<u64>, gene_ids: Vec<String>, column_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != gene_ids.len() {
            return Err(NicheError::DimensionMismatch {
                expected: nrows,
                actual: gene_ids.len(),
            });
        }
        if ncols != column_ids.len() {
            return Err(NicheError::DimensionMismatch {
                expected: ncols,
                actual: column_ids.len(),
            });
        }
        let data = if data.is_csr() { data } else { data.to_csr() };
        let gene_index = gene_ids
            .iter()
            .enumerate()
            .map(|(i, g)| (g.clone(), i))
            .collect();
        Ok(Self {
            data,
            gene_ids,
            column_ids,
            gene_index,
        })
    }

    /// Build a matrix from `(gene, column, count)` triplets. Zero counts are skipped.
    pub fn from_triplets(
        gene_ids: Vec<String>,
        column_ids: Vec<String>,
        triplets: impl IntoIterator<Item = (usize, usize, u64)>,
    ) -> Result<Self> {
        let shape = (gene_ids.len(), column_ids.len());
        let mut tri_mat = TriMat::new(shape);
        for (row, col, val) in triplets {
            if row >= shape.0 || col >= shape.1 {
                return Err(NicheError::InvalidParameter(format!(
                    "Triplet ({}, {}) outside a {}x{} matrix",
                    row, col, shape.0, shape.1
                )));
            }
            if val > 0 {
                tri_mat.add_triplet(row, col, val);
            }
        }
        Self::new(tri_mat.to_csr(), gene_ids, column_ids)
    }

    /// Load a count matrix from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with cell IDs (first column is the gene header)
    /// - Subsequent rows: gene symbol followed by counts
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| NicheError::EmptyData("Empty expression file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(NicheError::EmptyData(
                "Expression TSV must have at least one cell".to_string(),
            ));
        }
        let column_ids: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();
        let n_columns = column_ids.len();

        let mut triplets: Vec<(usize, usize, u64)> = Vec::new();
        let mut gene_ids: Vec<String> = Vec::new();

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let row_idx = gene_ids.len();
            let mut fields = line.split('\t');
            let gene = fields.next().unwrap_or_default().to_string();
            gene_ids.push(gene);

            for (col_idx, value_str) in fields.take(n_columns).enumerate() {
                let trimmed = value_str.trim();
                if trimmed == "0" || trimmed.is_empty() {
                    continue;
                }
                let value: u64 = trimmed.parse().map_err(|_| NicheError::InvalidCount {
                    value: value_str.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                triplets.push((row_idx, col_idx, value));
            }
        }

        if gene_ids.is_empty() {
            return Err(NicheError::EmptyData("No genes in expression TSV".to_string()));
        }

        Self::from_triplets(gene_ids, column_ids, triplets)
    }

    /// Write the count matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "gene")?;
        for column_id in &self.column_ids {
            write!(writer, "\t{}", column_id)?;
        }
        writeln!(writer)?;

        for (row_idx, gene) in self.gene_ids.iter().enumerate() {
            write!(writer, "{}", gene)?;
            for value in self.row_dense(row_idx) {
                write!(writer, "\t{}", value)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data.get(row, col).copied().unwrap_or(0)
    }

    /// Number of genes (rows).
    #[inline]
    pub fn n_genes(&self) -> usize {
        self.data.rows()
    }

    /// Number of columns (cells or samples).
    #[inline]
    pub fn n_columns(&self) -> usize {
        self.data.cols()
    }

    /// Gene symbols.
    #[inline]
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Column identifiers.
    #[inline]
    pub fn column_ids(&self) -> &[String] {
        &self.column_ids
    }

    /// Row index of a gene symbol.
    #[inline]
    pub fn gene_position(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    /// Non-zero `(column, count)` entries of one gene.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.data.outer_view(row).into_iter().flat_map(|v| {
            let (indices, values) = v.into_raw_storage();
            indices.iter().copied().zip(values.iter().copied())
        })
    }

    /// Get a dense vector for a specific gene.
    pub fn row_dense(&self, row: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_columns()];
        for (col, val) in self.row_entries(row) {
            dense[col] = val;
        }
        dense
    }

    /// Compute column sums (library sizes).
    pub fn col_sums(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.n_columns()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Number of non-zero entries per gene.
    pub fn row_nnz(&self) -> Vec<usize> {
        (0..self.n_genes())
            .into_par_iter()
            .map(|row| self.data.outer_view(row).map(|v| v.nnz()).unwrap_or(0))
            .collect()
    }

    /// Subset the matrix to the given genes (by index), preserving order.
    pub fn subset_genes(&self, indices: &[usize]) -> Result<Self> {
        let mut triplets = Vec::new();
        let mut new_gene_ids = Vec::with_capacity(indices.len());

        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_genes() {
                return Err(NicheError::InvalidParameter(format!(
                    "Gene index {} out of bounds",
                    old_row
                )));
            }
            new_gene_ids.push(self.gene_ids[old_row].clone());
            triplets.extend(self.row_entries(old_row).map(|(col, val)| (new_row, col, val)));
        }

        Self::from_triplets(new_gene_ids, self.column_ids.clone(), triplets)
    }

    /// Subset the matrix to the given columns (by index), preserving order.
    pub fn subset_columns(&self, indices: &[usize]) -> Result<Self> {
        let col_map: HashMap<usize, usize> = indices
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let mut new_column_ids = Vec::with_capacity(indices.len());
        for &old_col in indices {
            if old_col >= self.n_columns() {
                return Err(NicheError::InvalidParameter(format!(
                    "Column index {} out of bounds",
                    old_col
                )));
            }
            new_column_ids.push(self.column_ids[old_col].clone());
        }

        let mut triplets = Vec::new();
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (old_col, &val) in row_vec.iter() {
                if let Some(&new_col) = col_map.get(&old_col) {
                    triplets.push((row, new_col, val));
                }
            }
        }

        Self::from_triplets(self.gene_ids.clone(), new_column_ids, triplets)
    }
}
