//! Typed resolution of the user-named annotation columns.
//!
//! Column names are looked up exactly once, in [`CellAnnotation::resolve`];
//! every later stage works on integer indices into the sorted level lists.

use crate::data::{Metadata, Variable};
use crate::error::{NicheError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Names of the annotation columns in the cell metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub sample: String,
    pub group: String,
    pub celltype: String,
    /// Optional categorical batch columns, constant within a sample.
    pub batches: Vec<String>,
    /// Optional continuous covariate columns, constant within a sample.
    pub covariates: Vec<String>,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            sample: "sample_id".to_string(),
            group: "group_id".to_string(),
            celltype: "celltype_id".to_string(),
            batches: Vec::new(),
            covariates: Vec::new(),
        }
    }
}

impl ColumnSchema {
    /// Columns that must be read as labels even when they look numeric.
    pub fn categorical_columns(&self) -> Vec<String> {
        let mut cols = vec![self.sample.clone(), self.group.clone(), self.celltype.clone()];
        cols.extend(self.batches.iter().cloned());
        cols
    }
}

/// Sample-level annotation derived from the cells of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub sample: String,
    pub group: String,
    pub batches: Vec<Option<String>>,
    pub covariates: Vec<Option<f64>>,
}

/// Cell labels resolved against a count matrix's columns.
#[derive(Debug, Clone)]
pub struct CellAnnotation {
    batch_names: Vec<String>,
    covariate_names: Vec<String>,
    samples: Vec<SampleInfo>,
    groups: Vec<String>,
    celltypes: Vec<String>,
    sample_group: Vec<usize>,
    /// `(sample, celltype)` per count-matrix column; `None` for unlabelled cells.
    cells: Vec<Option<(usize, usize)>>,
}

fn label(values: &[Variable], idx: usize) -> Option<String> {
    values.get(idx).and_then(Variable::as_label)
}

fn merge_sample_value<T: PartialEq + ToString>(
    slot: &mut Option<T>,
    value: Option<T>,
    sample: &str,
    column: &str,
) -> Result<()> {
    match (slot.as_ref(), value) {
        (_, None) => Ok(()),
        (None, Some(v)) => {
            *slot = Some(v);
            Ok(())
        }
        (Some(existing), Some(v)) if *existing == v => Ok(()),
        (Some(existing), Some(v)) => Err(NicheError::InconsistentSample {
            sample: sample.to_string(),
            column: column.to_string(),
            first: existing.to_string(),
            second: v.to_string(),
        }),
    }
}

impl CellAnnotation {
    /// Resolve the schema columns for every cell in `cell_ids`.
    ///
    /// Fails on missing columns, cells absent from the metadata, and samples
    /// that carry more than one group, batch label or covariate value.
    /// Cells lacking a sample, group or cell-type label are skipped.
    pub fn resolve(metadata: &Metadata, schema: &ColumnSchema, cell_ids: &[String]) -> Result<Self> {
        let sample_col = metadata.column(&schema.sample)?;
        let group_col = metadata.column(&schema.group)?;
        let celltype_col = metadata.column(&schema.celltype)?;
        let batch_cols = schema
            .batches
            .iter()
            .map(|b| metadata.column(b))
            .collect::<Result<Vec<_>>>()?;
        let covariate_cols = schema
            .covariates
            .iter()
            .map(|c| metadata.column(c))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(cell_ids.len());
        let mut sample_names = BTreeSet::new();
        let mut group_names = BTreeSet::new();
        let mut celltype_names = BTreeSet::new();
        let mut n_unlabelled = 0usize;
        for cell in cell_ids {
            let row = metadata.row_position(cell).ok_or_else(|| {
                NicheError::InvalidParameter(format!("Cell '{}' not found in metadata", cell))
            })?;
            match (
                label(sample_col, row),
                label(group_col, row),
                label(celltype_col, row),
            ) {
                (Some(s), Some(g), Some(ct)) => {
                    sample_names.insert(s.clone());
                    group_names.insert(g.clone());
                    celltype_names.insert(ct.clone());
                    rows.push(Some((row, s, g, ct)));
                }
                _ => {
                    n_unlabelled += 1;
                    rows.push(None);
                }
            }
        }
        if n_unlabelled > 0 {
            warn!("{} cells without sample/group/cell type labels are ignored", n_unlabelled);
        }
        if sample_names.is_empty() {
            return Err(NicheError::EmptyData("No labelled cells".to_string()));
        }

        let sample_list: Vec<String> = sample_names.into_iter().collect();
        let groups: Vec<String> = group_names.into_iter().collect();
        let celltypes: Vec<String> = celltype_names.into_iter().collect();

        let mut sample_groups: Vec<Option<String>> = vec![None; sample_list.len()];
        let mut sample_batches = vec![vec![None; batch_cols.len()]; sample_list.len()];
        let mut sample_covariates = vec![vec![None; covariate_cols.len()]; sample_list.len()];
        let mut cells = Vec::with_capacity(rows.len());

        for entry in rows {
            let Some((row, sample, group, celltype)) = entry else {
                cells.push(None);
                continue;
            };
            let s = sample_list.binary_search(&sample).unwrap_or_default();
            let ct = celltypes.binary_search(&celltype).unwrap_or_default();
            merge_sample_value(&mut sample_groups[s], Some(group), &sample, &schema.group)?;
            for (b, values) in batch_cols.iter().enumerate() {
                merge_sample_value(
                    &mut sample_batches[s][b],
                    label(values, row),
                    &sample,
                    &schema.batches[b],
                )?;
            }
            for (c, values) in covariate_cols.iter().enumerate() {
                let value = values.get(row).and_then(Variable::as_continuous);
                merge_sample_value(
                    &mut sample_covariates[s][c],
                    value,
                    &sample,
                    &schema.covariates[c],
                )?;
            }
            cells.push(Some((s, ct)));
        }

        let mut samples = Vec::with_capacity(sample_list.len());
        let mut sample_group = Vec::with_capacity(sample_list.len());
        for (s, name) in sample_list.into_iter().enumerate() {
            let group = sample_groups[s].take().unwrap_or_default();
            sample_group.push(groups.binary_search(&group).unwrap_or_default());
            samples.push(SampleInfo {
                sample: name,
                group,
                batches: std::mem::take(&mut sample_batches[s]),
                covariates: std::mem::take(&mut sample_covariates[s]),
            });
        }

        Ok(Self {
            batch_names: schema.batches.clone(),
            covariate_names: schema.covariates.clone(),
            samples,
            groups,
            celltypes,
            sample_group,
            cells,
        })
    }

    /// Number of annotated count-matrix columns (labelled or not).
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// `(sample, celltype)` indices of a cell.
    #[inline]
    pub fn cell(&self, cell: usize) -> Option<(usize, usize)> {
        self.cells.get(cell).copied().flatten()
    }

    /// Sample annotations in sorted sample order.
    pub fn samples(&self) -> &[SampleInfo] {
        &self.samples
    }

    /// Sorted group labels.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Sorted cell type labels.
    pub fn celltypes(&self) -> &[String] {
        &self.celltypes
    }

    /// Group index of a sample.
    #[inline]
    pub fn sample_group(&self, sample: usize) -> usize {
        self.sample_group[sample]
    }

    pub fn batch_names(&self) -> &[String] {
        &self.batch_names
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn group_position(&self, group: &str) -> Option<usize> {
        self.groups.iter().position(|g| g == group)
    }

    pub fn celltype_position(&self, celltype: &str) -> Option<usize> {
        self.celltypes.iter().position(|c| c == celltype)
    }

    /// Sample indices belonging to a group.
    pub fn samples_in_group(&self, group: usize) -> Vec<usize> {
        (0..self.samples.len())
            .filter(|&s| self.sample_group[s] == group)
            .collect()
    }
}
