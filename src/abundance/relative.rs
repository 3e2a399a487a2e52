//! Relative abundance of cell types across groups.

use crate::abundance::PseudobulkTable;
use crate::data::CellAnnotation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Floor applied to scaled abundances so absent cell types never score 0.
pub const ABUNDANCE_FLOOR: f64 = 0.001;

/// Abundance of one cell type in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelAbundance {
    pub group: String,
    pub celltype: String,
    /// Cells of this type in the group, over all of the group's samples.
    pub n_cells: usize,
    /// `n_cells` divided by the cell type's total over all groups.
    pub rel_abundance: f64,
    /// `rel_abundance` min-max scaled across groups, floored at [`ABUNDANCE_FLOOR`].
    pub rel_abundance_scaled: f64,
}

/// Relative abundance for every (group, cell type) pair in the table.
///
/// When all groups have the same share of a cell type the scaled value is 1.
pub fn relative_abundance(table: &PseudobulkTable, annotation: &CellAnnotation) -> Vec<RelAbundance> {
    let n_groups = annotation.groups().len();
    let celltypes: BTreeSet<usize> = table.cells().iter().map(|c| c.celltype_idx).collect();

    let mut out = Vec::with_capacity(celltypes.len() * n_groups);
    for ct in celltypes {
        let mut per_group = vec![0usize; n_groups];
        for cell in table.cells().iter().filter(|c| c.celltype_idx == ct) {
            per_group[cell.group_idx] += cell.n_cells;
        }
        let total: usize = per_group.iter().sum();
        let raw: Vec<f64> = per_group
            .iter()
            .map(|&n| if total > 0 { n as f64 / total as f64 } else { 0.0 })
            .collect();
        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        for (g, &value) in raw.iter().enumerate() {
            let scaled = if max - min > 0.0 {
                (value - min) / (max - min)
            } else {
                1.0
            };
            out.push(RelAbundance {
                group: annotation.groups()[g].clone(),
                celltype: annotation.celltypes()[ct].clone(),
                n_cells: per_group[g],
                rel_abundance: value,
                rel_abundance_scaled: scaled.max(ABUNDANCE_FLOOR),
            });
        }
    }
    out
}
