//! Selection of up- and down-regulated gene sets from the DE table.

use crate::de::DeOutput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which DE gene set a ligand activity was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Up, Direction::Down];

    /// +1 for up, -1 for down.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Thresholds that define a DE gene set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneSetThresholds {
    pub logfc_threshold: f64,
    pub p_val_threshold: f64,
    /// Use `p_adj` instead of `p_val`.
    pub p_val_adj: bool,
}

/// Genes of a receiver passing the thresholds in one direction.
///
/// Only genes in the DE table qualify, which already restricts the set to
/// genes expressed in the receiver.
pub fn select_gene_set(
    de: &DeOutput,
    receiver: &str,
    contrast: &str,
    direction: Direction,
    thresholds: &GeneSetThresholds,
) -> BTreeSet<String> {
    de.records_for(receiver, contrast)
        .filter(|r| {
            let p = if thresholds.p_val_adj { r.p_adj } else { r.p_val };
            match (r.logfc, p) {
                (Some(logfc), Some(p)) => {
                    p <= thresholds.p_val_threshold && logfc * direction.sign() >= thresholds.logfc_threshold
                }
                _ => false,
            }
        })
        .map(|r| r.gene.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::DeRecord;

    fn record(gene: &str, logfc: f64, p_val: f64, p_adj: f64) -> DeRecord {
        DeRecord {
            gene: gene.into(),
            celltype: "T".into(),
            contrast: "A-B".into(),
            logfc: Some(logfc),
            p_val: Some(p_val),
            p_adj_loc: Some(p_adj),
            p_adj: Some(p_adj),
        }
    }

    #[test]
    fn test_select_up_and_down() {
        let de = DeOutput {
            records: vec![
                record("G1", 1.0, 0.01, 0.2),
                record("G2", -0.8, 0.001, 0.01),
                record("G3", 0.2, 0.0001, 0.001),
                record("G4", 2.0, f64::NAN, f64::NAN),
            ],
            ..Default::default()
        };
        let raw = GeneSetThresholds {
            logfc_threshold: 0.5,
            p_val_threshold: 0.05,
            p_val_adj: false,
        };
        let up = select_gene_set(&de, "T", "A-B", Direction::Up, &raw);
        assert_eq!(up.into_iter().collect::<Vec<_>>(), vec!["G1"]);
        let down = select_gene_set(&de, "T", "A-B", Direction::Down, &raw);
        assert_eq!(down.into_iter().collect::<Vec<_>>(), vec!["G2"]);

        let adjusted = GeneSetThresholds { p_val_adj: true, ..raw };
        assert!(select_gene_set(&de, "T", "A-B", Direction::Up, &adjusted).is_empty());
        assert!(select_gene_set(&de, "Other", "A-B", Direction::Up, &raw).is_empty());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.sign(), -1.0);
    }
}
