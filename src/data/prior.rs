//! Prior-knowledge networks: ligand-receptor pairs and ligand-target weights.

use crate::error::{NicheError, Result};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Organism the networks were built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Organism {
    #[default]
    Human,
    Mouse,
}

/// A ligand-receptor pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LigandReceptorPair {
    pub ligand: String,
    pub receptor: String,
}

/// Deduplicated ligand-receptor prior network.
#[derive(Debug, Clone, Default)]
pub struct LigandReceptorNetwork {
    pairs: Vec<LigandReceptorPair>,
}

impl LigandReceptorNetwork {
    /// Build from pairs, dropping duplicates and keeping first occurrences.
    pub fn new(pairs: impl IntoIterator<Item = LigandReceptorPair>) -> Self {
        let mut seen = HashSet::new();
        let pairs = pairs.into_iter().filter(|p| seen.insert(p.clone())).collect();
        Self { pairs }
    }

    /// Load from a TSV file with `ligand` and `receptor` columns.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;
        let mut pairs = Vec::new();
        for row in reader.deserialize() {
            let pair: LigandReceptorPair = row?;
            pairs.push(pair);
        }
        if pairs.is_empty() {
            return Err(NicheError::EmptyData("Ligand-receptor network is empty".to_string()));
        }
        Ok(Self::new(pairs))
    }

    pub fn pairs(&self) -> &[LigandReceptorPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Unique ligands in first-seen order.
    pub fn ligands(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.pairs
            .iter()
            .map(|p| p.ligand.as_str())
            .filter(|l| seen.insert(*l))
            .collect()
    }
}

/// Ligand × gene prior regulatory weights, stored ligand-major.
#[derive(Debug, Clone)]
pub struct LigandTargetMatrix {
    /// CSR matrix (ligands × genes) of nonnegative weights.
    weights: CsMat<f64>,
    ligands: Vec<String>,
    genes: Vec<String>,
    ligand_index: HashMap<String, usize>,
    gene_index: HashMap<String, usize>,
}

impl LigandTargetMatrix {
    /// Build from `(ligand, gene, weight)` triplets; nonpositive weights are dropped.
    pub fn from_triplets(
        ligands: Vec<String>,
        genes: Vec<String>,
        triplets: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self> {
        let shape = (ligands.len(), genes.len());
        let mut tri = TriMat::new(shape);
        for (l, g, w) in triplets {
            if l >= shape.0 || g >= shape.1 {
                return Err(NicheError::InvalidParameter(format!(
                    "Ligand-target entry ({}, {}) outside a {}x{} matrix",
                    l, g, shape.0, shape.1
                )));
            }
            if !w.is_finite() || w < 0.0 {
                return Err(NicheError::InvalidParameter(format!(
                    "Ligand-target weight must be finite and nonnegative, got {}",
                    w
                )));
            }
            if w > 0.0 {
                tri.add_triplet(l, g, w);
            }
        }
        let ligand_index = ligands.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();
        let gene_index = genes.iter().enumerate().map(|(i, g)| (g.clone(), i)).collect();
        Ok(Self {
            weights: tri.to_csr(),
            ligands,
            genes,
            ligand_index,
            gene_index,
        })
    }

    /// Load a genes (rows) × ligands (columns) TSV.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .ok_or_else(|| NicheError::EmptyData("Empty ligand-target file".to_string()))??;
        let ligands: Vec<String> = header.split('\t').skip(1).map(|s| s.trim().to_string()).collect();
        if ligands.is_empty() {
            return Err(NicheError::EmptyData("Ligand-target matrix has no ligands".to_string()));
        }

        let mut genes = Vec::new();
        let mut triplets = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let g = genes.len();
            let mut fields = line.split('\t');
            genes.push(fields.next().unwrap_or_default().trim().to_string());
            for (l, raw) in fields.take(ligands.len()).enumerate() {
                let raw = raw.trim();
                if raw.is_empty() || raw == "0" || raw == "NA" {
                    continue;
                }
                let w: f64 = raw.parse().map_err(|_| {
                    NicheError::InvalidParameter(format!("Invalid ligand-target weight '{}'", raw))
                })?;
                triplets.push((l, g, w));
            }
        }
        Self::from_triplets(ligands, genes, triplets)
    }

    pub fn ligands(&self) -> &[String] {
        &self.ligands
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn ligand_position(&self, ligand: &str) -> Option<usize> {
        self.ligand_index.get(ligand).copied()
    }

    pub fn gene_position(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    /// Nonzero `(gene index, weight)` entries of a ligand.
    pub fn targets(&self, ligand: usize) -> Vec<(usize, f64)> {
        self.weights
            .outer_view(ligand)
            .map(|v| v.iter().map(|(g, &w)| (g, w)).collect())
            .unwrap_or_default()
    }

    /// The `n` highest-weighted targets of a ligand, ties broken by gene order.
    pub fn top_targets(&self, ligand: usize, n: usize) -> Vec<(usize, f64)> {
        let mut targets = self.targets(ligand);
        targets.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        targets.truncate(n);
        targets
    }

    /// Ligands with at least one nonzero target.
    pub fn connected_ligands(&self) -> Vec<usize> {
        (0..self.ligands.len())
            .filter(|&l| self.weights.outer_view(l).map(|v| v.nnz() > 0).unwrap_or(false))
            .collect()
    }
}

/// The prior networks an analysis runs against, passed explicitly to each stage.
#[derive(Debug, Clone)]
pub struct PriorNetworks {
    pub organism: Organism,
    pub lr_network: LigandReceptorNetwork,
    pub ligand_target: LigandTargetMatrix,
}

impl PriorNetworks {
    pub fn new(
        organism: Organism,
        lr_network: LigandReceptorNetwork,
        ligand_target: LigandTargetMatrix,
    ) -> Self {
        Self {
            organism,
            lr_network,
            ligand_target,
        }
    }
}
