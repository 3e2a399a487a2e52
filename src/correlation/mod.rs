//! Correlation of ligand-receptor expression with target gene expression
//! across samples.
//!
//! For the best prioritized interactions of each group, every prior target
//! of the ligand that is differentially expressed in the receiver is
//! correlated, sample by sample, with the ligand-receptor pseudobulk
//! product. This corroborates prior ligand-target links with observed
//! co-variation.

mod stats;

pub use stats::{pearson, spearman, Correlation, MIN_PAIRS};

use crate::abundance::PseudobulkTable;
use crate::activity::{ActivityOutput, Direction};
use crate::data::table::na;
use crate::data::CellAnnotation;
use crate::linker::{InteractionKey, SenderReceiverInfo};
use crate::prioritize::PrioritizationOutput;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Correlation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Best interactions per group whose targets are correlated.
    pub top_n_interactions: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { top_n_interactions: 50 }
    }
}

/// Correlation of one interaction with one of its ligand's targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRecord {
    pub id: String,
    pub ligand: String,
    pub receptor: String,
    pub sender: String,
    pub receiver: String,
    pub target: String,
    /// Regulation of the target in the receiver.
    pub direction: Direction,
    /// Position of the target in the ligand's prior ranking.
    pub prior_rank: usize,
    /// Samples with both cell types kept.
    pub n_samples: usize,
    #[serde(serialize_with = "na")]
    pub pearson: Option<f64>,
    #[serde(serialize_with = "na")]
    pub pearson_p_val: Option<f64>,
    #[serde(serialize_with = "na")]
    pub spearman: Option<f64>,
    #[serde(serialize_with = "na")]
    pub spearman_p_val: Option<f64>,
}

impl CorrelationRecord {
    pub fn is_defined(&self) -> bool {
        self.pearson.is_some() || self.spearman.is_some()
    }
}

/// Which coefficient a filter looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

/// Joint filter on correlation strength, prior rank and direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationFilter {
    pub method: CorrelationMethod,
    pub min_abs_cor: f64,
    pub max_prior_rank: usize,
}

impl Default for CorrelationFilter {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson,
            min_abs_cor: 0.66,
            max_prior_rank: 250,
        }
    }
}

impl CorrelationFilter {
    /// Strong enough, highly ranked in the prior, and positively correlated
    /// with up-regulated targets or negatively with down-regulated ones.
    pub fn accepts(&self, record: &CorrelationRecord) -> bool {
        let cor = match self.method {
            CorrelationMethod::Pearson => record.pearson,
            CorrelationMethod::Spearman => record.spearman,
        };
        let Some(cor) = cor else { return false };
        cor.abs() >= self.min_abs_cor && record.prior_rank <= self.max_prior_rank && cor * record.direction.sign() > 0.0
    }

    pub fn select<'a>(&self, records: &'a [CorrelationRecord]) -> Vec<&'a CorrelationRecord> {
        records.iter().filter(|r| self.accepts(r)).collect()
    }
}

/// Correlate the top interactions of each group with their DE targets.
///
/// Targets come from the ligand-target links of the interaction's receiver
/// and contrast. Each (interaction, target, direction) is reported once with
/// its best prior rank. A sample is valid when sender and receiver are both
/// kept and the target is expressed in the receiver. Fewer than
/// [`MIN_PAIRS`] valid samples leave the coefficients NA.
pub fn correlate_targets(
    table: &PseudobulkTable,
    annotation: &CellAnnotation,
    linked: &SenderReceiverInfo,
    prioritization: &PrioritizationOutput,
    activity: &ActivityOutput,
    config: &CorrelationConfig,
) -> Vec<CorrelationRecord> {
    // (id, target, direction) -> (key, prior rank)
    let mut candidates: BTreeMap<(String, String, Direction), (InteractionKey, usize)> = BTreeMap::new();
    for record in prioritization.top_per_group(config.top_n_interactions) {
        let links = activity.targets.iter().filter(|t| {
            t.ligand == record.ligand && t.receiver == record.receiver && t.contrast == record.contrast
        });
        for link in links {
            let entry = candidates
                .entry((record.id.clone(), link.target.clone(), link.direction))
                .or_insert((record.key(), link.prior_rank));
            entry.1 = entry.1.min(link.prior_rank);
        }
    }

    let sample_index: HashMap<&str, usize> = annotation
        .samples()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.sample.as_str(), i))
        .collect();
    let mut products: HashMap<InteractionKey, Vec<(&str, f64)>> = HashMap::new();
    for r in linked.samples.iter().filter(|r| r.keep_sender && r.keep_receiver) {
        products
            .entry(r.key())
            .or_default()
            .push((r.sample.as_str(), r.ligand_receptor_pb_prod));
    }

    let mut out = Vec::with_capacity(candidates.len());
    for ((id, target, direction), (key, prior_rank)) in candidates {
        let (mut x, mut y) = (Vec::new(), Vec::new());
        if let (Some(gene), Some(receiver)) = (table.gene_position(&target), annotation.celltype_position(&key.receiver)) {
            for &(sample, prod) in products.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
                let column = sample_index.get(sample).and_then(|&s| table.column(receiver, s));
                // the target must be expressed in that sample's receiver
                if let Some(j) = column.filter(|&j| table.frac(gene, j) > 0.0) {
                    x.push(prod);
                    y.push(table.pb(gene, j));
                }
            }
        }
        let p = pearson(&x, &y);
        let s = spearman(&x, &y);
        out.push(CorrelationRecord {
            id,
            ligand: key.ligand,
            receptor: key.receptor,
            sender: key.sender,
            receiver: key.receiver,
            target,
            direction,
            prior_rank,
            n_samples: x.len(),
            pearson: p.map(|c| c.r),
            pearson_p_val: p.map(|c| c.p_value),
            spearman: s.map(|c| c.r),
            spearman_p_val: s.map(|c| c.p_value),
        });
    }

    let undefined = out.iter().filter(|r| !r.is_defined()).count();
    if undefined > 0 {
        warn!(
            "{} of {} ligand-receptor/target correlations undefined (fewer than {} samples or zero variance)",
            undefined,
            out.len(),
            MIN_PAIRS
        );
    }
    info!("Computed {} ligand-receptor/target correlations", out.len());
    out
}
