//! Sample-level overlay of the group prioritization.

use super::engine::PrioritizationRecord;
use crate::activity::z_scale;
use crate::data::table::na;
use crate::data::ContrastGroupTable;
use crate::linker::{InteractionKey, SampleLrExpression};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Expression of an interaction in one sample, joined onto its group record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePrioritizationRecord {
    pub sample: String,
    pub group: String,
    pub contrast: String,
    pub sender: String,
    pub receiver: String,
    pub ligand: String,
    pub receptor: String,
    pub id: String,
    pub ligand_receptor_pb_prod: f64,
    /// z-score of the pseudobulk product across the kept samples of the interaction.
    #[serde(serialize_with = "na")]
    pub scaled_ligand_receptor_pb_prod: Option<f64>,
    pub keep_sender: bool,
    pub keep_receiver: bool,
    #[serde(serialize_with = "na")]
    pub prioritization_score: Option<f64>,
    pub prioritization_rank: usize,
}

/// Sample-level rows for every sample record whose group has a contrast.
///
/// Scores and ranks come from the group record of the same interaction and
/// contrast; nothing is re-scored here. Samples where either cell type was
/// dropped keep an NA scaled product.
pub fn prioritize_samples(
    samples: &[SampleLrExpression],
    groups: &[PrioritizationRecord],
    contrast_groups: &ContrastGroupTable,
) -> Vec<SamplePrioritizationRecord> {
    let mut scaled: HashMap<usize, f64> = HashMap::new();
    let mut per_key: BTreeMap<InteractionKey, Vec<usize>> = BTreeMap::new();
    for (i, r) in samples.iter().enumerate() {
        if r.keep_sender && r.keep_receiver {
            per_key.entry(r.key()).or_default().push(i);
        }
    }
    for idx in per_key.values() {
        let values: Vec<f64> = idx.iter().map(|&i| samples[i].ligand_receptor_pb_prod).collect();
        for (&i, z) in idx.iter().zip(z_scale(&values)) {
            scaled.insert(i, z);
        }
    }

    let group_records: HashMap<(&str, &str), &PrioritizationRecord> = groups
        .iter()
        .map(|r| ((r.contrast.as_str(), r.id.as_str()), r))
        .collect();

    let mut out = Vec::new();
    for (i, r) in samples.iter().enumerate() {
        let id = r.key().id();
        for row in contrast_groups.rows().iter().filter(|row| row.group == r.group) {
            let Some(group_record) = group_records.get(&(row.contrast.as_str(), id.as_str())) else {
                continue;
            };
            out.push(SamplePrioritizationRecord {
                sample: r.sample.clone(),
                group: r.group.clone(),
                contrast: row.contrast.clone(),
                sender: r.sender.clone(),
                receiver: r.receiver.clone(),
                ligand: r.ligand.clone(),
                receptor: r.receptor.clone(),
                id: id.clone(),
                ligand_receptor_pb_prod: r.ligand_receptor_pb_prod,
                scaled_ligand_receptor_pb_prod: scaled.get(&i).copied(),
                keep_sender: r.keep_sender,
                keep_receiver: r.keep_receiver,
                prioritization_score: group_record.prioritization_score,
                prioritization_rank: group_record.prioritization_rank,
            });
        }
    }
    out
}
