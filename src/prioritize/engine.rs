//! Group-level prioritization of sender-ligand / receiver-receptor interactions.

use super::criteria::{Criterion, CriterionWeights};
use super::scaling::{mean_present, min_max_scale, percentile_rank, signed_significance};
use crate::abundance::AbundanceInfo;
use crate::activity::{ActivityOutput, Direction};
use crate::data::table::na;
use crate::data::{CellAnnotation, ContrastGroupTable, ContrastSet};
use crate::de::DeOutput;
use crate::error::{NicheError, Result};
use crate::linker::{GroupLrExpression, InteractionKey, SenderReceiverInfo};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Inputs shared by the group- and sample-level tables.
pub struct PrioritizationInput<'a> {
    pub annotation: &'a CellAnnotation,
    pub abundance: &'a AbundanceInfo,
    pub linked: &'a SenderReceiverInfo,
    pub de: &'a DeOutput,
    pub activity: &'a ActivityOutput,
    pub contrasts: &'a ContrastSet,
    pub contrast_groups: &'a ContrastGroupTable,
}

/// One interaction in the context of one contrast and its group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrioritizationRecord {
    pub contrast: String,
    pub group: String,
    pub sender: String,
    pub receiver: String,
    pub ligand: String,
    pub receptor: String,
    /// `ligand_receptor_sender_receiver`.
    pub id: String,
    #[serde(serialize_with = "na")]
    pub lfc_ligand: Option<f64>,
    #[serde(serialize_with = "na")]
    pub p_val_ligand: Option<f64>,
    #[serde(serialize_with = "na")]
    pub p_adj_ligand: Option<f64>,
    #[serde(serialize_with = "na")]
    pub lfc_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub p_val_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub p_adj_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub ligand_receptor_lfc_avg: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_up: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_up_scaled: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_down: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_down_scaled: Option<f64>,
    #[serde(serialize_with = "na")]
    pub pb_ligand_group: Option<f64>,
    #[serde(serialize_with = "na")]
    pub pb_receptor_group: Option<f64>,
    #[serde(serialize_with = "na")]
    pub frac_ligand_group: Option<f64>,
    #[serde(serialize_with = "na")]
    pub frac_receptor_group: Option<f64>,
    /// Share of the group's samples where both genes are expressed in kept cells.
    pub fraction_ligand_receptor: f64,
    #[serde(serialize_with = "na")]
    pub rel_abundance_sender: Option<f64>,
    #[serde(serialize_with = "na")]
    pub rel_abundance_receiver: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_de_ligand: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_de_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_activity_up: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_activity_down: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_exprs_ligand: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_exprs_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_frac_exprs_ligand_receptor: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_abundance_sender: Option<f64>,
    #[serde(serialize_with = "na")]
    pub scaled_abundance_receiver: Option<f64>,
    #[serde(serialize_with = "na")]
    pub prioritization_score: Option<f64>,
    /// 1 = best within the contrast.
    pub prioritization_rank: usize,
    /// Co-expression fraction below the configured minimum; kept, not dropped.
    pub low_coexpression: bool,
    /// Group where this interaction scores highest over all contrasts.
    pub top_group: String,
}

impl PrioritizationRecord {
    pub fn key(&self) -> InteractionKey {
        InteractionKey {
            ligand: self.ligand.clone(),
            receptor: self.receptor.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }

    /// Scaled value of a criterion.
    pub fn criterion(&self, criterion: Criterion) -> Option<f64> {
        match criterion {
            Criterion::DeLigand => self.scaled_de_ligand,
            Criterion::DeReceptor => self.scaled_de_receptor,
            Criterion::ActivityUp => self.scaled_activity_up,
            Criterion::ActivityDown => self.scaled_activity_down,
            Criterion::ExprsLigand => self.scaled_exprs_ligand,
            Criterion::ExprsReceptor => self.scaled_exprs_receptor,
            Criterion::FracExprsLigandReceptor => self.scaled_frac_exprs_ligand_receptor,
            Criterion::AbundanceSender => self.scaled_abundance_sender,
            Criterion::AbundanceReceiver => self.scaled_abundance_receiver,
        }
    }

    pub fn criterion_mut(&mut self, criterion: Criterion) -> &mut Option<f64> {
        match criterion {
            Criterion::DeLigand => &mut self.scaled_de_ligand,
            Criterion::DeReceptor => &mut self.scaled_de_receptor,
            Criterion::ActivityUp => &mut self.scaled_activity_up,
            Criterion::ActivityDown => &mut self.scaled_activity_down,
            Criterion::ExprsLigand => &mut self.scaled_exprs_ligand,
            Criterion::ExprsReceptor => &mut self.scaled_exprs_receptor,
            Criterion::FracExprsLigandReceptor => &mut self.scaled_frac_exprs_ligand_receptor,
            Criterion::AbundanceSender => &mut self.scaled_abundance_sender,
            Criterion::AbundanceReceiver => &mut self.scaled_abundance_receiver,
        }
    }
}

/// Weighted mean of the present criteria with positive weight.
///
/// Missing criteria drop out and the remaining weights are renormalised;
/// `None` when no weighted criterion is present.
pub fn weighted_score(record: &PrioritizationRecord, weights: &CriterionWeights) -> Option<f64> {
    let (mut sum, mut total) = (0.0, 0.0);
    for (criterion, w) in weights.active() {
        if let Some(v) = record.criterion(criterion).filter(|v| v.is_finite()) {
            sum += w * v;
            total += w;
        }
    }
    (total > 0.0).then(|| sum / total)
}

/// Score every record, rank within contrast and assign `top_group`.
///
/// Ranking is by descending score with missing scores last; ties keep the
/// input order.
pub fn score_and_rank(records: &mut [PrioritizationRecord], weights: &CriterionWeights) {
    for r in records.iter_mut() {
        r.prioritization_score = weighted_score(r, weights);
    }

    let mut by_contrast: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        by_contrast.entry(r.contrast.as_str()).or_default().push(i);
    }
    let mut ranks = vec![0usize; records.len()];
    for mut idx in by_contrast.into_values() {
        idx.sort_by(|&a, &b| compare_scores(records[a].prioritization_score, records[b].prioritization_score));
        for (rank, i) in idx.into_iter().enumerate() {
            ranks[i] = rank + 1;
        }
    }
    for (r, rank) in records.iter_mut().zip(ranks) {
        r.prioritization_rank = rank;
    }

    let mut best: HashMap<String, (Option<f64>, String)> = HashMap::new();
    for r in records.iter() {
        let entry = best.entry(r.id.clone()).or_insert((None, r.group.clone()));
        if compare_scores(r.prioritization_score, entry.0) == Ordering::Less {
            *entry = (r.prioritization_score, r.group.clone());
        }
    }
    for r in records.iter_mut() {
        if let Some((_, group)) = best.get(&r.id) {
            r.top_group = group.clone();
        }
    }
}

/// Descending by score, `None` after every score.
fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Fraction of a group's samples in which both cell types are kept and both
/// genes reach `fraction_cutoff`.
fn coexpression_fractions(
    input: &PrioritizationInput,
    fraction_cutoff: f64,
) -> HashMap<(String, InteractionKey), f64> {
    let mut hits: HashMap<(String, InteractionKey), usize> = HashMap::new();
    for r in &input.linked.samples {
        let expressed = r.keep_sender
            && r.keep_receiver
            && r.frac_ligand >= fraction_cutoff
            && r.frac_receptor >= fraction_cutoff;
        let entry = hits.entry((r.group.clone(), r.key())).or_insert(0);
        if expressed {
            *entry += 1;
        }
    }
    hits.into_iter()
        .map(|((group, key), n)| {
            let n_samples = input
                .annotation
                .group_position(&group)
                .map(|g| input.annotation.samples_in_group(g).len())
                .unwrap_or(0);
            let fraction = if n_samples > 0 { n as f64 / n_samples as f64 } else { 0.0 };
            ((group, key), fraction)
        })
        .collect()
}

/// Specificity of a gene's group pseudobulk within one role: min-max over
/// all (cell type, group) values of that gene.
fn expression_specificity(
    groups: &[GroupLrExpression],
    pick: impl Fn(&GroupLrExpression) -> (&str, &str, f64),
) -> HashMap<(String, String, String), f64> {
    // gene -> (celltype, group) -> pb
    let mut per_gene: BTreeMap<&str, BTreeMap<(&str, &str), f64>> = BTreeMap::new();
    for r in groups {
        let (celltype, gene, pb) = pick(r);
        per_gene
            .entry(gene)
            .or_default()
            .insert((celltype, r.group.as_str()), pb);
    }
    let mut out = HashMap::new();
    for (gene, values) in per_gene {
        let keys: Vec<_> = values.keys().copied().collect();
        let raw: Vec<Option<f64>> = values.values().map(|&v| Some(v)).collect();
        for ((celltype, group), scaled) in keys.into_iter().zip(min_max_scale(&raw)) {
            if let Some(s) = scaled {
                out.insert((gene.to_string(), celltype.to_string(), group.to_string()), s);
            }
        }
    }
    out
}

/// DE criterion over the distinct (cell type, gene) pairs of one contrast:
/// mean of the percentile ranks of logFC and of signed significance.
fn de_criterion(
    pairs: &BTreeSet<(String, String)>,
    stats: impl Fn(&str, &str) -> Option<(f64, f64)>,
) -> HashMap<(String, String), f64> {
    let pairs: Vec<&(String, String)> = pairs.iter().collect();
    let raw: Vec<Option<(f64, f64)>> = pairs.iter().map(|(c, g)| stats(c.as_str(), g.as_str())).collect();
    let lfc: Vec<Option<f64>> = raw.iter().map(|s| s.map(|s| s.0)).collect();
    let sig: Vec<Option<f64>> = raw
        .iter()
        .map(|s| s.and_then(|(l, p)| signed_significance(Some(l), Some(p))))
        .collect();
    let lfc_rank = percentile_rank(&lfc);
    let sig_rank = percentile_rank(&sig);
    pairs
        .into_iter()
        .zip(lfc_rank.into_iter().zip(sig_rank))
        .filter_map(|(pair, (a, b))| Some((pair.clone(), mean_present(&[a, b])?)))
        .collect()
}

/// Build, score and rank the group-level prioritization table.
pub fn prioritize_groups(
    input: &PrioritizationInput,
    weights: &CriterionWeights,
    fraction_cutoff: f64,
    min_sample_prop: f64,
) -> Result<Vec<PrioritizationRecord>> {
    weights.validate()?;
    input
        .contrast_groups
        .validate(input.contrasts, input.annotation.groups())?;

    let de = input.de.lookup();
    let de_stats = |celltype: &str, contrast: &str, gene: &str| {
        de.get(&(celltype, contrast, gene))
            .and_then(|r| Some((r.logfc?, r.p_val?, r.p_adj)))
    };

    let mut activity: HashMap<(&str, &str, &str, Direction), (Option<f64>, Option<f64>)> = HashMap::new();
    for a in &input.activity.activities {
        activity.insert(
            (a.ligand.as_str(), a.contrast.as_str(), a.receiver.as_str(), a.direction),
            (a.activity, a.activity_scaled),
        );
    }
    // Percentile of the scaled activity over ligands within (contrast, receiver, direction)
    let mut activity_rank: HashMap<(String, String, String, Direction), f64> = HashMap::new();
    {
        let mut blocks: BTreeMap<(&str, &str, Direction), Vec<(&str, Option<f64>)>> = BTreeMap::new();
        for a in &input.activity.activities {
            blocks
                .entry((a.contrast.as_str(), a.receiver.as_str(), a.direction))
                .or_default()
                .push((a.ligand.as_str(), a.activity_scaled));
        }
        for ((contrast, receiver, direction), ligands) in blocks {
            let values: Vec<Option<f64>> = ligands.iter().map(|(_, v)| *v).collect();
            for ((ligand, _), rank) in ligands.iter().zip(percentile_rank(&values)) {
                if let Some(rank) = rank {
                    activity_rank.insert(
                        (ligand.to_string(), contrast.to_string(), receiver.to_string(), direction),
                        rank,
                    );
                }
            }
        }
    }

    let group_expr: HashMap<(&str, InteractionKey), &GroupLrExpression> = input
        .linked
        .groups
        .iter()
        .map(|r| ((r.group.as_str(), r.key()), r))
        .collect();
    let ligand_specificity =
        expression_specificity(&input.linked.groups, |r| (r.sender.as_str(), r.ligand.as_str(), r.pb_ligand));
    let receptor_specificity = expression_specificity(&input.linked.groups, |r| {
        (r.receiver.as_str(), r.receptor.as_str(), r.pb_receptor)
    });
    let coexpression = coexpression_fractions(input, fraction_cutoff);
    let abundance: HashMap<(&str, &str), (f64, f64)> = input
        .abundance
        .rel_abundance
        .iter()
        .map(|r| ((r.celltype.as_str(), r.group.as_str()), (r.rel_abundance, r.rel_abundance_scaled)))
        .collect();

    let keys: BTreeSet<InteractionKey> = input
        .linked
        .groups
        .iter()
        .map(GroupLrExpression::key)
        .chain(input.linked.samples.iter().map(|r| r.key()))
        .collect();

    let sender_ligands: BTreeSet<(String, String)> =
        keys.iter().map(|k| (k.sender.clone(), k.ligand.clone())).collect();
    let receiver_receptors: BTreeSet<(String, String)> =
        keys.iter().map(|k| (k.receiver.clone(), k.receptor.clone())).collect();

    let mut records = Vec::with_capacity(keys.len() * input.contrasts.len());
    for contrast in input.contrasts.names() {
        let group = input
            .contrast_groups
            .group_of(contrast)
            .ok_or_else(|| NicheError::MissingContrastGroup(contrast.to_string()))?;

        let de_ligand = de_criterion(&sender_ligands, |c, g| de_stats(c, contrast, g).map(|s| (s.0, s.1)));
        let de_receptor = de_criterion(&receiver_receptors, |c, g| de_stats(c, contrast, g).map(|s| (s.0, s.1)));

        let block_start = records.len();
        for key in &keys {
            let ligand_de = de_stats(&key.sender, contrast, &key.ligand);
            let receptor_de = de_stats(&key.receiver, contrast, &key.receptor);
            let lfc_avg = match (ligand_de, receptor_de) {
                (Some(l), Some(r)) => Some((l.0 + r.0) / 2.0),
                _ => None,
            };
            let up = activity.get(&(key.ligand.as_str(), contrast, key.receiver.as_str(), Direction::Up));
            let down = activity.get(&(key.ligand.as_str(), contrast, key.receiver.as_str(), Direction::Down));
            let expr = group_expr.get(&(group, key.clone()));
            let fraction = coexpression
                .get(&(group.to_string(), key.clone()))
                .copied()
                .unwrap_or(0.0);
            let abundance_sender = abundance.get(&(key.sender.as_str(), group)).copied();
            let abundance_receiver = abundance.get(&(key.receiver.as_str(), group)).copied();
            let act_rank = |d: Direction| {
                activity_rank
                    .get(&(key.ligand.clone(), contrast.to_string(), key.receiver.clone(), d))
                    .copied()
            };

            records.push(PrioritizationRecord {
                contrast: contrast.to_string(),
                group: group.to_string(),
                sender: key.sender.clone(),
                receiver: key.receiver.clone(),
                ligand: key.ligand.clone(),
                receptor: key.receptor.clone(),
                id: key.id(),
                lfc_ligand: ligand_de.map(|s| s.0),
                p_val_ligand: ligand_de.map(|s| s.1),
                p_adj_ligand: ligand_de.and_then(|s| s.2),
                lfc_receptor: receptor_de.map(|s| s.0),
                p_val_receptor: receptor_de.map(|s| s.1),
                p_adj_receptor: receptor_de.and_then(|s| s.2),
                ligand_receptor_lfc_avg: lfc_avg,
                activity_up: up.and_then(|a| a.0),
                activity_up_scaled: up.and_then(|a| a.1),
                activity_down: down.and_then(|a| a.0),
                activity_down_scaled: down.and_then(|a| a.1),
                pb_ligand_group: expr.map(|e| e.pb_ligand),
                pb_receptor_group: expr.map(|e| e.pb_receptor),
                frac_ligand_group: expr.map(|e| e.frac_ligand),
                frac_receptor_group: expr.map(|e| e.frac_receptor),
                fraction_ligand_receptor: fraction,
                rel_abundance_sender: abundance_sender.map(|a| a.0),
                rel_abundance_receiver: abundance_receiver.map(|a| a.0),
                scaled_de_ligand: de_ligand.get(&(key.sender.clone(), key.ligand.clone())).copied(),
                scaled_de_receptor: de_receptor.get(&(key.receiver.clone(), key.receptor.clone())).copied(),
                scaled_activity_up: act_rank(Direction::Up),
                scaled_activity_down: act_rank(Direction::Down),
                scaled_exprs_ligand: ligand_specificity
                    .get(&(key.ligand.clone(), key.sender.clone(), group.to_string()))
                    .copied(),
                scaled_exprs_receptor: receptor_specificity
                    .get(&(key.receptor.clone(), key.receiver.clone(), group.to_string()))
                    .copied(),
                scaled_frac_exprs_ligand_receptor: None,
                scaled_abundance_sender: abundance_sender.map(|a| a.1),
                scaled_abundance_receiver: abundance_receiver.map(|a| a.1),
                prioritization_score: None,
                prioritization_rank: 0,
                low_coexpression: fraction < min_sample_prop,
                top_group: String::new(),
            });
        }

        let block = &mut records[block_start..];
        let fractions: Vec<Option<f64>> = block.iter().map(|r| Some(r.fraction_ligand_receptor)).collect();
        for (r, scaled) in block.iter_mut().zip(percentile_rank(&fractions)) {
            r.scaled_frac_exprs_ligand_receptor = scaled;
        }
    }

    score_and_rank(&mut records, weights);
    Ok(records)
}
