//! Ligand activity: enrichment of a ligand's prior targets among the DE genes
//! of a receiver.
//!
//! For every receiver, contrast and direction the DE gene set is compared
//! against the receiver's expressed genes. Each ligand's top-N prior weights
//! score every background gene (0 outside the top N) and the activity is
//! `AUROC - 0.5` of those scores predicting gene-set membership. Activities
//! are z-scaled across ligands within (receiver, contrast, direction).

mod auroc;
mod geneset;

pub use auroc::{auroc, midranks, z_scale};
pub use geneset::{select_gene_set, Direction, GeneSetThresholds};

use crate::data::table::na;
use crate::data::{ContrastSet, LigandTargetMatrix};
use crate::de::DeOutput;
use crate::error::Result;
use crate::parallel;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ligand activity options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub logfc_threshold: f64,
    pub p_val_threshold: f64,
    /// Select DE genes on adjusted rather than raw p-values.
    pub p_val_adj: bool,
    /// Targets per ligand kept from the prior.
    pub top_n_targets: usize,
    /// Worker threads, `None` for the rayon default.
    pub n_threads: Option<usize>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            logfc_threshold: 0.5,
            p_val_threshold: 0.05,
            p_val_adj: false,
            top_n_targets: 250,
            n_threads: None,
        }
    }
}

impl ActivityConfig {
    pub fn thresholds(&self) -> GeneSetThresholds {
        GeneSetThresholds {
            logfc_threshold: self.logfc_threshold,
            p_val_threshold: self.p_val_threshold,
            p_val_adj: self.p_val_adj,
        }
    }
}

/// Activity of one ligand for one receiver, contrast and direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LigandActivity {
    pub ligand: String,
    pub contrast: String,
    pub receiver: String,
    pub direction: Direction,
    /// `AUROC - 0.5`; NA when every background gene is in the gene set.
    #[serde(serialize_with = "na")]
    pub activity: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_scaled: Option<f64>,
}

/// A top-N prior target of a ligand that is in the DE gene set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LigandTargetLink {
    pub ligand: String,
    pub contrast: String,
    pub receiver: String,
    pub direction: Direction,
    pub target: String,
    pub ligand_target_weight: f64,
    /// 1-based position of the target in the ligand's prior ranking.
    pub prior_rank: usize,
    #[serde(serialize_with = "na")]
    pub activity: Option<f64>,
    #[serde(serialize_with = "na")]
    pub activity_scaled: Option<f64>,
}

/// Size of one DE gene set and its background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSetSummary {
    pub receiver: String,
    pub contrast: String,
    pub direction: Direction,
    pub n_genes: usize,
    pub n_background: usize,
}

/// Everything the activity stage produces.
#[derive(Debug, Clone, Default)]
pub struct ActivityOutput {
    pub activities: Vec<LigandActivity>,
    pub targets: Vec<LigandTargetLink>,
    pub gene_sets: Vec<GeneSetSummary>,
}

impl ActivityOutput {
    /// Gene sets that were empty and produced no activities.
    pub fn empty_gene_sets(&self) -> impl Iterator<Item = &GeneSetSummary> {
        self.gene_sets.iter().filter(|g| g.n_genes == 0)
    }
}

/// Ligands of `candidates` present in the prior with at least one target.
fn scorable_ligands(prior: &LigandTargetMatrix, candidates: &[String]) -> Vec<(String, usize)> {
    let connected: BTreeSet<usize> = prior.connected_ligands().into_iter().collect();
    let unique: BTreeSet<&String> = candidates.iter().collect();
    unique
        .into_iter()
        .filter_map(|l| {
            let idx = prior.ligand_position(l)?;
            connected.contains(&idx).then(|| (l.clone(), idx))
        })
        .collect()
}

/// Activities of every ligand for one receiver.
fn score_receiver(
    receiver: &str,
    de: &DeOutput,
    contrasts: &ContrastSet,
    prior: &LigandTargetMatrix,
    ligands: &[(String, usize)],
    config: &ActivityConfig,
) -> ActivityOutput {
    let mut out = ActivityOutput::default();
    let Some(expressed) = de.expressed.get(receiver) else {
        return out;
    };

    // Background: expressed genes known to the prior, as prior gene indices.
    let background: Vec<(usize, &String)> = expressed
        .iter()
        .filter_map(|g| prior.gene_position(g).map(|p| (p, g)))
        .collect();
    let position_in_background: std::collections::HashMap<usize, usize> =
        background.iter().enumerate().map(|(i, &(p, _))| (p, i)).collect();

    // Top-N targets per ligand, restricted scores over the background.
    let top: Vec<Vec<(usize, f64)>> = ligands
        .iter()
        .map(|(_, l)| prior.top_targets(*l, config.top_n_targets))
        .collect();
    let scores: Vec<Vec<f64>> = top
        .iter()
        .map(|targets| {
            let mut s = vec![0.0; background.len()];
            for &(gene, w) in targets {
                if let Some(&i) = position_in_background.get(&gene) {
                    s[i] = w;
                }
            }
            s
        })
        .collect();

    let thresholds = config.thresholds();
    for contrast in contrasts.names() {
        for direction in Direction::BOTH {
            let gene_set = select_gene_set(de, receiver, contrast, direction, &thresholds);
            let labels: Vec<bool> = background.iter().map(|(_, g)| gene_set.contains(*g)).collect();
            let n_genes = labels.iter().filter(|&&l| l).count();
            out.gene_sets.push(GeneSetSummary {
                receiver: receiver.to_string(),
                contrast: contrast.to_string(),
                direction,
                n_genes,
                n_background: background.len(),
            });
            if n_genes == 0 {
                continue;
            }

            let raw: Vec<Option<f64>> = scores
                .iter()
                .map(|s| auroc(s, &labels).map(|a| a - 0.5))
                .collect();
            let scaled = z_scale(&raw.iter().map(|a| a.unwrap_or(f64::NAN)).collect::<Vec<_>>());

            for (k, (ligand, _)) in ligands.iter().enumerate() {
                let activity = raw[k];
                let activity_scaled = activity.map(|_| scaled[k]);
                for (rank, &(gene, weight)) in top[k].iter().enumerate() {
                    let target = &prior.genes()[gene];
                    if gene_set.contains(target) {
                        out.targets.push(LigandTargetLink {
                            ligand: ligand.clone(),
                            contrast: contrast.to_string(),
                            receiver: receiver.to_string(),
                            direction,
                            target: target.clone(),
                            ligand_target_weight: weight,
                            prior_rank: rank + 1,
                            activity,
                            activity_scaled,
                        });
                    }
                }
                out.activities.push(LigandActivity {
                    ligand: ligand.clone(),
                    contrast: contrast.to_string(),
                    receiver: receiver.to_string(),
                    direction,
                    activity,
                    activity_scaled,
                });
            }
        }
    }
    out
}

/// Score ligand activities for every receiver in parallel.
///
/// `candidate_ligands` are typically the ligands of the ligand-receptor
/// network; those absent from the prior or without any target are skipped.
/// Receivers missing from the DE table yield nothing.
pub fn score_ligand_activities(
    de: &DeOutput,
    receivers: &[String],
    contrasts: &ContrastSet,
    prior: &LigandTargetMatrix,
    candidate_ligands: &[String],
    config: &ActivityConfig,
) -> Result<ActivityOutput> {
    let ligands = scorable_ligands(prior, candidate_ligands);
    info!(
        "Scoring {} ligands for {} receivers ({} candidate ligands without prior targets)",
        ligands.len(),
        receivers.len(),
        candidate_ligands.iter().collect::<BTreeSet<_>>().len() - ligands.len()
    );

    let parts: Vec<ActivityOutput> = parallel::install(config.n_threads, || {
        receivers
            .par_iter()
            .map(|receiver| {
                debug!("Ligand activities for receiver {}", receiver);
                score_receiver(receiver, de, contrasts, prior, &ligands, config)
            })
            .collect()
    })?;

    let mut out = ActivityOutput::default();
    for part in parts {
        out.activities.extend(part.activities);
        out.targets.extend(part.targets);
        out.gene_sets.extend(part.gene_sets);
    }
    for empty in out.empty_gene_sets() {
        warn!(
            "No {} DE genes for receiver {} in contrast {}",
            empty.direction, empty.receiver, empty.contrast
        );
    }
    info!(
        "{} ligand activities and {} ligand-target links",
        out.activities.len(),
        out.targets.len()
    );
    Ok(out)
}
