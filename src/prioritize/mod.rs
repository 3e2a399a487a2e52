//! Multi-criterion prioritization of sender-receiver interactions.
//!
//! Every interaction found by the linker is evaluated in every contrast, in
//! the context of the group that contrast characterises. Heterogeneous
//! signals (DE statistics, ligand activity, expression specificity,
//! co-expression, abundance) are rescaled to [0, 1] and combined into a
//! weighted mean. Missing signals drop out of the mean.

mod criteria;
mod engine;
mod sample;
mod scaling;

pub use criteria::{Criterion, CriterionWeights};
pub use engine::{prioritize_groups, score_and_rank, weighted_score, PrioritizationInput, PrioritizationRecord};
pub use sample::{prioritize_samples, SamplePrioritizationRecord};
pub use scaling::{mean_present, min_max_scale, percentile_rank, signed_significance};

use crate::error::{NicheError, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Prioritization options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizationConfig {
    pub weights: CriterionWeights,
    /// Minimum fraction of expressing cells for a gene to count as
    /// co-expressed in a sample.
    pub fraction_cutoff: f64,
    /// Interactions co-expressed in fewer than this share of a group's
    /// samples are flagged `low_coexpression`.
    pub min_sample_prop: f64,
}

impl Default for PrioritizationConfig {
    fn default() -> Self {
        Self {
            weights: CriterionWeights::default(),
            fraction_cutoff: 0.05,
            min_sample_prop: 0.5,
        }
    }
}

impl PrioritizationConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        for (name, v) in [
            ("fraction_cutoff", self.fraction_cutoff),
            ("min_sample_prop", self.min_sample_prop),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(NicheError::InvalidParameter(format!(
                    "{} must lie in [0, 1], got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

/// Group- and sample-level prioritization tables.
#[derive(Debug, Clone, Default)]
pub struct PrioritizationOutput {
    pub group: Vec<PrioritizationRecord>,
    pub sample: Vec<SamplePrioritizationRecord>,
}

impl PrioritizationOutput {
    /// Group records of a contrast in rank order.
    pub fn ranked(&self, contrast: &str) -> Vec<&PrioritizationRecord> {
        let mut rows: Vec<&PrioritizationRecord> = self.group.iter().filter(|r| r.contrast == contrast).collect();
        rows.sort_by_key(|r| r.prioritization_rank);
        rows
    }

    /// The `n` best records of every group, ranked within their contrast.
    pub fn top_per_group(&self, n: usize) -> Vec<&PrioritizationRecord> {
        let mut rows: Vec<&PrioritizationRecord> = self.group.iter().collect();
        rows.sort_by(|a, b| {
            (a.group.as_str(), a.prioritization_rank).cmp(&(b.group.as_str(), b.prioritization_rank))
        });
        let mut out = Vec::new();
        let mut taken: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for r in rows {
            let count = taken.entry(r.group.as_str()).or_insert(0);
            if *count < n {
                *count += 1;
                out.push(r);
            }
        }
        out
    }
}

/// Build both prioritization tables.
pub fn prioritize(input: &PrioritizationInput, config: &PrioritizationConfig) -> Result<PrioritizationOutput> {
    config.validate()?;
    let group = prioritize_groups(input, &config.weights, config.fraction_cutoff, config.min_sample_prop)?;
    let sample = prioritize_samples(&input.linked.samples, &group, input.contrast_groups);
    info!(
        "Prioritized {} group-level and {} sample-level records ({} flagged for low co-expression)",
        group.len(),
        sample.len(),
        group.iter().filter(|r| r.low_coexpression).count()
    );
    Ok(PrioritizationOutput { group, sample })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::PrioritizationInput;
    use crate::abundance::test_support::two_group_dataset;
    use crate::abundance::{AbundanceInfo, AggregationScope};
    use crate::activity::{score_ligand_activities, ActivityConfig, ActivityOutput};
    use crate::data::{
        CellAnnotation, ContrastGroup, ContrastGroupTable, ContrastSet, LigandReceptorNetwork, LigandReceptorPair,
        LigandTargetMatrix,
    };
    use crate::de::{run_de, DeConfig, DeOutput, NbGlmEngine};
    use crate::linker::{link_senders_receivers, CellTypeRoles, SenderReceiverInfo};

    /// Every upstream stage run on the two-group dataset.
    ///
    /// Pairs UP->FLAT and DOWN->FLAT; in the prior UP targets the UP gene and
    /// DOWN targets FLAT. Contrast `Trt-Ctrl` maps to Trt, `Ctrl-Trt` to Ctrl.
    pub struct Stages {
        pub annotation: CellAnnotation,
        pub abundance: AbundanceInfo,
        pub linked: SenderReceiverInfo,
        pub de: DeOutput,
        pub activity: ActivityOutput,
        pub contrasts: ContrastSet,
        pub contrast_groups: ContrastGroupTable,
        pub prior: LigandTargetMatrix,
    }

    impl Stages {
        pub fn build(include: impl Fn(usize, &str) -> bool) -> Self {
            let (counts, annotation) = two_group_dataset(include);
            let scope = AggregationScope::resolve(&annotation, &[], &[], 2).unwrap();
            let abundance = AbundanceInfo::compute(&counts, &annotation, &scope).unwrap();
            let lr = LigandReceptorNetwork::new(vec![
                LigandReceptorPair { ligand: "UP".into(), receptor: "FLAT".into() },
                LigandReceptorPair { ligand: "DOWN".into(), receptor: "FLAT".into() },
            ]);
            let roles = CellTypeRoles::resolve(&annotation, &[], &[]).unwrap();
            let linked = link_senders_receivers(&abundance, &annotation, &lr, &roles);

            let contrasts = ContrastSet::parse("'Trt-Ctrl','Ctrl-Trt'").unwrap();
            let contrast_groups = ContrastGroupTable::new(vec![
                ContrastGroup { contrast: "Trt-Ctrl".into(), group: "Trt".into() },
                ContrastGroup { contrast: "Ctrl-Trt".into(), group: "Ctrl".into() },
            ]);
            let de = run_de(&abundance.samples, &annotation, &contrasts, &NbGlmEngine, &DeConfig::default(), Some(2))
                .unwrap();

            let genes: Vec<String> = ["UP", "FLAT", "DOWN"].iter().map(|g| g.to_string()).collect();
            let prior = LigandTargetMatrix::from_triplets(
                vec!["UP".into(), "DOWN".into()],
                genes,
                vec![(0, 0, 0.9), (1, 1, 0.9)],
            )
            .unwrap();
            let receivers = annotation.celltypes().to_vec();
            let candidates: Vec<String> = lr.ligands().into_iter().map(String::from).collect();
            let activity = score_ligand_activities(
                &de,
                &receivers,
                &contrasts,
                &prior,
                &candidates,
                &ActivityConfig::default(),
            )
            .unwrap();

            Self {
                annotation,
                abundance,
                linked,
                de,
                activity,
                contrasts,
                contrast_groups,
                prior,
            }
        }

        pub fn input(&self) -> PrioritizationInput<'_> {
            PrioritizationInput {
                annotation: &self.annotation,
                abundance: &self.abundance,
                linked: &self.linked,
                de: &self.de,
                activity: &self.activity,
                contrasts: &self.contrasts,
                contrast_groups: &self.contrast_groups,
            }
        }
    }
}
