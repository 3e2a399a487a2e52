//! Prioritization criteria and their weights.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scaled signal contributing to the prioritization score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Differential expression of the ligand in the sender.
    DeLigand,
    /// Differential expression of the receptor in the receiver.
    DeReceptor,
    /// Ligand activity against the up-regulated receiver genes.
    ActivityUp,
    /// Ligand activity against the down-regulated receiver genes.
    ActivityDown,
    /// Ligand expression in the sender relative to other senders and groups.
    ExprsLigand,
    /// Receptor expression in the receiver relative to other receivers and groups.
    ExprsReceptor,
    /// Fraction of samples co-expressing ligand and receptor.
    FracExprsLigandReceptor,
    AbundanceSender,
    AbundanceReceiver,
}

impl Criterion {
    pub const ALL: [Criterion; 9] = [
        Criterion::DeLigand,
        Criterion::DeReceptor,
        Criterion::ActivityUp,
        Criterion::ActivityDown,
        Criterion::ExprsLigand,
        Criterion::ExprsReceptor,
        Criterion::FracExprsLigandReceptor,
        Criterion::AbundanceSender,
        Criterion::AbundanceReceiver,
    ];
}

/// Criterion → weight map. Criteria that are not listed weigh 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriterionWeights(BTreeMap<Criterion, f64>);

impl CriterionWeights {
    pub fn new(weights: impl IntoIterator<Item = (Criterion, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    /// Weight of a criterion, 0 when unspecified.
    pub fn get(&self, criterion: Criterion) -> f64 {
        self.0.get(&criterion).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, criterion: Criterion, weight: f64) {
        self.0.insert(criterion, weight);
    }

    /// Criteria with a positive weight.
    pub fn active(&self) -> impl Iterator<Item = (Criterion, f64)> + '_ {
        self.0.iter().filter(|(_, &w)| w > 0.0).map(|(&c, &w)| (c, w))
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (c, &w) in &self.0 {
            if !w.is_finite() || w < 0.0 {
                return Err(crate::error::NicheError::InvalidParameter(format!(
                    "Weight of {:?} must be finite and nonnegative, got {}",
                    c, w
                )));
            }
        }
        Ok(())
    }
}

impl Default for CriterionWeights {
    /// DE of ligand and receptor, up-activity, ligand and receptor expression
    /// specificity and co-expression, each with weight 1.
    fn default() -> Self {
        Self::new([
            (Criterion::DeLigand, 1.0),
            (Criterion::DeReceptor, 1.0),
            (Criterion::ActivityUp, 1.0),
            (Criterion::ActivityDown, 0.0),
            (Criterion::ExprsLigand, 1.0),
            (Criterion::ExprsReceptor, 1.0),
            (Criterion::FracExprsLigandReceptor, 1.0),
            (Criterion::AbundanceSender, 0.0),
            (Criterion::AbundanceReceiver, 0.0),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_weight_is_zero() {
        let w = CriterionWeights::new([(Criterion::DeLigand, 2.0)]);
        assert_eq!(w.get(Criterion::DeLigand), 2.0);
        assert_eq!(w.get(Criterion::AbundanceSender), 0.0);
        assert_eq!(w.active().count(), 1);
    }

    #[test]
    fn test_weights_yaml() {
        let w: CriterionWeights = serde_yaml::from_str("de_ligand: 1.0\nactivity_up: 0.5\n").unwrap();
        assert_eq!(w.get(Criterion::ActivityUp), 0.5);
        assert_eq!(w.get(Criterion::DeReceptor), 0.0);
        assert!(CriterionWeights::new([(Criterion::DeLigand, -1.0)]).validate().is_err());
    }

    #[test]
    fn test_default_scenario() {
        let w = CriterionWeights::default();
        let active: Vec<Criterion> = w.active().map(|(c, _)| c).collect();
        assert_eq!(active.len(), 6);
        assert!(!active.contains(&Criterion::ActivityDown));
    }
}
