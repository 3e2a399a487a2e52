//! Joins ligand expression in senders with receptor expression in receivers.

use crate::abundance::AbundanceInfo;
use crate::data::{CellAnnotation, LigandReceptorNetwork};
use crate::error::{NicheError, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Identity of a sender-ligand / receiver-receptor interaction.
///
/// Contrasts and groups are deliberately not part of the key, so the same
/// interaction can be joined across groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InteractionKey {
    pub ligand: String,
    pub receptor: String,
    pub sender: String,
    pub receiver: String,
}

impl InteractionKey {
    /// Display id `ligand_receptor_sender_receiver`.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for InteractionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}_{}", self.ligand, self.receptor, self.sender, self.receiver)
    }
}

/// Sender and receiver cell types, as indices into the annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellTypeRoles {
    pub senders: Vec<usize>,
    pub receivers: Vec<usize>,
}

impl CellTypeRoles {
    /// Resolve names; an empty list selects every cell type.
    pub fn resolve(annotation: &CellAnnotation, senders: &[String], receivers: &[String]) -> Result<Self> {
        let pick = |names: &[String]| -> Result<Vec<usize>> {
            if names.is_empty() {
                return Ok((0..annotation.celltypes().len()).collect());
            }
            names
                .iter()
                .map(|n| {
                    annotation.celltype_position(n).ok_or_else(|| {
                        NicheError::InvalidParameter(format!("Cell type '{}' is not present in the data", n))
                    })
                })
                .collect()
        };
        Ok(Self {
            senders: pick(senders)?,
            receivers: pick(receivers)?,
        })
    }
}

/// Ligand and receptor expression of one interaction in one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleLrExpression {
    pub sample: String,
    pub group: String,
    pub sender: String,
    pub receiver: String,
    pub ligand: String,
    pub receptor: String,
    pub avg_ligand: f64,
    pub avg_receptor: f64,
    pub frac_ligand: f64,
    pub frac_receptor: f64,
    pub pb_ligand: f64,
    pub pb_receptor: f64,
    pub ligand_receptor_prod: f64,
    pub ligand_receptor_fraction_prod: f64,
    pub ligand_receptor_pb_prod: f64,
    pub keep_sender: bool,
    pub keep_receiver: bool,
}

/// Ligand and receptor expression of one interaction averaged over a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupLrExpression {
    pub group: String,
    pub sender: String,
    pub receiver: String,
    pub ligand: String,
    pub receptor: String,
    pub avg_ligand: f64,
    pub avg_receptor: f64,
    pub frac_ligand: f64,
    pub frac_receptor: f64,
    pub pb_ligand: f64,
    pub pb_receptor: f64,
    pub ligand_receptor_prod: f64,
    pub ligand_receptor_fraction_prod: f64,
    pub ligand_receptor_pb_prod: f64,
}

macro_rules! interaction_key {
    ($t:ty) => {
        impl $t {
            /// Interaction identity of this record.
            pub fn key(&self) -> InteractionKey {
                InteractionKey {
                    ligand: self.ligand.clone(),
                    receptor: self.receptor.clone(),
                    sender: self.sender.clone(),
                    receiver: self.receiver.clone(),
                }
            }
        }
    };
}

interaction_key!(SampleLrExpression);
interaction_key!(GroupLrExpression);

/// Output of the linker at both granularities.
#[derive(Debug, Clone, Default)]
pub struct SenderReceiverInfo {
    pub samples: Vec<SampleLrExpression>,
    pub groups: Vec<GroupLrExpression>,
}

/// Emit a joined record for every sender × receiver pair present in a sample
/// (or group) and every prior pair whose ligand and receptor are measured.
///
/// Autocrine pairs (sender == receiver) are included.
pub fn link_senders_receivers(
    abundance: &AbundanceInfo,
    annotation: &CellAnnotation,
    lr_network: &LigandReceptorNetwork,
    roles: &CellTypeRoles,
) -> SenderReceiverInfo {
    let table = &abundance.samples;
    let measured: Vec<(usize, usize, &str, &str)> = lr_network
        .pairs()
        .iter()
        .filter_map(|p| {
            let l = table.gene_position(&p.ligand)?;
            let r = table.gene_position(&p.receptor)?;
            Some((l, r, p.ligand.as_str(), p.receptor.as_str()))
        })
        .collect();
    info!(
        "{} of {} ligand-receptor pairs have both genes measured",
        measured.len(),
        lr_network.len()
    );

    let celltypes = annotation.celltypes();
    let mut samples = Vec::new();
    for (s, info) in annotation.samples().iter().enumerate() {
        for &sender in &roles.senders {
            let Some(js) = table.column(sender, s) else { continue };
            for &receiver in &roles.receivers {
                let Some(jr) = table.column(receiver, s) else { continue };
                let keep_sender = table.cells()[js].keep;
                let keep_receiver = table.cells()[jr].keep;
                for &(l, r, ligand, receptor) in &measured {
                    let (avg_l, avg_r) = (table.avg(l, js), table.avg(r, jr));
                    let (frac_l, frac_r) = (table.frac(l, js), table.frac(r, jr));
                    let (pb_l, pb_r) = (table.pb(l, js), table.pb(r, jr));
                    samples.push(SampleLrExpression {
                        sample: info.sample.clone(),
                        group: info.group.clone(),
                        sender: celltypes[sender].clone(),
                        receiver: celltypes[receiver].clone(),
                        ligand: ligand.to_string(),
                        receptor: receptor.to_string(),
                        avg_ligand: avg_l,
                        avg_receptor: avg_r,
                        frac_ligand: frac_l,
                        frac_receptor: frac_r,
                        pb_ligand: pb_l,
                        pb_receptor: pb_r,
                        ligand_receptor_prod: avg_l * avg_r,
                        ligand_receptor_fraction_prod: frac_l * frac_r,
                        ligand_receptor_pb_prod: pb_l * pb_r,
                        keep_sender,
                        keep_receiver,
                    });
                }
            }
        }
    }

    let groups_tbl = &abundance.groups;
    let mut groups = Vec::new();
    for (g, group) in annotation.groups().iter().enumerate() {
        for &sender in &roles.senders {
            let Some(ks) = groups_tbl.column(sender, g) else { continue };
            for &receiver in &roles.receivers {
                let Some(kr) = groups_tbl.column(receiver, g) else { continue };
                for &(l, r, ligand, receptor) in &measured {
                    let (avg_l, avg_r) = (groups_tbl.avg(l, ks), groups_tbl.avg(r, kr));
                    let (frac_l, frac_r) = (groups_tbl.frac(l, ks), groups_tbl.frac(r, kr));
                    let (pb_l, pb_r) = (groups_tbl.pb(l, ks), groups_tbl.pb(r, kr));
                    groups.push(GroupLrExpression {
                        group: group.clone(),
                        sender: celltypes[sender].clone(),
                        receiver: celltypes[receiver].clone(),
                        ligand: ligand.to_string(),
                        receptor: receptor.to_string(),
                        avg_ligand: avg_l,
                        avg_receptor: avg_r,
                        frac_ligand: frac_l,
                        frac_receptor: frac_r,
                        pb_ligand: pb_l,
                        pb_receptor: pb_r,
                        ligand_receptor_prod: avg_l * avg_r,
                        ligand_receptor_fraction_prod: frac_l * frac_r,
                        ligand_receptor_pb_prod: pb_l * pb_r,
                    });
                }
            }
        }
    }

    info!(
        "Linked {} sample-level and {} group-level sender-receiver records",
        samples.len(),
        groups.len()
    );
    SenderReceiverInfo { samples, groups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::test_support::toy_dataset;
    use crate::abundance::AggregationScope;
    use crate::data::LigandReceptorPair;
    use approx::assert_relative_eq;

    fn linked() -> SenderReceiverInfo {
        let (counts, annotation) = toy_dataset();
        let scope = AggregationScope::resolve(&annotation, &[], &[], 1).unwrap();
        let abundance = AbundanceInfo::compute(&counts, &annotation, &scope).unwrap();
        let lr = LigandReceptorNetwork::new(vec![
            LigandReceptorPair { ligand: "G1".into(), receptor: "G2".into() },
            LigandReceptorPair { ligand: "G1".into(), receptor: "MISSING".into() },
        ]);
        let roles = CellTypeRoles::resolve(&annotation, &[], &[]).unwrap();
        link_senders_receivers(&abundance, &annotation, &lr, &roles)
    }

    #[test]
    fn test_interaction_id() {
        let key = InteractionKey {
            ligand: "CXCL12".into(),
            receptor: "CXCR4".into(),
            sender: "Fibro".into(),
            receiver: "T".into(),
        };
        assert_eq!(key.id(), "CXCL12_CXCR4_Fibro_T");
    }

    #[test]
    fn test_full_cross_product_per_sample() {
        let info = linked();
        // S1 has B and T (2x2 pairs), S2 and S3 only T (1 pair each); one measured LR pair
        assert_eq!(info.samples.len(), 4 + 1 + 1);
        assert!(info
            .samples
            .iter()
            .any(|r| r.sender == "T" && r.receiver == "T" && r.sample == "S1"));
    }

    #[test]
    fn test_pb_product() {
        let info = linked();
        for r in &info.samples {
            assert_relative_eq!(r.ligand_receptor_pb_prod, r.pb_ligand * r.pb_receptor);
            assert_relative_eq!(r.ligand_receptor_fraction_prod, r.frac_ligand * r.frac_receptor);
        }
        // groups: A has B and T, B has only T
        assert_eq!(info.groups.len(), 4 + 1);
    }
}
