//! Pipeline runner chaining the analysis stages.

use super::config::AnalysisConfig;
use crate::abundance::{AbundanceInfo, AggregationScope};
use crate::activity::{score_ligand_activities, ActivityOutput, GeneSetSummary};
use crate::correlation::{correlate_targets, CorrelationRecord};
use crate::data::table::write_tsv;
use crate::data::{CellAnnotation, ContrastSet, CountMatrix, Metadata, PriorNetworks};
use crate::de::{run_de, CellTypeExclusion, DeOutput, NbGlmEngine, PseudobulkDeEngine};
use crate::error::{NicheError, Result};
use crate::linker::{link_senders_receivers, CellTypeRoles, SenderReceiverInfo};
use crate::prioritize::{prioritize, PrioritizationInput, PrioritizationOutput};
use log::{info, warn};
use serde::Serialize;
use std::path::Path;

/// A pseudobulk combination dropped for having too few cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedPseudobulk {
    pub celltype: String,
    pub sample: String,
    pub n_cells: usize,
}

/// Sparsity conditions met along the way. None of them is an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub n_cells: usize,
    pub n_samples: usize,
    pub n_pseudobulk: usize,
    pub n_pseudobulk_kept: usize,
    pub dropped_pseudobulk: Vec<DroppedPseudobulk>,
    pub excluded_celltypes: Vec<CellTypeExclusion>,
    pub n_de_records: usize,
    pub empty_gene_sets: Vec<GeneSetSummary>,
    pub n_ligand_activities: usize,
    pub n_interactions: usize,
    pub n_low_coexpression: usize,
    pub n_correlations: usize,
    pub n_undefined_correlations: usize,
}

impl Diagnostics {
    fn from_stages(annotation: &CellAnnotation, abundance: &AbundanceInfo, de: &DeOutput) -> Self {
        let cells = abundance.samples.cells();
        Self {
            n_cells: annotation.n_cells(),
            n_samples: annotation.samples().len(),
            n_pseudobulk: cells.len(),
            n_pseudobulk_kept: abundance.samples.n_kept(),
            dropped_pseudobulk: cells
                .iter()
                .filter(|c| !c.keep)
                .map(|c| DroppedPseudobulk {
                    celltype: c.celltype.clone(),
                    sample: c.sample.clone(),
                    n_cells: c.n_cells,
                })
                .collect(),
            excluded_celltypes: de.excluded.clone(),
            n_de_records: de.records.len(),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(NicheError::from)
    }
}

/// Output of the abundance and DE stages.
#[derive(Debug, Clone)]
pub struct DeStage {
    pub annotation: CellAnnotation,
    pub contrasts: ContrastSet,
    pub abundance: AbundanceInfo,
    pub de: DeOutput,
    pub diagnostics: Diagnostics,
}

impl DeStage {
    /// Write the abundance, pseudobulk and DE tables plus diagnostics.
    pub fn write_outputs<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_tsv(self.abundance.samples.cells(), dir.join("abundance.tsv"))?;
        write_tsv(&self.abundance.rel_abundance, dir.join("rel_abundance.tsv"))?;
        write_tsv(&self.abundance.sample_records(None), dir.join("pseudobulk_sample.tsv"))?;
        write_tsv(&self.abundance.group_records(None), dir.join("pseudobulk_group.tsv"))?;
        write_tsv(&self.de.records, dir.join("de.tsv"))?;
        std::fs::write(dir.join("diagnostics.json"), self.diagnostics.to_json()?)?;
        Ok(())
    }
}

/// Every table of a full analysis.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub de_stage: DeStage,
    pub linked: SenderReceiverInfo,
    pub activity: ActivityOutput,
    pub prioritization: PrioritizationOutput,
    pub correlation: Vec<CorrelationRecord>,
}

impl PipelineOutput {
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.de_stage.diagnostics
    }

    /// Write every table into `dir`, creating it when needed.
    pub fn write_outputs<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        self.de_stage.write_outputs(dir)?;
        write_tsv(&self.activity.activities, dir.join("ligand_activities.tsv"))?;
        write_tsv(&self.activity.targets, dir.join("ligand_targets.tsv"))?;
        write_tsv(&self.prioritization.group, dir.join("prioritization_group.tsv"))?;
        write_tsv(&self.prioritization.sample, dir.join("prioritization_sample.tsv"))?;
        write_tsv(&self.correlation, dir.join("correlation.tsv"))?;
        info!("Wrote results to {}", dir.display());
        Ok(())
    }
}

/// Runs the analysis described by an [`AnalysisConfig`].
pub struct Pipeline {
    config: AnalysisConfig,
    engine: Box<dyn PseudobulkDeEngine>,
}

impl Pipeline {
    /// Pipeline with the negative binomial GLM engine.
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            engine: Box::new(NbGlmEngine),
        }
    }

    /// Swap the DE engine.
    pub fn with_engine(mut self, engine: impl PseudobulkDeEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Pseudobulk aggregation and differential expression.
    ///
    /// Configuration errors (contrast grammar, unknown groups, missing
    /// columns) are raised before any model is fitted.
    pub fn run_de(&self, counts: &CountMatrix, metadata: &Metadata) -> Result<DeStage> {
        let cfg = &self.config;
        let contrasts = cfg.validate()?;
        let annotation = CellAnnotation::resolve(metadata, &cfg.columns, counts.column_ids())?;
        contrasts.validate_groups(annotation.groups())?;
        cfg.contrast_groups.validate(&contrasts, annotation.groups())?;
        info!(
            "{} cells in {} samples, {} groups and {} cell types; DE engine {}",
            annotation.n_cells(),
            annotation.samples().len(),
            annotation.groups().len(),
            annotation.celltypes().len(),
            self.engine.name()
        );

        let scope = AggregationScope::resolve(&annotation, &cfg.senders_oi, &cfg.receivers_oi, cfg.min_cells)?;
        let abundance = AbundanceInfo::compute(counts, &annotation, &scope)?;
        let de = run_de(
            &abundance.samples,
            &annotation,
            &contrasts,
            self.engine.as_ref(),
            &cfg.de,
            cfg.activity.n_threads,
        )?;
        let diagnostics = Diagnostics::from_stages(&annotation, &abundance, &de);
        Ok(DeStage {
            annotation,
            contrasts,
            abundance,
            de,
            diagnostics,
        })
    }

    /// Full analysis, from counts to prioritized interactions.
    pub fn run(&self, counts: &CountMatrix, metadata: &Metadata, networks: &PriorNetworks) -> Result<PipelineOutput> {
        let cfg = &self.config;
        if networks.organism != cfg.organism {
            warn!(
                "Prior networks are for {:?} but the configuration names {:?}",
                networks.organism,
                cfg.organism
            );
        }
        let mut de_stage = self.run_de(counts, metadata)?;

        let roles = CellTypeRoles::resolve(&de_stage.annotation, &cfg.senders_oi, &cfg.receivers_oi)?;
        let linked = link_senders_receivers(&de_stage.abundance, &de_stage.annotation, &networks.lr_network, &roles);

        let receivers: Vec<String> = roles
            .receivers
            .iter()
            .map(|&r| de_stage.annotation.celltypes()[r].clone())
            .collect();
        let candidates: Vec<String> = networks.lr_network.ligands().into_iter().map(String::from).collect();
        let activity = score_ligand_activities(
            &de_stage.de,
            &receivers,
            &de_stage.contrasts,
            &networks.ligand_target,
            &candidates,
            &cfg.activity,
        )?;

        let input = PrioritizationInput {
            annotation: &de_stage.annotation,
            abundance: &de_stage.abundance,
            linked: &linked,
            de: &de_stage.de,
            activity: &activity,
            contrasts: &de_stage.contrasts,
            contrast_groups: &cfg.contrast_groups,
        };
        let prioritization = prioritize(&input, &cfg.prioritization)?;

        let correlation = correlate_targets(
            &de_stage.abundance.samples,
            &de_stage.annotation,
            &linked,
            &prioritization,
            &activity,
            &cfg.correlation,
        );

        let diagnostics = &mut de_stage.diagnostics;
        diagnostics.empty_gene_sets = activity.empty_gene_sets().cloned().collect();
        diagnostics.n_ligand_activities = activity.activities.len();
        diagnostics.n_interactions = prioritization.group.len();
        diagnostics.n_low_coexpression = prioritization.group.iter().filter(|r| r.low_coexpression).count();
        diagnostics.n_correlations = correlation.len();
        diagnostics.n_undefined_correlations = correlation.iter().filter(|r| !r.is_defined()).count();

        Ok(PipelineOutput {
            de_stage,
            linked,
            activity,
            prioritization,
            correlation,
        })
    }
}
