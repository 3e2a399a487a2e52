//! Multi-sample, multi-condition cell-cell communication inference.
//!
//! From single-cell counts annotated by sample, group and cell type, the
//! library prioritizes sender-ligand / receiver-receptor interactions per
//! group by combining pseudobulk expression, differential expression and
//! the activity of ligands on their predicted target genes.
//!
//! # Overview
//!
//! The library is organized into stage modules:
//!
//! - **data**: Containers (CountMatrix, Metadata, CellAnnotation), contrasts and prior networks
//! - **abundance**: Pseudobulk aggregation per (cell type, sample) and relative abundance
//! - **linker**: Ligand expression in senders joined with receptor expression in receivers
//! - **de**: Per-cell-type pseudobulk differential expression
//! - **model**: Negative binomial GLM
//! - **test**: Wald tests of contrasts
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **activity**: Ligand activity against DE gene sets
//! - **prioritize**: Multi-criterion scoring and ranking
//! - **correlation**: Ligand-receptor / target co-variation across samples
//! - **pipeline**: Configuration and orchestration
//!
//! # Example
//!
//! ```no_run
//! use multiniche::prelude::*;
//!
//! let config = AnalysisConfig::load("analysis.yaml").unwrap();
//! let counts = CountMatrix::from_tsv("counts.tsv").unwrap();
//! let metadata = Metadata::from_tsv("cells.tsv", &config.columns.categorical_columns()).unwrap();
//! let networks = PriorNetworks::new(
//!     config.organism,
//!     LigandReceptorNetwork::from_tsv("lr_network.tsv").unwrap(),
//!     LigandTargetMatrix::from_tsv("ligand_target.tsv").unwrap(),
//! );
//!
//! let output = Pipeline::new(config).run(&counts, &metadata, &networks).unwrap();
//! output.write_outputs("results").unwrap();
//! ```

pub mod abundance;
pub mod activity;
pub mod correct;
pub mod correlation;
pub mod data;
pub mod de;
pub mod error;
pub mod linker;
pub mod model;
pub mod parallel;
pub mod pipeline;
pub mod prioritize;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::abundance::{AbundanceInfo, AggregationScope, PseudobulkTable, RelAbundance};
    pub use crate::activity::{
        score_ligand_activities, ActivityConfig, ActivityOutput, Direction, LigandActivity, LigandTargetLink,
    };
    pub use crate::correct::correct_bh;
    pub use crate::correlation::{
        correlate_targets, CorrelationConfig, CorrelationFilter, CorrelationMethod, CorrelationRecord,
    };
    pub use crate::data::{
        CellAnnotation, ColumnSchema, ContrastGroup, ContrastGroupTable, ContrastSet, CountMatrix,
        LigandReceptorNetwork, LigandReceptorPair, LigandTargetMatrix, Metadata, Organism, PriorNetworks,
        Variable, VariableType,
    };
    pub use crate::de::{run_de, DeConfig, DeOutput, DeRecord, NbGlmEngine, PseudobulkDeEngine};
    pub use crate::error::{NicheError, Result};
    pub use crate::linker::{link_senders_receivers, CellTypeRoles, InteractionKey, SenderReceiverInfo};
    pub use crate::model::{model_nb, NbFit};
    pub use crate::pipeline::{AnalysisConfig, DeStage, Diagnostics, Pipeline, PipelineOutput};
    pub use crate::prioritize::{
        prioritize, score_and_rank, Criterion, CriterionWeights, PrioritizationConfig, PrioritizationInput,
        PrioritizationOutput, PrioritizationRecord, SamplePrioritizationRecord,
    };
    pub use crate::test::{test_wald_contrasts, WaldResult};
}
