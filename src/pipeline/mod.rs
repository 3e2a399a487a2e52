//! Configuration and orchestration of the full analysis.
//!
//! Stages run in a fixed order: pseudobulk aggregation, differential
//! expression, sender-receiver linking, ligand activity, prioritization and
//! target correlation. Every stage consumes the previous stages' outputs
//! read-only.

mod config;
mod runner;

pub use config::AnalysisConfig;
pub use runner::{DeStage, Diagnostics, DroppedPseudobulk, Pipeline, PipelineOutput};
