//! multiniche - multi-sample cell-cell communication CLI
//!
//! Runs the prioritization pipeline from a YAML configuration and TSV inputs.

use clap::{Parser, Subcommand};
use log::info;
use multiniche::data::{
    ContrastSet, CountMatrix, LigandReceptorNetwork, LigandTargetMatrix, Metadata, PriorNetworks,
};
use multiniche::error::Result;
use multiniche::pipeline::{AnalysisConfig, Pipeline};
use std::path::{Path, PathBuf};

/// Multi-sample, multi-condition cell-cell communication inference
#[derive(Parser)]
#[command(name = "multiniche")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every table to a directory
    Run {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Path to genes x cells count TSV
        #[arg(short = 'x', long)]
        counts: PathBuf,

        /// Path to cell metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Ligand-receptor network TSV (columns `ligand`, `receptor`)
        #[arg(long)]
        lr_network: PathBuf,

        /// Ligand-target matrix TSV (genes x ligands)
        #[arg(long)]
        ligand_target: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Pseudobulk aggregation and differential expression only
    De {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Path to genes x cells count TSV
        #[arg(short = 'x', long)]
        counts: PathBuf,

        /// Path to cell metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Parse a contrast list and print the group weights of each contrast
    CheckContrasts {
        /// Contrast list, e.g. "'A-B','B-A'"
        contrasts: String,

        /// Comma-separated groups present in the data
        #[arg(short, long, value_delimiter = ',')]
        groups: Vec<String>,
    },

    /// Write a default configuration YAML
    InitConfig {
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            counts,
            metadata,
            lr_network,
            ligand_target,
            output,
        } => cmd_run(&config, &counts, &metadata, &lr_network, &ligand_target, &output),

        Commands::De {
            config,
            counts,
            metadata,
            output,
        } => cmd_de(&config, &counts, &metadata, &output),

        Commands::CheckContrasts { contrasts, groups } => cmd_check_contrasts(&contrasts, &groups),

        Commands::InitConfig { output } => cmd_init_config(&output),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(if e.is_configuration() { 2 } else { 1 });
    }
}

fn load_inputs(config_path: &Path, counts_path: &Path, metadata_path: &Path) -> Result<(AnalysisConfig, CountMatrix, Metadata)> {
    info!("Loading configuration from {:?}", config_path);
    let config = AnalysisConfig::load(config_path)?;
    let counts = CountMatrix::from_tsv(counts_path)?;
    let metadata = Metadata::from_tsv(metadata_path, &config.columns.categorical_columns())?;
    info!("Loaded {} genes x {} cells", counts.n_genes(), counts.n_columns());
    Ok((config, counts, metadata))
}

/// Run the full pipeline.
fn cmd_run(
    config_path: &Path,
    counts_path: &Path,
    metadata_path: &Path,
    lr_path: &Path,
    ligand_target_path: &Path,
    output_dir: &Path,
) -> Result<()> {
    let (config, counts, metadata) = load_inputs(config_path, counts_path, metadata_path)?;
    let networks = PriorNetworks::new(
        config.organism,
        LigandReceptorNetwork::from_tsv(lr_path)?,
        LigandTargetMatrix::from_tsv(ligand_target_path)?,
    );
    info!(
        "Prior networks: {} ligand-receptor pairs, {} ligands x {} target genes",
        networks.lr_network.len(),
        networks.ligand_target.ligands().len(),
        networks.ligand_target.n_genes()
    );

    let output = Pipeline::new(config).run(&counts, &metadata, &networks)?;
    output.write_outputs(output_dir)?;

    let diagnostics = output.diagnostics();
    info!(
        "Done: {} prioritized interactions, {} cell types excluded from DE, {} empty DE gene sets",
        diagnostics.n_interactions,
        diagnostics.excluded_celltypes.len(),
        diagnostics.empty_gene_sets.len()
    );
    Ok(())
}

/// Pseudobulk and DE only.
fn cmd_de(config_path: &Path, counts_path: &Path, metadata_path: &Path, output_dir: &Path) -> Result<()> {
    let (config, counts, metadata) = load_inputs(config_path, counts_path, metadata_path)?;
    let stage = Pipeline::new(config).run_de(&counts, &metadata)?;
    stage.write_outputs(output_dir)?;
    info!("Done: {} DE records written to {:?}", stage.de.records.len(), output_dir);
    Ok(())
}

/// Validate a contrast list.
fn cmd_check_contrasts(contrasts: &str, groups: &[String]) -> Result<()> {
    let set = ContrastSet::parse(contrasts)?;
    if !groups.is_empty() {
        set.validate_groups(groups)?;
    }
    for contrast in set.iter() {
        let terms: Vec<String> = contrast
            .coefficients
            .iter()
            .map(|(group, w)| format!("{}={}", group, w))
            .collect();
        println!("{}\t{}", contrast.name, terms.join(","));
    }
    Ok(())
}

/// Write the default configuration.
fn cmd_init_config(output_path: &Path) -> Result<()> {
    let config = AnalysisConfig::default();
    config.save(output_path)?;
    info!("Wrote default configuration to {:?}", output_path);
    Ok(())
}
