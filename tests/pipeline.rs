//! End-to-end runs of the pipeline on small synthetic studies.

use multiniche::prelude::*;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const GENES: [&str; 6] = ["LIG1", "REC1", "LIG2", "REC2", "HK1", "HK2"];

const CONFIG: &str = "\
min_cells: 3
contrasts: \"'Treated-Control','Control-Treated'\"
contrast_groups:
  - contrast: Treated-Control
    group: Treated
  - contrast: Control-Treated
    group: Control
activity:
  n_threads: 2
";

/// Samples S1-S3 are Control, S4-S6 Treated; cell types A and B with five
/// cells per present (sample, cell type). LIG1 and REC1 go up about 3x in
/// Treated, LIG2 and REC2 are flat.
struct Study {
    dir: TempDir,
}

impl Study {
    fn new(include: impl Fn(usize, &str) -> bool, prior_edges: &[(&str, &str, f64)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut cell_ids = Vec::new();
        let mut cells = String::from("cell\tsample_id\tgroup_id\tcelltype_id\n");
        let mut columns: Vec<Vec<u64>> = Vec::new();
        for s in 0..6usize {
            let treated = s >= 3;
            for ct in ["A", "B"] {
                if !include(s, ct) {
                    continue;
                }
                for k in 0..5usize {
                    let id = format!("S{}_{}_{}", s + 1, ct, k);
                    let group = if treated { "Treated" } else { "Control" };
                    writeln!(cells, "{}\tS{}\t{}\t{}", id, s + 1, group, ct).unwrap();
                    cell_ids.push(id);
                    columns.push(vec![
                        if treated { 40 } else { 10 } + ((s + k) % 3) as u64,
                        if treated { 30 } else { 8 } + ((s * k) % 3) as u64,
                        20 + ((s + k) % 4) as u64,
                        15 + ((s * k + 1) % 3) as u64,
                        100 + ((k % 2) * 3) as u64,
                        80 + ((s % 2) * 2 + k % 3) as u64,
                    ]);
                }
            }
        }

        let mut counts = format!("gene\t{}\n", cell_ids.join("\t"));
        for (g, gene) in GENES.iter().enumerate() {
            let row: Vec<String> = columns.iter().map(|c| c[g].to_string()).collect();
            writeln!(counts, "{}\t{}", gene, row.join("\t")).unwrap();
        }

        let ligands = ["LIG1", "LIG2"];
        let mut prior = format!("gene\t{}\n", ligands.join("\t"));
        for gene in GENES {
            let row: Vec<String> = ligands
                .iter()
                .map(|l| {
                    prior_edges
                        .iter()
                        .find(|(pl, pg, _)| pl == l && *pg == gene)
                        .map(|e| e.2.to_string())
                        .unwrap_or_else(|| "0".to_string())
                })
                .collect();
            writeln!(prior, "{}\t{}", gene, row.join("\t")).unwrap();
        }

        let files = [
            ("counts.tsv", counts),
            ("cells.tsv", cells),
            ("lr_network.tsv", "ligand\treceptor\nLIG1\tREC1\nLIG2\tREC2\n".to_string()),
            ("ligand_target.tsv", prior),
            ("config.yaml", CONFIG.to_string()),
        ];
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn load(&self) -> (AnalysisConfig, CountMatrix, Metadata, PriorNetworks) {
        let config = AnalysisConfig::load(self.path("config.yaml")).unwrap();
        let counts = CountMatrix::from_tsv(self.path("counts.tsv")).unwrap();
        let metadata = Metadata::from_tsv(self.path("cells.tsv"), &config.columns.categorical_columns()).unwrap();
        let networks = PriorNetworks::new(
            config.organism,
            LigandReceptorNetwork::from_tsv(self.path("lr_network.tsv")).unwrap(),
            LigandTargetMatrix::from_tsv(self.path("ligand_target.tsv")).unwrap(),
        );
        (config, counts, metadata, networks)
    }

    fn run(&self) -> PipelineOutput {
        let (config, counts, metadata, networks) = self.load();
        Pipeline::new(config).run(&counts, &metadata, &networks).unwrap()
    }
}

fn records<'a>(output: &'a PipelineOutput, contrast: &str, ligand: &str) -> Vec<&'a PrioritizationRecord> {
    output
        .prioritization
        .group
        .iter()
        .filter(|r| r.contrast == contrast && r.ligand == ligand)
        .collect()
}

#[test]
fn test_de_criteria_rank_pair_without_prior_edges() {
    let output = Study::new(|_, _| true, &[]).run();

    assert!(output.activity.activities.is_empty());
    assert!(output.prioritization.group.iter().all(|r| r.activity_up.is_none()));

    let strong = records(&output, "Treated-Control", "LIG1");
    let weak = records(&output, "Treated-Control", "LIG2");
    assert_eq!(strong.len(), 4);
    assert_eq!(weak.len(), 4);
    for s in &strong {
        assert!(s.lfc_ligand.unwrap() > 1.0);
        assert!(s.p_val_ligand.unwrap() < 0.01);
        for w in &weak {
            assert!(s.prioritization_rank < w.prioritization_rank);
            assert!(s.prioritization_score > w.prioritization_score);
        }
    }
}

#[test]
fn test_celltype_with_one_control_sample_has_no_de_fields() {
    let output = Study::new(|s, ct| ct == "A" || s == 0 || s >= 3, &[]).run();

    let excluded = &output.diagnostics().excluded_celltypes;
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].celltype, "B");
    assert!(output.de_stage.de.records.iter().all(|r| r.celltype == "A"));

    let group = &output.prioritization.group;
    assert!(group.iter().any(|r| r.sender == "B"));
    for r in group.iter().filter(|r| r.sender == "B") {
        assert_eq!(r.lfc_ligand, None);
        assert_eq!(r.p_val_ligand, None);
        assert_eq!(r.scaled_de_ligand, None);
    }
    for r in group.iter().filter(|r| r.receiver == "B") {
        assert_eq!(r.lfc_receptor, None);
        assert_eq!(r.scaled_de_receptor, None);
    }
    assert!(group.iter().all(|r| r.prioritization_score.is_some()));
}

#[test]
fn test_interaction_id_joins_groups() {
    let output = Study::new(|_, _| true, &[]).run();
    let group = &output.prioritization.group;

    let mut by_id: HashMap<&str, Vec<&PrioritizationRecord>> = HashMap::new();
    for r in group {
        by_id.entry(r.id.as_str()).or_default().push(r);
    }
    assert_eq!(by_id.len(), 8);
    for (id, rows) in by_id {
        assert_eq!(rows.len(), 2, "{}", id);
        let treated = rows.iter().find(|r| r.group == "Treated").unwrap();
        let control = rows.iter().find(|r| r.group == "Control").unwrap();
        assert_eq!(treated.contrast, "Treated-Control");
        assert_eq!(control.contrast, "Control-Treated");
        let expected = if treated.prioritization_score >= control.prioritization_score {
            "Treated"
        } else {
            "Control"
        };
        assert_eq!(treated.top_group, expected);
        assert_eq!(control.top_group, expected);
    }
}

#[test]
fn test_correlation_with_two_samples_is_na() {
    // B only present in S1 and S4
    let study = Study::new(|s, ct| ct == "A" || s == 0 || s == 3, &[("LIG1", "REC1", 1.0), ("LIG2", "HK1", 1.0)]);
    let output = study.run();

    let via_b: Vec<&CorrelationRecord> = output.correlation.iter().filter(|r| r.sender == "B").collect();
    assert!(!via_b.is_empty());
    for r in via_b {
        assert_eq!(r.n_samples, 2);
        assert_eq!(r.pearson, None);
        assert_eq!(r.spearman, None);
    }

    let within_a = output
        .correlation
        .iter()
        .find(|r| r.sender == "A" && r.receiver == "A" && r.ligand == "LIG1" && r.target == "REC1")
        .unwrap();
    assert_eq!(within_a.n_samples, 6);
    assert_eq!(within_a.prior_rank, 1);
    assert!(within_a.pearson.unwrap() > 0.0);
    assert!(output.diagnostics().n_undefined_correlations > 0);
}

#[test]
fn test_ranks_are_deterministic() {
    let study = Study::new(|_, _| true, &[("LIG1", "REC1", 1.0)]);
    let first = study.run();
    let second = study.run();
    assert_eq!(first.prioritization.group, second.prioritization.group);
    assert_eq!(first.prioritization.sample, second.prioritization.sample);
}

#[test]
fn test_write_outputs() {
    let study = Study::new(|_, _| true, &[("LIG1", "REC1", 1.0)]);
    let output = study.run();
    let out_dir = study.path("results");
    output.write_outputs(&out_dir).unwrap();

    for name in [
        "abundance.tsv",
        "rel_abundance.tsv",
        "pseudobulk_sample.tsv",
        "pseudobulk_group.tsv",
        "de.tsv",
        "ligand_activities.tsv",
        "ligand_targets.tsv",
        "prioritization_group.tsv",
        "prioritization_sample.tsv",
        "correlation.tsv",
        "diagnostics.json",
    ] {
        assert!(out_dir.join(name).exists(), "{} missing", name);
    }

    let header = first_line(&out_dir.join("prioritization_group.tsv"));
    assert!(header.starts_with("contrast\tgroup\tsender\treceiver\tligand\treceptor\tid"));
    assert!(header.contains("prioritization_score"));

    let diagnostics: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("diagnostics.json")).unwrap()).unwrap();
    assert_eq!(diagnostics["n_samples"], 6);
    assert_eq!(diagnostics["n_interactions"], 16);
}

#[test]
fn test_de_only_run() {
    let study = Study::new(|_, _| true, &[]);
    let (config, counts, metadata, _) = study.load();
    let stage = Pipeline::new(config).run_de(&counts, &metadata).unwrap();
    assert_eq!(stage.de.records.len(), 2 * GENES.len() * 2);
    assert_eq!(stage.diagnostics.n_pseudobulk, 12);
    assert_eq!(stage.diagnostics.n_pseudobulk_kept, 12);

    let out_dir = study.path("de_only");
    stage.write_outputs(&out_dir).unwrap();
    assert_eq!(first_line(&out_dir.join("de.tsv")), "gene\tcelltype\tcontrast\tlogfc\tp_val\tp_adj_loc\tp_adj");
}

#[test]
fn test_unknown_group_fails_before_fitting() {
    let study = Study::new(|_, _| true, &[]);
    let (mut config, counts, metadata, networks) = study.load();
    config.contrasts = "'Treated-Placebo'".to_string();
    config.contrast_groups = ContrastGroupTable::new(vec![ContrastGroup {
        contrast: "Treated-Placebo".into(),
        group: "Treated".into(),
    }]);
    let err = Pipeline::new(config).run(&counts, &metadata, &networks).unwrap_err();
    assert!(matches!(err, NicheError::UnknownGroup { .. }));
    assert!(err.is_configuration());
}

fn first_line(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap().lines().next().unwrap().to_string()
}
