//! Analysis configuration, loadable from and savable to YAML.

use crate::activity::ActivityConfig;
use crate::correlation::CorrelationConfig;
use crate::data::{ColumnSchema, ContrastGroupTable, ContrastSet, Organism};
use crate::de::DeConfig;
use crate::error::{NicheError, Result};
use crate::prioritize::PrioritizationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every option of a multi-sample communication analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub columns: ColumnSchema,
    /// Sender cell types of interest; empty selects all.
    pub senders_oi: Vec<String>,
    /// Receiver cell types of interest; empty selects all.
    pub receivers_oi: Vec<String>,
    /// Minimum cells for a (cell type, sample) pseudobulk to be kept.
    pub min_cells: usize,
    /// Contrast list, e.g. `'A-(B+C)/2','B-(A+C)/2'`.
    pub contrasts: String,
    pub contrast_groups: ContrastGroupTable,
    pub de: DeConfig,
    pub activity: ActivityConfig,
    pub prioritization: PrioritizationConfig,
    pub correlation: CorrelationConfig,
    pub organism: Organism,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            columns: ColumnSchema::default(),
            senders_oi: Vec::new(),
            receivers_oi: Vec::new(),
            min_cells: 10,
            contrasts: String::new(),
            contrast_groups: ContrastGroupTable::default(),
            de: DeConfig::default(),
            activity: ActivityConfig::default(),
            prioritization: PrioritizationConfig::default(),
            correlation: CorrelationConfig::default(),
            organism: Organism::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(NicheError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(NicheError::from)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Parse the contrast list.
    pub fn contrast_set(&self) -> Result<ContrastSet> {
        ContrastSet::parse(&self.contrasts)
    }

    /// Checks that need no data: contrast grammar, thresholds, weights.
    pub fn validate(&self) -> Result<ContrastSet> {
        let contrasts = self.contrast_set()?;
        for row in self.contrast_groups.rows() {
            if !contrasts.names().contains(&row.contrast.as_str()) {
                return Err(NicheError::InvalidParameter(format!(
                    "Contrast-to-group table lists '{}' which is not in the contrast list",
                    row.contrast
                )));
            }
        }
        for name in contrasts.names() {
            if self.contrast_groups.group_of(name).is_none() {
                return Err(NicheError::MissingContrastGroup(name.to_string()));
            }
        }
        if self.min_cells == 0 {
            return Err(NicheError::InvalidParameter("min_cells must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.de.min_sample_prop) || !(0.0..=1.0).contains(&self.de.fraction_cutoff) {
            return Err(NicheError::InvalidParameter(
                "DE min_sample_prop and fraction_cutoff must lie in [0, 1]".to_string(),
            ));
        }
        if self.activity.top_n_targets == 0 {
            return Err(NicheError::InvalidParameter("top_n_targets must be at least 1".to_string()));
        }
        if self.activity.logfc_threshold < 0.0 || !(0.0..=1.0).contains(&self.activity.p_val_threshold) {
            return Err(NicheError::InvalidParameter(format!(
                "Invalid activity thresholds: logfc {} and p-value {}",
                self.activity.logfc_threshold, self.activity.p_val_threshold
            )));
        }
        self.prioritization.validate()?;
        Ok(contrasts)
    }
}
