//! Design matrix construction from sample metadata and formula.

use crate::data::{Formula, Metadata, Variable, VariableType};
use crate::error::{NicheError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// A design matrix for the pseudobulk GLM.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (samples × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Sample IDs (rows).
    sample_ids: Vec<String>,
    /// Dropped reference level per categorical variable.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if matrix.ncols() != coefficient_names.len() {
            return Err(NicheError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        if matrix.nrows() != sample_ids.len() {
            return Err(NicheError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
        })
    }

    /// Build a design matrix from sample metadata and formula.
    ///
    /// Categorical variables are dummy coded with their alphabetically first
    /// level as reference. Without an intercept, the first categorical term
    /// keeps every level so each level gets its own mean coefficient.
    /// Variables with a single observed level contribute no columns.
    pub fn from_formula(metadata: &Metadata, formula: &Formula) -> Result<Self> {
        let sample_ids = metadata.row_ids().to_vec();
        let n_samples = sample_ids.len();

        for var in &formula.terms {
            if !metadata.has_column(var) {
                return Err(NicheError::MissingColumn(var.to_string()));
            }
        }

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut reference_levels = HashMap::new();

        if formula.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; n_samples]);
        }

        let mut full_rank_factor_used = formula.intercept;
        for var_name in &formula.terms {
            let values = metadata.column(var_name)?;
            match metadata.column_type(var_name) {
                Some(VariableType::Continuous) => {
                    let col = values
                        .iter()
                        .map(|v| match v {
                            Variable::Continuous(x) => Ok(*x),
                            _ => Err(NicheError::InvalidParameter(format!(
                                "Covariate '{}' has missing values",
                                var_name
                            ))),
                        })
                        .collect::<Result<Vec<f64>>>()?;
                    coefficient_names.push(var_name.clone());
                    columns.push(col);
                }
                Some(VariableType::Categorical) | None => {
                    if values.iter().any(Variable::is_missing) {
                        return Err(NicheError::InvalidParameter(format!(
                            "Factor '{}' has missing values",
                            var_name
                        )));
                    }
                    let levels = metadata.levels(var_name)?;
                    let drop_reference = full_rank_factor_used;
                    if drop_reference && levels.len() < 2 {
                        continue;
                    }
                    if drop_reference {
                        reference_levels.insert(var_name.clone(), levels[0].clone());
                    }
                    for (li, level) in levels.iter().enumerate() {
                        if drop_reference && li == 0 {
                            continue;
                        }
                        coefficient_names.push(format!("{}{}", var_name, level));
                        columns.push(
                            values
                                .iter()
                                .map(|v| if v.as_categorical() == Some(level.as_str()) { 1.0 } else { 0.0 })
                                .collect(),
                        );
                    }
                    full_rank_factor_used = true;
                }
            }
        }

        let n_coef = columns.len();
        let mut matrix = DMatrix::zeros(n_samples, n_coef);
        for (col_idx, col) in columns.iter().enumerate() {
            for (row_idx, &val) in col.iter().enumerate() {
                matrix[(row_idx, col_idx)] = val;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get sample IDs.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Numerical rank of the design.
    pub fn rank(&self) -> usize {
        if self.matrix.ncols() == 0 || self.matrix.nrows() == 0 {
            return 0;
        }
        self.matrix.clone().svd(false, false).rank(1e-9)
    }

    /// Whether every coefficient is estimable with residual degrees of freedom left.
    pub fn is_estimable(&self) -> bool {
        self.rank() == self.n_coefficients() && self.n_samples() > self.n_coefficients()
    }
}
