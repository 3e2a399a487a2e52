//! Tabular annotations keyed by row identifier (cells or samples).

use crate::error::{NicheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A single annotation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical label.
    Categorical(String),
    /// Continuous numeric value.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as a label; numbers use their shortest form.
    pub fn as_label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }
}

/// Type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

/// Column-oriented annotation table.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    row_ids: Vec<String>,
    row_index: HashMap<String, usize>,
    column_names: Vec<String>,
    /// One vector of values per column, aligned with `row_ids`.
    columns: Vec<Vec<Variable>>,
    column_types: Vec<VariableType>,
}

fn is_na(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na" || raw == "NaN"
}

impl Metadata {
    /// Build metadata from already-typed columns.
    pub fn from_columns(
        row_ids: Vec<String>,
        columns: Vec<(String, VariableType, Vec<Variable>)>,
    ) -> Result<Self> {
        let mut column_names = Vec::with_capacity(columns.len());
        let mut column_types = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (name, var_type, column) in columns {
            if column.len() != row_ids.len() {
                return Err(NicheError::DimensionMismatch {
                    expected: row_ids.len(),
                    actual: column.len(),
                });
            }
            column_names.push(name);
            column_types.push(var_type);
            values.push(column);
        }
        let row_index = row_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Ok(Self {
            row_ids,
            row_index,
            column_names,
            columns: values,
            column_types,
        })
    }

    /// Load metadata from a TSV file.
    ///
    /// The first column holds row identifiers. A column is continuous when
    /// every non-missing value parses as a number, otherwise categorical.
    /// Columns listed in `force_categorical` are always categorical.
    pub fn from_tsv<P: AsRef<Path>>(path: P, force_categorical: &[String]) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| NicheError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(NicheError::EmptyData(
                "Metadata must have at least one annotation column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();

        let mut row_ids = Vec::new();
        let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            row_ids.push(fields.next().unwrap_or_default().to_string());
            let values: Vec<&str> = fields.collect();
            for (col_idx, raw_column) in raw_columns.iter_mut().enumerate() {
                raw_column.push(values.get(col_idx).map(|s| s.trim()).unwrap_or("").to_string());
            }
        }

        if row_ids.is_empty() {
            return Err(NicheError::EmptyData("No rows in metadata".to_string()));
        }

        let columns = column_names
            .into_iter()
            .zip(raw_columns)
            .map(|(name, raw)| {
                let numeric = !force_categorical.contains(&name)
                    && raw.iter().all(|v| is_na(v) || v.parse::<f64>().is_ok());
                let var_type = if numeric {
                    VariableType::Continuous
                } else {
                    VariableType::Categorical
                };
                let values = raw
                    .into_iter()
                    .map(|v| {
                        if is_na(&v) {
                            Variable::Missing
                        } else if numeric {
                            v.parse::<f64>().map(Variable::Continuous).unwrap_or(Variable::Missing)
                        } else {
                            Variable::Categorical(v)
                        }
                    })
                    .collect();
                (name, var_type, values)
            })
            .collect();

        Self::from_columns(row_ids, columns)
    }

    /// Row identifiers in order.
    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    /// Position of a row identifier.
    pub fn row_position(&self, row_id: &str) -> Option<usize> {
        self.row_index.get(row_id).copied()
    }

    fn column_position(&self, column: &str) -> Result<usize> {
        self.column_names
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| NicheError::MissingColumn(column.to_string()))
    }

    /// Get a value for a specific row and column.
    pub fn get(&self, row_id: &str, column: &str) -> Option<&Variable> {
        let row = self.row_position(row_id)?;
        let col = self.column_position(column).ok()?;
        self.columns[col].get(row)
    }

    /// All values of a column, aligned with `row_ids`.
    pub fn column(&self, column: &str) -> Result<&[Variable]> {
        let col = self.column_position(column)?;
        Ok(&self.columns[col])
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_position(column)
            .ok()
            .map(|col| self.column_types[col])
    }

    /// Sorted unique non-missing labels of a column.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<String> = self
            .column(column)?
            .iter()
            .filter_map(Variable::as_label)
            .collect();
        Ok(levels.into_iter().collect())
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }

    /// Subset to the given rows, in the given order.
    pub fn subset_rows(&self, row_ids: &[String]) -> Result<Self> {
        let positions: Vec<usize> = row_ids
            .iter()
            .map(|id| {
                self.row_position(id).ok_or_else(|| {
                    NicheError::InvalidParameter(format!("Row '{}' not found in metadata", id))
                })
            })
            .collect::<Result<_>>()?;

        let columns = self
            .column_names
            .iter()
            .zip(&self.column_types)
            .zip(&self.columns)
            .map(|((name, var_type), values)| {
                let subset = positions.iter().map(|&p| values[p].clone()).collect();
                (name.clone(), *var_type, subset)
            })
            .collect();
        Self::from_columns(row_ids.to_vec(), columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cell\tsample\tgroup\tcelltype\tage").unwrap();
        writeln!(file, "c1\tS1\tControl\tTcell\t25").unwrap();
        writeln!(file, "c2\tS2\tTreated\tBcell\t30").unwrap();
        writeln!(file, "c3\tS1\tControl\tBcell\tNA").unwrap();
        writeln!(file, "c4\t7\tTreated\tTcell\t28").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_metadata() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path(), &[]).unwrap();

        assert_eq!(meta.n_rows(), 4);
        assert_eq!(meta.row_ids(), &["c1", "c2", "c3", "c4"]);
        assert_eq!(meta.column_names(), &["sample", "group", "celltype", "age"]);
        assert_eq!(meta.get("c2", "group").unwrap().as_categorical(), Some("Treated"));
        assert_eq!(meta.get("c2", "age").unwrap().as_continuous(), Some(30.0));
        assert!(meta.get("c3", "age").unwrap().is_missing());
    }

    #[test]
    fn test_forced_categorical_column() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path(), &["age".to_string()]).unwrap();
        assert_eq!(meta.column_type("age"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("group"), Some(VariableType::Categorical));
    }

    #[test]
    fn test_levels_and_missing_column() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path(), &[]).unwrap();
        assert_eq!(meta.levels("celltype").unwrap(), vec!["Bcell", "Tcell"]);
        assert!(matches!(meta.column("batch"), Err(NicheError::MissingColumn(_))));
    }

    #[test]
    fn test_subset_rows() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path(), &[]).unwrap();
        let subset = meta.subset_rows(&["c3".to_string(), "c1".to_string()]).unwrap();
        assert_eq!(subset.row_ids(), &["c3", "c1"]);
        assert_eq!(subset.get("c1", "sample").unwrap().as_categorical(), Some("S1"));
        assert!(meta.subset_rows(&["c9".to_string()]).is_err());
    }
}
