//! Long-form result tables written as TSV.

use crate::error::Result;
use serde::{Serialize, Serializer};
use std::path::Path;

/// Serialize an optional number, writing `NA` when absent or not finite.
pub fn na<S: Serializer>(value: &Option<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.is_finite() => serializer.serialize_f64(*v),
        _ => serializer.serialize_str("NA"),
    }
}

/// Serialize an optional rank or count, writing `NA` when absent.
pub fn na_usize<S: Serializer>(
    value: &Option<usize>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_u64(*v as u64),
        None => serializer.serialize_str("NA"),
    }
}

/// Write records as a tab-separated table with a header row.
pub fn write_tsv<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// `Some(x)` when `x` is finite.
#[inline]
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[derive(Serialize)]
    struct Row {
        gene: String,
        #[serde(serialize_with = "na")]
        logfc: Option<f64>,
        #[serde(serialize_with = "na")]
        p_val: Option<f64>,
        #[serde(serialize_with = "na_usize")]
        rank: Option<usize>,
    }

    #[test]
    fn test_write_tsv_with_na() {
        let rows = vec![
            Row { gene: "CXCL12".into(), logfc: Some(1.5), p_val: Some(0.5), rank: Some(2) },
            Row { gene: "CCL5".into(), logfc: Some(f64::NAN), p_val: None, rank: None },
        ];
        let file = NamedTempFile::new().unwrap();
        write_tsv(&rows, file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "gene\tlogfc\tp_val\trank");
        assert_eq!(lines[1], "CXCL12\t1.5\t0.5\t2");
        assert_eq!(lines[2], "CCL5\tNA\tNA\tNA");
    }

    #[test]
    fn test_finite() {
        assert_eq!(finite(1.0), Some(1.0));
        assert_eq!(finite(f64::INFINITY), None);
    }
}
