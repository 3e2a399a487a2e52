//! Model formulas for pseudobulk designs.

use crate::error::{NicheError, Result};
use serde::{Deserialize, Serialize};

/// A parsed additive formula.
///
/// Supports R-style main effects only:
/// - `~ group` - intercept + group
/// - `~ 0 + group + batch + age` - one column per group level, batch dummies,
///   continuous age
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Variables in order of appearance.
    pub terms: Vec<String>,
}

impl Formula {
    /// The cell-means design used for contrasts: no intercept, the group
    /// column first, then batches and covariates.
    pub fn group_means(group: &str, batches: &[String], covariates: &[String]) -> Self {
        let mut terms = vec![group.to_string()];
        terms.extend(batches.iter().cloned());
        terms.extend(covariates.iter().cloned());
        Self {
            intercept: false,
            terms,
        }
    }

    /// Parse a formula string.
    ///
    /// ```
    /// use multiniche::data::Formula;
    /// let f = Formula::parse("~ 0 + group + batch").unwrap();
    /// assert!(!f.intercept);
    /// assert_eq!(f.terms, vec!["group", "batch"]);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula = formula.trim();
        let rhs = formula
            .strip_prefix('~')
            .ok_or_else(|| NicheError::InvalidParameter("Formula must start with '~'".to_string()))?
            .trim();

        let mut intercept = true;
        let mut terms = Vec::new();
        for part in rhs.split('+').map(str::trim) {
            match part {
                "" => {
                    return Err(NicheError::InvalidParameter(format!(
                        "Empty term in formula '{}'",
                        formula
                    )))
                }
                "0" | "-1" => intercept = false,
                "1" => {}
                p if p.contains([':', '*']) => {
                    return Err(NicheError::InvalidParameter(format!(
                        "Interaction term '{}' is not supported in pseudobulk designs",
                        p
                    )))
                }
                p => {
                    if !terms.iter().any(|t| t == p) {
                        terms.push(p.to_string());
                    }
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(NicheError::InvalidParameter(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self { intercept, terms })
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        write!(f, "{}", self.terms.join(" + "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_intercept() {
        let f = Formula::parse("~ group + age").unwrap();
        assert!(f.intercept);
        assert_eq!(f.terms, vec!["group", "age"]);
    }

    #[test]
    fn test_group_means_display() {
        let f = Formula::group_means("group", &["batch".into()], &["age".into()]);
        assert_eq!(f.to_string(), "~ 0 + group + batch + age");
        assert_eq!(Formula::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_invalid_formulas() {
        assert!(Formula::parse("group").is_err());
        assert!(Formula::parse("~ 0").is_err());
        assert!(Formula::parse("~ group * age").is_err());
        assert!(Formula::parse("~ group + ").is_err());
    }
}
