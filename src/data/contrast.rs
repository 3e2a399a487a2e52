//! Contrast lists over experimental groups.
//!
//! A contrast list is written as single-quoted expressions separated by
//! commas, optionally wrapped in double quotes, with no whitespace anywhere:
//!
//! ```text
//! "'Treated-Control','Control-Treated'"
//! 'M-(S+A)/2','S-(M+A)/2','A-(S+M)/2'
//! ```

use crate::error::{NicheError, Result};
use nalgebra::DMatrix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

fn list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^'[^'\s,]+'(,'[^'\s,]+')*$").expect("static regex"))
}

/// One named linear combination of group means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    /// The expression as written, e.g. `A-(B+C)/2`.
    pub name: String,
    /// Group -> weight; zero weights are dropped.
    pub coefficients: BTreeMap<String, f64>,
}

impl Contrast {
    /// Parse a single contrast expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let err = |reason: String| NicheError::ContrastSyntax {
            input: expression.to_string(),
            reason,
        };
        let mut parser = ExprParser {
            chars: expression.chars().collect(),
            pos: 0,
        };
        let form = parser.expr().map_err(err)?;
        if parser.pos != parser.chars.len() {
            return Err(err(format!("unexpected character at position {}", parser.pos)));
        }
        if form.constant.abs() > 1e-12 {
            return Err(err("constant terms are not allowed".to_string()));
        }
        let coefficients: BTreeMap<String, f64> = form
            .terms
            .into_iter()
            .filter(|(_, w)| w.abs() > 1e-12)
            .collect();
        if coefficients.is_empty() {
            return Err(err("contrast has no group terms".to_string()));
        }
        Ok(Self {
            name: expression.to_string(),
            coefficients,
        })
    }

    /// Sum of all weights; 0 for a balanced comparison.
    pub fn net_weight(&self) -> f64 {
        self.coefficients.values().sum()
    }

    /// Weight of a group (0 when not referenced).
    pub fn weight(&self, group: &str) -> f64 {
        self.coefficients.get(group).copied().unwrap_or(0.0)
    }
}

/// Linear form `constant + sum(w_g * group_g)` built while parsing.
#[derive(Debug, Clone, Default)]
struct LinearForm {
    terms: BTreeMap<String, f64>,
    constant: f64,
}

impl LinearForm {
    fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    fn group(name: String) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name, 1.0);
        Self { terms, constant: 0.0 }
    }

    fn is_constant(&self) -> bool {
        self.terms.values().all(|w| w.abs() < 1e-12)
    }

    fn add(mut self, other: LinearForm, sign: f64) -> Self {
        for (g, w) in other.terms {
            *self.terms.entry(g).or_insert(0.0) += sign * w;
        }
        self.constant += sign * other.constant;
        self
    }

    fn scale(mut self, factor: f64) -> Self {
        for w in self.terms.values_mut() {
            *w *= factor;
        }
        self.constant *= factor;
        self
    }
}

/// Recursive-descent parser for `+ - * /`, parentheses, numbers and group names.
struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> std::result::Result<LinearForm, String> {
        let mut form = self.term()?;
        while let Some(op) = self.peek() {
            let sign = match op {
                '+' => 1.0,
                '-' => -1.0,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            form = form.add(rhs, sign);
        }
        Ok(form)
    }

    fn term(&mut self) -> std::result::Result<LinearForm, String> {
        let mut form = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    form = if rhs.is_constant() {
                        form.scale(rhs.constant)
                    } else if form.is_constant() {
                        rhs.scale(form.constant)
                    } else {
                        return Err("product of two group terms".to_string());
                    };
                }
                '/' => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if !rhs.is_constant() {
                        return Err("division by a group term".to_string());
                    }
                    if rhs.constant == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    form = form.scale(1.0 / rhs.constant);
                }
                _ => break,
            }
        }
        Ok(form)
    }

    fn factor(&mut self) -> std::result::Result<LinearForm, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(self.factor()?.scale(-1.0))
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(')') {
                    return Err(format!("missing ')' at position {}", self.pos));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                text.parse::<f64>()
                    .map(LinearForm::constant)
                    .map_err(|_| format!("invalid number '{}'", text))
            }
            Some(c) if c.is_alphabetic() || c == '.' || c == '_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '.' || c == '_') {
                    self.pos += 1;
                }
                Ok(LinearForm::group(self.chars[start..self.pos].iter().collect()))
            }
            Some(c) => Err(format!("unexpected '{}' at position {}", c, self.pos)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// An ordered, validated list of contrasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastSet {
    contrasts: Vec<Contrast>,
}

impl ContrastSet {
    /// Parse a contrast list string.
    ///
    /// Fails with [`NicheError::ContrastSyntax`] on wrong quoting, embedded
    /// whitespace, duplicated contrasts or malformed expressions.
    pub fn parse(input: &str) -> Result<Self> {
        let syntax = |reason: &str| NicheError::ContrastSyntax {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let body = match input.strip_prefix('"') {
            Some(rest) => rest
                .strip_suffix('"')
                .ok_or_else(|| syntax("unterminated double quote"))?,
            None => input,
        };
        if !list_pattern().is_match(body) {
            return Err(syntax(
                "expected single-quoted contrasts separated by commas, without whitespace",
            ));
        }

        let mut seen = BTreeSet::new();
        let mut contrasts = Vec::new();
        for quoted in body.split(',') {
            let expression = quoted.trim_matches('\'');
            if !seen.insert(expression.to_string()) {
                return Err(syntax(&format!("duplicated contrast '{}'", expression)));
            }
            contrasts.push(Contrast::parse(expression)?);
        }
        Ok(Self { contrasts })
    }

    /// Serialize back to the canonical `'A-B','B-A'` form.
    pub fn to_contrast_string(&self) -> String {
        self.contrasts
            .iter()
            .map(|c| format!("'{}'", c.name))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contrast> {
        self.contrasts.iter()
    }

    pub fn len(&self) -> usize {
        self.contrasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contrasts.is_empty()
    }

    /// Contrast names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.contrasts.iter().map(|c| c.name.as_str()).collect()
    }

    /// Every group referenced by any contrast.
    pub fn groups(&self) -> BTreeSet<&str> {
        self.contrasts
            .iter()
            .flat_map(|c| c.coefficients.keys().map(String::as_str))
            .collect()
    }

    /// Check that every referenced group exists in the data.
    pub fn validate_groups(&self, data_groups: &[String]) -> Result<()> {
        for contrast in &self.contrasts {
            for group in contrast.coefficients.keys() {
                if !data_groups.contains(group) {
                    return Err(NicheError::UnknownGroup {
                        group: group.clone(),
                        context: format!("contrast '{}'", contrast.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build the coefficient × contrast matrix for a design.
    ///
    /// `coefficient_of` maps a group label to its design coefficient name.
    pub fn matrix<F>(&self, coefficient_names: &[String], coefficient_of: F) -> Result<ContrastMatrix>
    where
        F: Fn(&str) -> String,
    {
        let mut matrix = DMatrix::zeros(coefficient_names.len(), self.contrasts.len());
        for (j, contrast) in self.contrasts.iter().enumerate() {
            for (group, &weight) in &contrast.coefficients {
                let coef = coefficient_of(group);
                let i = coefficient_names
                    .iter()
                    .position(|n| *n == coef)
                    .ok_or_else(|| {
                        NicheError::InvalidParameter(format!(
                            "Contrast '{}' needs coefficient '{}' absent from the design",
                            contrast.name, coef
                        ))
                    })?;
                matrix[(i, j)] = weight;
            }
        }
        Ok(ContrastMatrix {
            matrix,
            names: self.names().into_iter().map(String::from).collect(),
        })
    }
}

/// Coefficients (rows) × contrasts (columns).
#[derive(Debug, Clone)]
pub struct ContrastMatrix {
    pub matrix: DMatrix<f64>,
    pub names: Vec<String>,
}

impl ContrastMatrix {
    pub fn n_contrasts(&self) -> usize {
        self.names.len()
    }

    /// Weight vector of one contrast.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.matrix.column(j).iter().copied().collect()
    }
}

/// One row of the contrast-to-group table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContrastGroup {
    pub contrast: String,
    pub group: String,
}

/// Maps each contrast to the group it characterises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContrastGroupTable {
    rows: Vec<ContrastGroup>,
}

impl ContrastGroupTable {
    pub fn new(rows: Vec<ContrastGroup>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ContrastGroup] {
        &self.rows
    }

    /// Group of a contrast.
    pub fn group_of(&self, contrast: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.contrast == contrast)
            .map(|r| r.group.as_str())
    }

    /// Check the table against the parsed contrasts and the data's groups.
    pub fn validate(&self, contrasts: &ContrastSet, data_groups: &[String]) -> Result<()> {
        let known: HashMap<&str, &str> = self
            .rows
            .iter()
            .map(|r| (r.contrast.as_str(), r.group.as_str()))
            .collect();
        for name in contrasts.names() {
            if !known.contains_key(name) {
                return Err(NicheError::MissingContrastGroup(name.to_string()));
            }
        }
        for row in &self.rows {
            if !contrasts.names().contains(&row.contrast.as_str()) {
                return Err(NicheError::InvalidParameter(format!(
                    "Contrast-to-group table lists '{}' which is not in the contrast list",
                    row.contrast
                )));
            }
            if !data_groups.contains(&row.group) {
                return Err(NicheError::UnknownGroup {
                    group: row.group.clone(),
                    context: "the contrast-to-group table".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_simple_list() {
        let set = ContrastSet::parse("\"'Treated-Control','Control-Treated'\"").unwrap();
        assert_eq!(set.names(), vec!["Treated-Control", "Control-Treated"]);
        let first = set.iter().next().unwrap();
        assert_relative_eq!(first.weight("Treated"), 1.0);
        assert_relative_eq!(first.weight("Control"), -1.0);
        assert_relative_eq!(first.net_weight(), 0.0);
    }

    #[test]
    fn test_parse_averaged_contrast() {
        let set = ContrastSet::parse("'M-(S+A)/2'").unwrap();
        let c = set.iter().next().unwrap();
        assert_relative_eq!(c.weight("M"), 1.0);
        assert_relative_eq!(c.weight("S"), -0.5);
        assert_relative_eq!(c.weight("A"), -0.5);
    }

    #[test]
    fn test_malformed_lists_fail() {
        for bad in [
            "Treated-Control",
            "'Treated - Control'",
            "'A-B', 'B-A'",
            "\"'A-B'",
            "'A-B',",
            "''",
            "'A-B','A-B'",
            "'A*B'",
            "'A-(B'",
            "'2'",
        ] {
            let err = ContrastSet::parse(bad).unwrap_err();
            assert!(
                matches!(err, NicheError::ContrastSyntax { .. }),
                "expected syntax error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_contrast_matrix() {
        let set = ContrastSet::parse("'A-(B+C)/2','B-A'").unwrap();
        let coefs = vec!["groupA".to_string(), "groupB".to_string(), "groupC".to_string()];
        let m = set.matrix(&coefs, |g| format!("group{}", g)).unwrap();
        assert_eq!(m.n_contrasts(), 2);
        assert_eq!(m.column(0), vec![1.0, -0.5, -0.5]);
        assert_eq!(m.column(1), vec![-1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_group_table_validation() {
        let set = ContrastSet::parse("'A-B','B-A'").unwrap();
        let groups = vec!["A".to_string(), "B".to_string()];
        let table = ContrastGroupTable::new(vec![ContrastGroup {
            contrast: "A-B".into(),
            group: "A".into(),
        }]);
        assert!(matches!(
            table.validate(&set, &groups),
            Err(NicheError::MissingContrastGroup(_))
        ));

        let table = ContrastGroupTable::new(vec![
            ContrastGroup { contrast: "A-B".into(), group: "A".into() },
            ContrastGroup { contrast: "B-A".into(), group: "Z".into() },
        ]);
        assert!(matches!(
            table.validate(&set, &groups),
            Err(NicheError::UnknownGroup { .. })
        ));
        assert!(set.validate_groups(&["A".to_string()]).is_err());
    }

    proptest! {
        #[test]
        fn prop_contrast_string_roundtrip(
            groups in proptest::collection::btree_set("[A-Z][a-z0-9_]{0,6}", 2..5)
        ) {
            let groups: Vec<String> = groups.into_iter().collect();
            let exprs: Vec<String> = groups
                .iter()
                .map(|g| {
                    let others: Vec<&str> = groups.iter().filter(|o| *o != g).map(String::as_str).collect();
                    format!("{}-({})/{}", g, others.join("+"), others.len())
                })
                .collect();
            let input = exprs.iter().map(|e| format!("'{}'", e)).collect::<Vec<_>>().join(",");

            let parsed = ContrastSet::parse(&input).unwrap();
            let reparsed = ContrastSet::parse(&parsed.to_contrast_string()).unwrap();
            prop_assert_eq!(parsed.names(), reparsed.names());
            prop_assert_eq!(parsed.to_contrast_string(), input);
        }

        #[test]
        fn prop_whitespace_is_rejected(pos in 0usize..9) {
            let mut input = "'A-B','B-A'".to_string();
            input.insert(pos.min(input.len()), ' ');
            prop_assert!(ContrastSet::parse(&input).is_err());
        }
    }
}
