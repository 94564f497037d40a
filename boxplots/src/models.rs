use std::fmt;
use std::path::PathBuf;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four infection conditions compared in every figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Mock,
    Avian,
    Swine,
    Reassortant,
}

impl Condition {
    /// Canonical display order.
    pub const ALL: [Condition; 4] = [
        Condition::Mock,
        Condition::Avian,
        Condition::Swine,
        Condition::Reassortant,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Condition::Mock => "Mock",
            Condition::Avian => "Avian",
            Condition::Swine => "Swine",
            Condition::Reassortant => "Reassortant",
        }
    }

    /// Prefix used for this condition in table column names (`reass-rep1`, `avian-swine`).
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Condition::Mock => "mock",
            Condition::Avian => "avian",
            Condition::Swine => "swine",
            Condition::Reassortant => "reass",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unordered pair of conditions; stored with the lower condition first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConditionPair {
    pub first: Condition,
    pub second: Condition,
}

impl ConditionPair {
    pub fn new(a: Condition, b: Condition) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn contains(&self, condition: Condition) -> bool {
        self.first == condition || self.second == condition
    }
}

/// One replicate measurement (TPM) of one entity under one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRecord {
    pub identifier: String,
    pub display_name: String,
    pub condition: Condition,
    pub value: f64,
}

/// Precomputed (adjusted) p-value for one condition pair of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonPValue {
    pub identifier: String,
    pub pair: ConditionPair,
    pub p_value: f64,
}

/// All records and comparisons sharing one identifier; rendered as one box cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGroup {
    pub identifier: String,
    pub display_name: String,
    pub records: Vec<ExpressionRecord>,
    pub comparisons: Vec<ComparisonPValue>,
}

impl EntityGroup {
    pub fn values_for(&self, condition: Condition) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.condition == condition)
            .map(|r| r.value)
            .collect()
    }

    /// `<name>_<id>` with spaces and slashes replaced, used for per-entity file names.
    pub fn file_stem(&self) -> String {
        let safe_name = self.display_name.replace([' ', '/'], "_");
        format!("{}_{}", safe_name, self.identifier)
    }
}

/// Something that can be read into a DataFrame.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("identifier '{identifier}' not found in {table}")]
    MissingIdentifier {
        identifier: String,
        table: &'static str,
    },

    #[error("malformed comparison column '{0}'")]
    MalformedComparisonColumn(String),

    #[error("unknown condition '{0}'")]
    UnknownCondition(String),

    #[error("cannot read conditions from file name {}", .0.display())]
    MalformedFileName(PathBuf),

    #[error("input file not found: {}", .0.display())]
    MissingInputFile(PathBuf),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlotError {
    /// Per-identifier problems are logged and skipped; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlotError::MissingIdentifier { .. }
                | PlotError::MalformedComparisonColumn(_)
                | PlotError::UnknownCondition(_)
        )
    }
}

pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_unordered() {
        let a = ConditionPair::new(Condition::Reassortant, Condition::Avian);
        let b = ConditionPair::new(Condition::Avian, Condition::Reassortant);
        assert_eq!(a, b);
        assert_eq!(a.first, Condition::Avian);
        assert!(a.contains(Condition::Reassortant));
        assert!(!a.contains(Condition::Mock));
    }

    #[test]
    fn file_stem_is_path_safe() {
        let group = EntityGroup {
            identifier: "ENSG00000182393".to_string(),
            display_name: "IFNL1 / IL29".to_string(),
            records: vec![],
            comparisons: vec![],
        };
        assert_eq!(group.file_stem(), "IFNL1___IL29_ENSG00000182393");
    }

    #[test]
    fn recoverable_errors() {
        assert!(PlotError::MalformedComparisonColumn("x".into()).is_recoverable());
        assert!(!PlotError::MissingInputFile(PathBuf::from("a.tsv")).is_recoverable());
        assert!(!PlotError::MalformedFileName(PathBuf::from("avian.tsv")).is_recoverable());
    }
}
