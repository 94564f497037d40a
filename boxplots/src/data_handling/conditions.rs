//! Mapping of raw condition labels found in table headers onto [`Condition`].
//!
//! Headers are written by different upstream scripts, so the same condition
//! shows up as `avian`, `Avian`, `reass`, `Reassortant`, `reassortant`, ...

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Condition, ConditionPair, PlotError};

impl Condition {
    /// Case-insensitive; any label starting with `reass` is the reassortant.
    pub fn from_label(raw: &str) -> Result<Self, PlotError> {
        let label = raw.trim().to_lowercase();
        match label.as_str() {
            "mock" => Ok(Condition::Mock),
            "avian" => Ok(Condition::Avian),
            "swine" => Ok(Condition::Swine),
            l if l.starts_with("reass") => Ok(Condition::Reassortant),
            _ => Err(PlotError::UnknownCondition(raw.to_string())),
        }
    }
}

/// Parses a p-value column header such as `avian-reass` into its condition pair.
pub fn parse_comparison_column(name: &str) -> Result<ConditionPair, PlotError> {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(PlotError::MalformedComparisonColumn(name.to_string()));
    }
    let a = Condition::from_label(parts[0])?;
    let b = Condition::from_label(parts[1])?;
    if a == b {
        return Err(PlotError::MalformedComparisonColumn(name.to_string()));
    }
    Ok(ConditionPair::new(a, b))
}

fn replicate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z]+)-rep(\d+)$").expect("valid replicate regex"))
}

/// Parses an expression column header such as `swine-rep2`.
/// Returns `None` for anything that is not a replicate column (`ID`, `Name`, ...).
pub fn parse_replicate_column(name: &str) -> Option<(Condition, u32)> {
    let caps = replicate_pattern().captures(name.trim())?;
    let condition = Condition::from_label(&caps[1]).ok()?;
    let replicate = caps[2].parse().ok()?;
    Some((condition, replicate))
}
