use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::data_handling::conditions::{parse_comparison_column, parse_replicate_column};
use crate::helper_functions::{float_values, read_tsv, string_values};
use crate::models::{ComparisonPValue, Dataset, EntityGroup, ExpressionRecord, PlotError};

pub const ID_COLUMN: &str = "ID";
pub const NAME_COLUMN: &str = "Name";

/// TPM table: `ID`, optional `Name`, and `<condition>-rep<N>` columns.
pub struct ExpressionTable {
    pub path: PathBuf,
}

/// Wide p-value table: `ID` and one `<conditionA>-<conditionB>` column per comparison.
pub struct ComparisonTable {
    pub path: PathBuf,
}

fn require_id_column(df: &DataFrame, path: &PathBuf) -> PolarsResult<()> {
    if df.get_column_names().iter().any(|c| c.as_str() == ID_COLUMN) {
        Ok(())
    } else {
        Err(PolarsError::ColumnNotFound(
            format!("'{}' has no {} column", path.display(), ID_COLUMN).into(),
        ))
    }
}

impl Dataset for ExpressionTable {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading expression table from {}", self.path.display());
        let df = read_tsv(&self.path)?;
        require_id_column(&df, &self.path)?;
        info!("Expression table: {} rows, {} columns", df.height(), df.width());
        Ok(df)
    }
}

impl Dataset for ComparisonTable {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading p-value table from {}", self.path.display());
        let df = read_tsv(&self.path)?;
        require_id_column(&df, &self.path)?;
        info!("P-value table: {} rows, {} columns", df.height(), df.width());
        Ok(df)
    }
}

/// `ID` to the index of its first row.
pub type RowIndex = HashMap<String, usize>;

pub fn row_index(df: &DataFrame) -> PolarsResult<RowIndex> {
    let mut index = RowIndex::new();
    for (row, id) in string_values(df, ID_COLUMN)?.into_iter().enumerate() {
        if let Some(id) = id {
            index.entry(id).or_insert(row);
        }
    }
    Ok(index)
}

/// Every identifier of a table, in table order, without duplicates.
pub fn identifiers_in(df: &DataFrame) -> PolarsResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    Ok(string_values(df, ID_COLUMN)?
        .into_iter()
        .flatten()
        .filter(|id| seen.insert(id.clone()))
        .collect())
}

fn display_name(row: &DataFrame, identifier: &str) -> PolarsResult<String> {
    if !row.get_column_names().iter().any(|c| c.as_str() == NAME_COLUMN) {
        return Ok(identifier.to_string());
    }
    let name = string_values(row, NAME_COLUMN)?
        .into_iter()
        .next()
        .flatten()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    Ok(name.unwrap_or_else(|| identifier.to_string()))
}

fn replicate_records(
    row: &DataFrame,
    identifier: &str,
    display_name: &str,
) -> PolarsResult<Vec<ExpressionRecord>> {
    let mut columns: Vec<_> = row
        .get_column_names()
        .iter()
        .filter_map(|c| parse_replicate_column(c.as_str()).map(|(cond, rep)| (cond, rep, c.to_string())))
        .collect();
    columns.sort();

    let mut records = Vec::with_capacity(columns.len());
    for (condition, _, column) in columns {
        match float_values(row, &column)?.into_iter().next().flatten() {
            Some(value) if value.is_finite() && value >= 0.0 => records.push(ExpressionRecord {
                identifier: identifier.to_string(),
                display_name: display_name.to_string(),
                condition,
                value,
            }),
            Some(value) => warn!("{}: ignoring invalid value {} in '{}'", identifier, value, column),
            None => debug!("{}: no value in '{}'", identifier, column),
        }
    }
    Ok(records)
}

fn comparison_pvalues(row: &DataFrame, identifier: &str) -> PolarsResult<Vec<ComparisonPValue>> {
    let mut comparisons = Vec::new();
    for column in row.get_column_names() {
        let column = column.as_str();
        if column == ID_COLUMN || column == NAME_COLUMN {
            continue;
        }
        let pair = match parse_comparison_column(column) {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Skipping {}: {}", column, e);
                continue;
            }
        };
        match float_values(row, column)?.into_iter().next().flatten() {
            Some(p) if (0.0..=1.0).contains(&p) => comparisons.push(ComparisonPValue {
                identifier: identifier.to_string(),
                pair,
                p_value: p,
            }),
            Some(p) => warn!("{}: p-value {} in '{}' outside [0, 1], skipping", identifier, p, column),
            None => debug!("{}: no p-value in '{}'", identifier, column),
        }
    }
    Ok(comparisons)
}

/// Extracts the replicate records and comparisons of one identifier.
///
/// Fails with [`PlotError::MissingIdentifier`] when the identifier is absent
/// from either table; callers log that and carry on with the next identifier.
pub fn load_entity(
    expression: &DataFrame,
    pvalues: &DataFrame,
    identifier: &str,
) -> Result<EntityGroup, PlotError> {
    let tables = IndexedTables::new(expression, pvalues)?;
    tables.load(identifier)
}

/// Both tables with their `ID` indexes, built once per batch.
pub struct IndexedTables<'a> {
    expression: &'a DataFrame,
    pvalues: &'a DataFrame,
    expression_rows: RowIndex,
    pvalue_rows: RowIndex,
}

impl<'a> IndexedTables<'a> {
    pub fn new(expression: &'a DataFrame, pvalues: &'a DataFrame) -> PolarsResult<Self> {
        Ok(Self {
            expression,
            pvalues,
            expression_rows: row_index(expression)?,
            pvalue_rows: row_index(pvalues)?,
        })
    }

    pub fn load(&self, identifier: &str) -> Result<EntityGroup, PlotError> {
        let missing = |table| PlotError::MissingIdentifier {
            identifier: identifier.to_string(),
            table,
        };
        let rows = (
            self.expression_rows.get(identifier).copied(),
            self.pvalue_rows.get(identifier).copied(),
        );
        let (expr_idx, pval_idx) = match rows {
            (Some(e), Some(p)) => (e, p),
            (None, Some(_)) => return Err(missing("the expression table")),
            (Some(_), None) => return Err(missing("the p-value table")),
            (None, None) => return Err(missing("either table")),
        };

        let expr_row = self.expression.slice(expr_idx as i64, 1);
        let pval_row = self.pvalues.slice(pval_idx as i64, 1);

        let display_name = display_name(&expr_row, identifier)?;
        let records = replicate_records(&expr_row, identifier, &display_name)?;

        let present: BTreeSet<_> = records.iter().map(|r| r.condition).collect();
        let comparisons = comparison_pvalues(&pval_row, identifier)?
            .into_iter()
            .filter(|c| present.contains(&c.pair.first) && present.contains(&c.pair.second))
            .collect();

        Ok(EntityGroup {
            identifier: identifier.to_string(),
            display_name,
            records,
            comparisons,
        })
    }
}

/// Loads every requested identifier, skipping the ones that cannot be found.
pub fn collect_groups(
    expression: &DataFrame,
    pvalues: &DataFrame,
    identifiers: &[String],
) -> Result<Vec<EntityGroup>, PlotError> {
    let tables = IndexedTables::new(expression, pvalues)?;
    let mut groups = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        match tables.load(identifier) {
            Ok(group) => {
                debug!(
                    "{} ({}): {} records, {} comparisons",
                    group.display_name,
                    group.identifier,
                    group.records.len(),
                    group.comparisons.len()
                );
                groups.push(group);
            }
            Err(e) if e.is_recoverable() => warn!("{}, skipping", e),
            Err(e) => return Err(e),
        }
    }
    info!("Loaded {} of {} requested identifiers", groups.len(), identifiers.len());
    Ok(groups)
}
