//! Builds the two plotting inputs from upstream outputs: per-condition
//! replicate TPM tables (or one featureCounts table per replicate) and
//! DESeq2 pairwise result tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::{PrepareConfig, ReplicateInput};
use crate::data_handling::conditions::parse_replicate_column;
use crate::data_handling::expression_table::{ID_COLUMN, NAME_COLUMN};
use crate::helper_functions::{ensure_exists, float_values, read_csv, read_tsv, string_values, write_tsv};
use crate::models::{Condition, PlotError};

const NAMES_ID_COLUMN: &str = "ID";
const NAMES_NAME_COLUMN: &str = "geneName";

/// Reads `ID` -> `geneName` from a comma-separated names table.
fn read_names(path: &Path) -> PolarsResult<HashMap<String, String>> {
    let df = read_csv(path)?;
    let ids = string_values(&df, NAMES_ID_COLUMN)?;
    let names = string_values(&df, NAMES_NAME_COLUMN)?;
    Ok(ids
        .into_iter()
        .zip(names)
        .filter_map(|(id, name)| Some((id?, name?)))
        .collect())
}

/// Merges one replicate table per condition into the expression table layout:
/// `ID`, `Name`, then `<prefix>-rep<i>` columns in canonical condition order.
/// Identifiers are sorted; a replicate missing for an identifier stays empty.
pub fn merge_replicate_tables(
    inputs: &[ReplicateInput],
    names_table: Option<&Path>,
) -> PolarsResult<DataFrame> {
    let mut values: BTreeMap<String, HashMap<Condition, Vec<Option<f64>>>> = BTreeMap::new();
    let mut replicate_counts: BTreeMap<Condition, usize> = BTreeMap::new();

    for input in inputs {
        let df = read_tsv(&input.path)?;
        let ids = string_values(&df, ID_COLUMN)?;
        let replicate_columns: Vec<String> = df
            .get_column_names()
            .into_iter()
            .filter(|c| c.as_str() != ID_COLUMN)
            .map(|c| c.to_string())
            .collect();
        info!(
            "{}: {} replicates for {} identifiers",
            input.path.display(),
            replicate_columns.len(),
            ids.len()
        );

        let count = replicate_counts.entry(input.condition).or_insert(0);
        *count = (*count).max(replicate_columns.len());

        let columns = replicate_columns
            .iter()
            .map(|c| float_values(&df, c))
            .collect::<PolarsResult<Vec<_>>>()?;

        for (row, id) in ids.into_iter().enumerate() {
            let Some(id) = id else { continue };
            let row_values = columns.iter().map(|col| col[row]).collect();
            values.entry(id).or_default().insert(input.condition, row_values);
        }
    }

    let names = match names_table {
        Some(path) => read_names(path)?,
        None => HashMap::new(),
    };

    let ids: Vec<String> = values.keys().cloned().collect();
    let name_column: Vec<Option<String>> = ids.iter().map(|id| names.get(id).cloned()).collect();
    let mut columns = vec![
        Column::new(ID_COLUMN.into(), ids.clone()),
        Column::new(NAME_COLUMN.into(), name_column),
    ];

    for condition in Condition::ALL {
        let Some(&count) = replicate_counts.get(&condition) else { continue };
        for replicate in 0..count {
            let cells: Vec<Option<f64>> = ids
                .iter()
                .map(|id| {
                    values[id]
                        .get(&condition)
                        .and_then(|reps| reps.get(replicate).copied().flatten())
                })
                .collect();
            let name = format!("{}-rep{}", condition.column_prefix(), replicate + 1);
            columns.push(Column::new(name.into(), cells));
        }
    }

    DataFrame::new(columns)
}

/// `<condition>_rep<N>.<anything>` (e.g. `reassortant_rep2.counts.tpm.tsv`).
pub fn replicate_from_file_name(path: &Path) -> Result<(Condition, u32), PlotError> {
    let malformed = || PlotError::MalformedFileName(path.to_path_buf());
    let name = path.file_name().and_then(|s| s.to_str()).ok_or_else(malformed)?;
    let stem = name.split('.').next().unwrap_or(name);
    parse_replicate_column(&stem.replace('_', "-")).ok_or_else(malformed)
}

fn keep_identifier(id: &str, exclude_prefix: Option<&str>) -> bool {
    exclude_prefix.map_or(true, |prefix| !id.starts_with(prefix))
}

fn column_at(df: &DataFrame, index: usize) -> PolarsResult<String> {
    df.get_column_names()
        .get(index)
        .map(|c| c.to_string())
        .ok_or_else(|| {
            PolarsError::ColumnNotFound(format!("no column {} in a table of width {}", index, df.width()).into())
        })
}

/// Builds the expression table from one featureCounts table per replicate:
/// identifiers from the first column, TPM from `value_column`. `Name` is the
/// identifier without its `gene-` prefix.
pub fn merge_replicate_files(
    paths: &[PathBuf],
    value_column: usize,
    exclude_prefix: Option<&str>,
) -> Result<DataFrame, PlotError> {
    let mut values: BTreeMap<String, HashMap<(Condition, u32), f64>> = BTreeMap::new();
    let mut replicates: BTreeSet<(Condition, u32)> = BTreeSet::new();

    for path in paths {
        let replicate = replicate_from_file_name(path)?;
        if !replicates.insert(replicate) {
            warn!("{} repeats {} replicate {}, skipping", path.display(), replicate.0, replicate.1);
            continue;
        }

        let df = read_tsv(path)?;
        let ids = string_values(&df, &column_at(&df, 0)?)?;
        let tpms = float_values(&df, &column_at(&df, value_column)?)?;
        let mut kept = 0;
        for (id, tpm) in ids.into_iter().zip(tpms) {
            let Some(id) = id else { continue };
            if !keep_identifier(&id, exclude_prefix) {
                continue;
            }
            let row = values.entry(id).or_default();
            if let Some(tpm) = tpm {
                row.insert(replicate, tpm);
            }
            kept += 1;
        }
        info!("{}: {} replicate {}, {} rows", path.display(), replicate.0, replicate.1, kept);
    }

    let ids: Vec<String> = values.keys().cloned().collect();
    let names: Vec<String> = ids
        .iter()
        .map(|id| id.strip_prefix("gene-").unwrap_or(id).to_string())
        .collect();
    let mut columns = vec![
        Column::new(ID_COLUMN.into(), ids.clone()),
        Column::new(NAME_COLUMN.into(), names),
    ];
    for &(condition, replicate) in &replicates {
        let cells: Vec<Option<f64>> = ids
            .iter()
            .map(|id| values[id].get(&(condition, replicate)).copied())
            .collect();
        let name = format!("{}-rep{}", condition.column_prefix(), replicate);
        columns.push(Column::new(name.into(), cells));
    }

    Ok(DataFrame::new(columns)?)
}

/// Condition pair encoded in a DESeq2 result file name,
/// `deseq2_<A>_vs_<B>_<suffix>.csv`. Mock is always moved to the front.
pub fn comparison_from_file_name(path: &Path) -> Result<(Condition, Condition), PlotError> {
    let malformed = || PlotError::MalformedFileName(path.to_path_buf());
    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(malformed)?;
    let rest = stem.strip_prefix("deseq2_").ok_or_else(malformed)?;
    let (first, second) = rest.split_once("_vs_").ok_or_else(malformed)?;
    let second = second.split('_').next().unwrap_or(second);

    let a = Condition::from_label(first)?;
    let b = Condition::from_label(second)?;
    if a == b {
        return Err(malformed());
    }
    if b == Condition::Mock {
        Ok((b, a))
    } else {
        Ok((a, b))
    }
}

/// Merges DESeq2 result tables into one p-value table with one
/// `<prefixA>-<prefixB>` column per file.
///
/// A row whose adjusted p-value is `NA` stays empty; only identifiers a file
/// has no row for get `missing_pvalue`.
pub fn merge_comparison_tables(paths: &[PathBuf], settings: &PrepareConfig) -> Result<DataFrame, PlotError> {
    let exclude_prefix = settings.exclude_prefix.as_deref();
    let mut all_ids: BTreeSet<String> = BTreeSet::new();
    let mut comparisons: Vec<(String, HashMap<String, Option<f64>>)> = Vec::new();

    for path in paths {
        let (a, b) = comparison_from_file_name(path)?;
        let column = format!("{}-{}", a.column_prefix(), b.column_prefix());
        if comparisons.iter().any(|(c, _)| *c == column) {
            warn!("Duplicate comparison {} in {}, skipping", column, path.display());
            continue;
        }

        let df = read_csv(path)?;
        let id_column = match &settings.id_column {
            Some(name) => name.clone(),
            None => column_at(&df, 0)?,
        };
        let ids = string_values(&df, &id_column)?;
        let p_values = float_values(&df, &settings.pvalue_column)?;

        let mut by_id: HashMap<String, Option<f64>> = HashMap::new();
        for (id, p) in ids.into_iter().zip(p_values) {
            let Some(id) = id else { continue };
            if keep_identifier(&id, exclude_prefix) {
                by_id.entry(id).or_insert(p);
            }
        }
        let without = by_id.values().filter(|p| p.is_none()).count();
        info!(
            "{}: {} identifiers for {}, {} without p-value",
            path.display(),
            by_id.len(),
            column,
            without
        );

        all_ids.extend(by_id.keys().cloned());
        comparisons.push((column, by_id));
    }

    let ids: Vec<String> = all_ids.into_iter().collect();
    let mut columns = vec![Column::new(ID_COLUMN.into(), ids.clone())];
    for (name, by_id) in &comparisons {
        let mut filled = 0;
        let cells: Vec<Option<f64>> = ids
            .iter()
            .map(|id| match by_id.get(id) {
                Some(p) => *p,
                None => {
                    filled += 1;
                    Some(settings.missing_pvalue)
                }
            })
            .collect();
        if filled > 0 {
            warn!("{}: {} identifiers missing, filled with {}", name, filled, settings.missing_pvalue);
        }
        columns.push(Column::new(name.as_str().into(), cells));
    }

    Ok(DataFrame::new(columns)?)
}

/// Writes whichever tables the configuration has inputs for.
pub fn run_preparation(
    prepare: &PrepareConfig,
    expression_out: &Path,
    pvalue_out: &Path,
) -> Result<(), PlotError> {
    if !prepare.replicate_files.is_empty() {
        if !prepare.replicate_tables.is_empty() {
            warn!("Both replicate files and replicate tables configured, using the files");
        }
        for path in &prepare.replicate_files {
            ensure_exists(path)?;
        }
        let mut merged = merge_replicate_files(
            &prepare.replicate_files,
            prepare.value_column,
            prepare.exclude_prefix.as_deref(),
        )?;
        write_tsv(&mut merged, expression_out)?;
        info!("Wrote expression table {} ({} rows)", expression_out.display(), merged.height());
    } else if !prepare.replicate_tables.is_empty() {
        for input in &prepare.replicate_tables {
            ensure_exists(&input.path)?;
        }
        if let Some(names) = &prepare.names_table {
            ensure_exists(names)?;
        }
        let mut merged =
            merge_replicate_tables(&prepare.replicate_tables, prepare.names_table.as_deref())?;
        write_tsv(&mut merged, expression_out)?;
        info!("Wrote expression table {} ({} rows)", expression_out.display(), merged.height());
    }

    if !prepare.comparison_tables.is_empty() {
        for path in &prepare.comparison_tables {
            ensure_exists(path)?;
        }
        let mut merged = merge_comparison_tables(&prepare.comparison_tables, prepare)?;
        write_tsv(&mut merged, pvalue_out)?;
        info!("Wrote p-value table {} ({} rows)", pvalue_out.display(), merged.height());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::conditions::parse_comparison_column;
    use crate::data_handling::expression_table::load_entity;
    use crate::models::ConditionPair;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn file_names_to_pairs() {
        assert_eq!(
            comparison_from_file_name(Path::new("/x/deseq2_Avian_vs_Mock_full_extended.csv")).unwrap(),
            (Condition::Mock, Condition::Avian)
        );
        assert_eq!(
            comparison_from_file_name(Path::new("deseq2_Reassortant_vs_Swine_full_extended.csv")).unwrap(),
            (Condition::Reassortant, Condition::Swine)
        );
        assert!(comparison_from_file_name(Path::new("deseq2_Avian_Mock.csv")).is_err());
        assert!(comparison_from_file_name(Path::new("counts.csv")).is_err());
        assert!(comparison_from_file_name(Path::new("deseq2_Avian_vs_Avian_x.csv")).is_err());
    }

    #[test]
    fn replicate_tables_merge_in_condition_order() {
        let dir = tempdir().unwrap();
        let swine = dir.path().join("swine_reps_tpms.tsv");
        let mock = dir.path().join("mock_reps_tpms.tsv");
        let names = dir.path().join("names.csv");
        fs::write(&swine, "ID\tr1\tr2\ngene-b\t4.0\t5.0\ngene-a\t1.0\t2.0\n").unwrap();
        fs::write(&mock, "ID\tr1\ngene-a\t0.5\ngene-c\t0.0\n").unwrap();
        fs::write(&names, "ID,geneName\ngene-a,IFIT2\n").unwrap();

        let inputs = vec![
            ReplicateInput { condition: Condition::Swine, path: swine },
            ReplicateInput { condition: Condition::Mock, path: mock },
        ];
        let df = merge_replicate_tables(&inputs, Some(&names)).unwrap();

        let columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["ID", "Name", "mock-rep1", "swine-rep1", "swine-rep2"]);
        assert_eq!(
            string_values(&df, "ID").unwrap(),
            vec![Some("gene-a".into()), Some("gene-b".into()), Some("gene-c".into())]
        );
        assert_eq!(
            string_values(&df, "Name").unwrap(),
            vec![Some("IFIT2".into()), None, None]
        );
        assert_eq!(float_values(&df, "swine-rep2").unwrap(), vec![Some(2.0), Some(5.0), None]);
        assert_eq!(float_values(&df, "mock-rep1").unwrap(), vec![Some(0.5), None, Some(0.0)]);
    }

    #[test]
    fn comparison_tables_fill_missing() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("deseq2_Avian_vs_Mock_full_extended.csv");
        let second = dir.path().join("deseq2_Avian_vs_Reassortant_full_extended.csv");
        fs::write(&first, "ID,log2FoldChange,padj\ngene-a,1.2,0.001\ngene-b,0.3,0.4\n").unwrap();
        fs::write(&second, "ID,log2FoldChange,padj\ngene-b,2.0,0.02\n").unwrap();

        let df = merge_comparison_tables(&[first, second], &PrepareConfig::default()).unwrap();
        let columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["ID", "mock-avian", "avian-reass"]);
        assert_eq!(float_values(&df, "mock-avian").unwrap(), vec![Some(0.001), Some(0.4)]);
        assert_eq!(float_values(&df, "avian-reass").unwrap(), vec![Some(0.05), Some(0.02)]);

        // headers written here are read back by the plotting loader
        assert_eq!(
            parse_comparison_column("avian-reass").unwrap(),
            ConditionPair::new(Condition::Avian, Condition::Reassortant)
        );
    }

    #[test]
    fn na_adjusted_p_values_stay_empty() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("deseq2_Avian_vs_Swine_full_extended.csv");
        let second = dir.path().join("deseq2_Mock_vs_Avian_full_extended.csv");
        fs::write(&first, "ID,log2FoldChange,padj\ngene-a,1.0,0.3\ngene-b,0.1,NA\n").unwrap();
        fs::write(&second, "ID,log2FoldChange,padj\ngene-a,1.0,0.01\ngene-b,2.0,0.02\n").unwrap();

        let df = merge_comparison_tables(&[first.clone(), second], &PrepareConfig::default()).unwrap();
        assert_eq!(float_values(&df, "avian-swine").unwrap(), vec![Some(0.3), None]);
        assert_eq!(float_values(&df, "mock-avian").unwrap(), vec![Some(0.01), Some(0.02)]);

        // a single file still keeps the row of the NA identifier
        let alone = merge_comparison_tables(&[first], &PrepareConfig::default()).unwrap();
        assert_eq!(
            string_values(&alone, "ID").unwrap(),
            vec![Some("gene-a".into()), Some("gene-b".into())]
        );
        assert_eq!(float_values(&alone, "avian-swine").unwrap(), vec![Some(0.3), None]);
    }

    #[test]
    fn na_p_value_draws_no_bracket_after_reload() {
        let dir = tempdir().unwrap();
        let deseq = dir.path().join("deseq2_Avian_vs_Swine_full.csv");
        let avian = dir.path().join("avian.tsv");
        let swine = dir.path().join("swine.tsv");
        fs::write(&deseq, "ID,padj\ngene-b,NA\n").unwrap();
        fs::write(&avian, "ID\tr1\ngene-b\t1.0\n").unwrap();
        fs::write(&swine, "ID\tr1\ngene-b\t2.0\n").unwrap();

        let prepare = PrepareConfig {
            replicate_tables: vec![
                ReplicateInput { condition: Condition::Avian, path: avian },
                ReplicateInput { condition: Condition::Swine, path: swine },
            ],
            comparison_tables: vec![deseq],
            ..PrepareConfig::default()
        };
        let tpms = dir.path().join("tpms.tsv");
        let pvals = dir.path().join("pvals.tsv");
        run_preparation(&prepare, &tpms, &pvals).unwrap();

        let group = load_entity(&read_tsv(&tpms).unwrap(), &read_tsv(&pvals).unwrap(), "gene-b").unwrap();
        assert_eq!(group.values_for(Condition::Swine), vec![2.0]);
        assert!(group.comparisons.is_empty());
    }

    #[test]
    fn r_written_tables_use_first_column_and_exclusion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deseq2_Mock_vs_Reassortant_full.csv");
        fs::write(
            &path,
            concat!(
                "\"\",\"baseMean\",\"log2FoldChange\",\"lfcSE\",\"stat\",\"pvalue\",\"padj\"\n",
                "\"gene-mRNA-HA\",120.5,2.1,0.3,7.0,0.0001,0.0004\n",
                "\"ENSG00000187634\",15.2,0.1,0.2,0.5,0.6,0.8\n",
                "\"gene-vRNA-NS\",3.1,0.4,0.9,0.4,0.7,NA\n",
            ),
        )
        .unwrap();

        let settings = PrepareConfig {
            exclude_prefix: Some("ENSG".to_string()),
            ..PrepareConfig::default()
        };
        let df = merge_comparison_tables(&[path], &settings).unwrap();
        assert_eq!(
            string_values(&df, "ID").unwrap(),
            vec![Some("gene-mRNA-HA".into()), Some("gene-vRNA-NS".into())]
        );
        assert_eq!(float_values(&df, "mock-reass").unwrap(), vec![Some(0.0004), None]);
    }

    #[test]
    fn configured_id_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deseq2_Swine_vs_Mock_x.csv");
        fs::write(&path, "baseMean,gene,padj\n10,gene-a,0.04\n").unwrap();
        let settings = PrepareConfig {
            id_column: Some("gene".to_string()),
            ..PrepareConfig::default()
        };
        let df = merge_comparison_tables(&[path], &settings).unwrap();
        assert_eq!(string_values(&df, "ID").unwrap(), vec![Some("gene-a".into())]);
        assert_eq!(float_values(&df, "mock-swine").unwrap(), vec![Some(0.04)]);
    }

    #[test]
    fn replicate_file_names() {
        assert_eq!(
            replicate_from_file_name(Path::new("/in/avian_rep2.counts.tpm.tsv")).unwrap(),
            (Condition::Avian, 2)
        );
        assert_eq!(
            replicate_from_file_name(Path::new("reassortant_rep1.counts.tpm.tsv")).unwrap(),
            (Condition::Reassortant, 1)
        );
        assert!(matches!(
            replicate_from_file_name(Path::new("avian.counts.tpm.tsv")),
            Err(PlotError::MalformedFileName(_))
        ));
    }

    #[test]
    fn featurecounts_replicates_merge() {
        let dir = tempdir().unwrap();
        let header = "Geneid\tChr\tStart\tEnd\tStrand\tLength\tcounts\tTPM\n";
        let files = [
            ("swine_rep1.counts.tpm.tsv", "gene-HA\tseg4\t1\t1778\t+\t1778\t90\t300.5\n"),
            (
                "avian_rep2.counts.tpm.tsv",
                "gene-HA\tseg4\t1\t1778\t+\t1778\t40\t120.0\nENSG00000187634\tchr1\t1\t10\t+\t10\t5\t9.0\ngene-NS1\tseg8\t1\t890\t+\t890\t7\t11.0\n",
            ),
            ("avian_rep1.counts.tpm.tsv", "gene-HA\tseg4\t1\t1778\t+\t1778\t30\t100.0\n"),
        ];
        let paths: Vec<PathBuf> = files
            .iter()
            .map(|(name, rows)| {
                let path = dir.path().join(name);
                fs::write(&path, format!("{}{}", header, rows)).unwrap();
                path
            })
            .collect();

        let df = merge_replicate_files(&paths, 7, Some("ENSG")).unwrap();
        let columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["ID", "Name", "avian-rep1", "avian-rep2", "swine-rep1"]);
        assert_eq!(
            string_values(&df, "Name").unwrap(),
            vec![Some("HA".into()), Some("NS1".into())]
        );
        assert_eq!(float_values(&df, "avian-rep2").unwrap(), vec![Some(120.0), Some(11.0)]);
        assert_eq!(float_values(&df, "swine-rep1").unwrap(), vec![Some(300.5), None]);
    }

    #[test]
    fn missing_value_column_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mock_rep1.counts.tpm.tsv");
        fs::write(&path, "Geneid\tTPM\ngene-HA\t1.0\n").unwrap();
        assert!(merge_replicate_files(&[path], 7, None).is_err());
    }

    #[test]
    fn preparation_writes_both_tables() {
        let dir = tempdir().unwrap();
        let avian = dir.path().join("avian_reps_tpms.tsv");
        let deseq = dir.path().join("deseq2_Swine_vs_Avian_full_extended.csv");
        fs::write(&avian, "ID\tr1\tr2\tr3\ngene-a\t5\t6\t7\n").unwrap();
        fs::write(&deseq, "ID,padj\ngene-a,0.03\n").unwrap();

        let prepare = PrepareConfig {
            replicate_tables: vec![ReplicateInput { condition: Condition::Avian, path: avian }],
            comparison_tables: vec![deseq],
            ..PrepareConfig::default()
        };
        let tpms = dir.path().join("out").join("tpms.tsv");
        let pvals = dir.path().join("out").join("pvals.tsv");
        run_preparation(&prepare, &tpms, &pvals).unwrap();

        let expression = read_tsv(&tpms).unwrap();
        assert_eq!(expression.width(), 5);
        let pvalues = read_tsv(&pvals).unwrap();
        assert_eq!(float_values(&pvalues, "swine-avian").unwrap(), vec![Some(0.03)]);
    }

    #[test]
    fn missing_input_is_reported() {
        let prepare = PrepareConfig {
            comparison_tables: vec![PathBuf::from("/nonexistent/deseq2_Avian_vs_Mock_x.csv")],
            ..PrepareConfig::default()
        };
        let err = run_preparation(&prepare, Path::new("/tmp/a.tsv"), Path::new("/tmp/b.tsv"))
            .unwrap_err();
        assert!(matches!(err, PlotError::MissingInputFile(_)));
        assert!(!err.is_recoverable());
    }
}
