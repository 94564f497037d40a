use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::debug;

use crate::models::PlotError;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

/// Relative paths are taken relative to the project root.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root().join(path)
    }
}

pub fn ensure_exists(path: &Path) -> Result<(), PlotError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PlotError::MissingInputFile(path.to_path_buf()))
    }
}

fn read_delimited(path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    debug!("Reading {} (separator {:?})", path.display(), separator as char);
    CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

pub fn read_tsv(path: &Path) -> PolarsResult<DataFrame> {
    read_delimited(path, b'\t')
}

pub fn read_csv(path: &Path) -> PolarsResult<DataFrame> {
    read_delimited(path, b',')
}

pub fn write_tsv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)
}

/// Column values as strings, whatever dtype the reader inferred.
pub fn string_values(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<String>>> {
    let casted = df.column(column)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Column values as f64; cells that do not parse become `None`.
pub fn float_values(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<f64>>> {
    let casted = df.column(column)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use tempfile::tempdir;

    #[test]
    fn tsv_round_trip_keeps_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("table.tsv");
        let mut df = df![
            "ID" => &["gene-HA", "gene-NA"],
            "avian-rep1" => &[1.5, 2.0]
        ]
        .unwrap();
        write_tsv(&mut df, &path).unwrap();

        let back = read_tsv(&path).unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert_eq!(
            string_values(&back, "ID").unwrap(),
            vec![Some("gene-HA".to_string()), Some("gene-NA".to_string())]
        );
        assert_eq!(float_values(&back, "avian-rep1").unwrap(), vec![Some(1.5), Some(2.0)]);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.tsv");
        match ensure_exists(&path) {
            Err(PlotError::MissingInputFile(p)) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn absolute_paths_are_kept() {
        let p = PathBuf::from("/tmp/x.tsv");
        assert_eq!(resolve_path(&p), p);
    }
}
