//! Input discovery and item extraction from CSV files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No CSV input file found in {0}")]
    NotFound(PathBuf),

    #[error("Multiple input files found in {dir}: {files:?}. Keep exactly one.")]
    Multiple { dir: PathBuf, files: Vec<String> },

    #[error("Column {selector} not found; available columns: {available:?}")]
    ColumnNotFound { selector: String, available: Vec<String> },
}

pub type Result<T> = std::result::Result<T, InputError>;

/// Chooses the input column by header name or 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelector {
    Name(String),
    Index(usize),
}

impl FromStr for ColumnSelector {
    type Err = std::convert::Infallible;

    /// All-digit strings select by position; anything else by name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(s.to_string()),
        })
    }
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "'{name}'"),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

impl Default for ColumnSelector {
    fn default() -> Self {
        Self::Index(1)
    }
}

/// Items read from one input file, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct InputItems {
    pub path: PathBuf,
    /// Header of the chosen column.
    pub column: String,
    pub items: Vec<String>,
}

/// Returns the single `.csv` file in `dir`.
///
/// Zero or several candidates is an error rather than a guess.
pub fn find_input_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_csv_extension(path))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(InputError::NotFound(dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(InputError::Multiple {
            dir: dir.to_path_buf(),
            files: candidates
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect(),
        }),
    }
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Header names of a CSV file, in order.
pub fn list_columns(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Reads the selected column of a CSV file.
///
/// Empty cells, short rows and rows that fail to decode are dropped.
pub fn read_csv_items(path: impl AsRef<Path>, column: &ColumnSelector) -> Result<InputItems> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let position = match column {
        ColumnSelector::Name(name) => headers.iter().position(|h| h.trim() == name.trim()),
        ColumnSelector::Index(index) => index.checked_sub(1).filter(|i| *i < headers.len()),
    }
    .ok_or_else(|| InputError::ColumnNotFound {
        selector: column.to_string(),
        available: headers.clone(),
    })?;

    let mut items = Vec::new();
    let mut dropped = 0;
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(row = row + 2, "Skipping malformed input row: {e}");
                dropped += 1;
                continue;
            }
        };

        match record.get(position).map(str::trim) {
            Some(cell) if !cell.is_empty() => items.push(cell.to_string()),
            _ => dropped += 1,
        }
    }

    let column = headers[position].clone();
    info!(file = %path.display(), column = %column, items = items.len(), dropped, "Read input items");

    Ok(InputItems {
        path: path.to_path_buf(),
        column,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_find_requires_exactly_one_csv() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(find_input_file(dir.path()), Err(InputError::NotFound(_))));

        write(dir.path(), "notes.txt", "x");
        let csv = write(dir.path(), "items.csv", "Item\nbolt\n");
        assert_eq!(find_input_file(dir.path()).unwrap(), csv);

        write(dir.path(), "more.CSV", "Item\nnut\n");
        match find_input_file(dir.path()) {
            Err(InputError::Multiple { files, .. }) => assert_eq!(files.len(), 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_column_selector_parsing() {
        assert_eq!("2".parse::<ColumnSelector>().unwrap(), ColumnSelector::Index(2));
        assert_eq!(
            " Description ".parse::<ColumnSelector>().unwrap(),
            ColumnSelector::Name("Description".into())
        );
    }

    #[test]
    fn test_read_by_name_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "items.csv",
            "Id,Description\n1,hex bolt\n2,\n3,  copper wire  \n4\n",
        );

        let by_name = read_csv_items(&path, &ColumnSelector::Name("Description".into())).unwrap();
        assert_eq!(by_name.column, "Description");
        assert_eq!(by_name.items, vec!["hex bolt", "copper wire"]);

        let by_index = read_csv_items(&path, &ColumnSelector::Index(1)).unwrap();
        assert_eq!(by_index.column, "Id");
        assert_eq!(by_index.items, vec!["1", "2", "3", "4"]);

        assert_eq!(list_columns(&path).unwrap(), vec!["Id", "Description"]);
    }

    #[test]
    fn test_unknown_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "items.csv", "Item\nbolt\n");

        for selector in [ColumnSelector::Index(0), ColumnSelector::Index(2), ColumnSelector::Name("Nope".into())] {
            match read_csv_items(&path, &selector) {
                Err(InputError::ColumnNotFound { available, .. }) => assert_eq!(available, vec!["Item"]),
                other => panic!("expected ColumnNotFound, got {other:?}"),
            }
        }
    }
}
