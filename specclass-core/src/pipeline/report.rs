//! Persisting classified items.

use crate::classify::ClassifiedItem;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Report has {results} results for {items} input items")]
    CountMismatch { items: usize, results: usize },
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Receives the ordered results of a run.
pub trait ReportWriter: Send + Sync {
    /// Persists `results`, one per entry in `items`, in the same order.
    fn write(&self, items: &[String], results: &[ClassifiedItem]) -> Result<()>;
}

#[derive(Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "Item")]
    item: &'a str,
    #[serde(rename = "Primary_Classification")]
    primary_classification: &'a str,
    #[serde(rename = "Overall_Classification")]
    classification: &'a str,
    #[serde(rename = "Reasoning")]
    reasoning: &'a str,
    #[serde(rename = "Confidence")]
    confidence: f64,
}

/// Writes results as a CSV table.
#[derive(Debug, Clone)]
pub struct CsvReport {
    path: PathBuf,
}

impl CsvReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<output_dir>/output_<input file name>`.
    pub fn for_input(output_dir: impl AsRef<Path>, input: &Path) -> Self {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "items.csv".to_string());
        Self::new(output_dir.as_ref().join(format!("output_{name}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportWriter for CsvReport {
    fn write(&self, items: &[String], results: &[ClassifiedItem]) -> Result<()> {
        if items.len() != results.len() {
            return Err(ReportError::CountMismatch {
                items: items.len(),
                results: results.len(),
            });
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&self.path)?;
        for classified in results {
            writer.serialize(ReportRow {
                item: &classified.item,
                primary_classification: &classified.result.primary_classification,
                classification: &classified.result.classification,
                reasoning: &classified.result.reasoning,
                confidence: classified.result.confidence,
            })?;
        }
        writer.flush()?;

        info!(path = %self.path.display(), rows = results.len(), "Report written");
        Ok(())
    }
}
