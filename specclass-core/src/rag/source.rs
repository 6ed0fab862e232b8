//! Corpus loading and text chunking.
//!
//! This module provides functionality to:
//! - Recursively collect specification files from a directory
//! - Split large text into overlapping chunks
//! - Attach provenance metadata (source file, section title, chunk index)

use super::types::Chunk;
use crate::config::IngestConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Errors that can occur while walking the corpus directory.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// A file that could not be turned into chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// What a source produced: chunks in corpus order, plus per-file failures.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub chunks: Vec<Chunk>,
    pub failures: Vec<SourceFailure>,
}

/// Yields the chunks to ingest.
///
/// Loading never fails as a whole; unreadable inputs are reported in
/// [`SourceReport::failures`].
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> SourceReport;
}

/// Pre-chunked text, already in memory.
#[async_trait]
impl DocumentSource for Vec<Chunk> {
    async fn load(&self) -> SourceReport {
        SourceReport {
            chunks: self.clone(),
            failures: Vec::new(),
        }
    }
}

/// Reads plain-text specification files from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extensions: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            dir: dir.into(),
            extensions,
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            &config.specifications_dir,
            config.extensions.clone(),
            config.chunk_size,
            config.chunk_overlap,
        )
    }

    fn chunk_file(&self, path: &Path, content: &str) -> Vec<Chunk> {
        let source = path.to_string_lossy().to_string();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source.clone());
        let headings = markdown_headings(content);

        chunk_text(content, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, (start, text))| {
                let title = section_title(&headings, start, start + text.len()).unwrap_or(stem.as_str());
                Chunk::new(text)
                    .with_metadata("source", source.as_str())
                    .with_metadata("section_title", title)
                    .with_metadata("chunk", i)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn load(&self) -> SourceReport {
        let mut report = SourceReport::default();

        let mut paths = Vec::new();
        if let Err(e) = collect_files(&self.dir, &self.extensions, &mut paths).await {
            error!(dir = %self.dir.display(), "Failed to read specifications directory: {e}");
            report.failures.push(SourceFailure {
                path: self.dir.clone(),
                reason: e.to_string(),
            });
            return report;
        }
        paths.sort();
        info!("Found {} specification files", paths.len());

        for path in paths {
            match fs::read_to_string(&path).await {
                Ok(content) if content.trim().is_empty() => {
                    warn!(file = %path.display(), "Skipping empty file");
                }
                Ok(content) => {
                    let chunks = self.chunk_file(&path, &content);
                    debug!(file = %path.display(), chunks = chunks.len(), "Chunked file");
                    report.chunks.extend(chunks);
                }
                Err(e) => {
                    warn!(file = %path.display(), "Failed to read file: {e}");
                    report.failures.push(SourceFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Splits text into overlapping chunks, returning each chunk with its byte
/// offset in `text`.
///
/// Chunk boundaries are moved to the nearest UTF-8 character boundary so
/// multi-byte characters are never split.
pub(crate) fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, String)> {
    if text.is_empty() {
        return vec![];
    }

    if text.len() <= chunk_size {
        return vec![(0, text.to_string())];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());

        // Find the nearest character boundary at or before 'end'
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        // A single character wider than chunk_size
        if end == start {
            end = start + 1;
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }

        chunks.push((start, text[start..end].to_string()));

        if end == text.len() {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    chunks
}

/// Byte offsets and titles of markdown ATX headings (`# Title`).
fn markdown_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            let title = trimmed.trim_start_matches('#').trim();
            if !title.is_empty() {
                headings.push((offset, title.to_string()));
            }
        }
        offset += line.len();
    }

    headings
}

/// The heading governing a chunk spanning `start..end`: the last heading at or
/// before `start`, else the first heading inside the chunk.
fn section_title(headings: &[(usize, String)], start: usize, end: usize) -> Option<&str> {
    headings
        .iter()
        .rev()
        .find(|(offset, _)| *offset <= start)
        .or_else(|| headings.iter().find(|(offset, _)| *offset < end))
        .map(|(_, title)| title.as_str())
}

fn collect_files<'a>(
    dir: &'a Path,
    extensions: &'a [String],
    files: &'a mut Vec<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if entry.file_type().await?.is_dir() {
                collect_files(&path, extensions, files).await?;
            } else if is_ingestable(&path, extensions) {
                files.push(path);
            }
        }

        Ok(())
    })
}

/// If `extensions` is empty, every file is ingestable.
fn is_ingestable(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
