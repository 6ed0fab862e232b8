use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar metadata value attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Provenance metadata (source file, section title, chunk index).
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A unit of corpus text produced by a document source.
///
/// Chunks carry no ID until they are inserted; the vector index assigns one.
///
/// # Example
///
/// ```no_run
/// # use specclass_core::rag::Chunk;
/// let chunk = Chunk::new("Fasteners shall be stainless steel.")
///     .with_metadata("source", "division_05.md")
///     .with_metadata("section_title", "Fasteners");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A chunk stored in a collection, with its collection-local ID.
///
/// Documents are write-once. The embedding is only populated on the way in;
/// search results leave it empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: chunk.text,
            embedding,
            metadata: chunk.metadata,
        }
    }
}

/// A search result containing a document and its distance to the query.
///
/// Distances are cosine distances in `[0, 2]`: `0.0` is an identical direction,
/// `1.0` orthogonal. Lower is more relevant, and results are ordered by
/// non-decreasing distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub document: Document,
    pub distance: f32,
}
