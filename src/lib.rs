//! specclass - Classify free-text items against a specification corpus
//!
//! This is the convenience wrapper crate that re-exports the
//! `specclass-core` engine.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! specclass = "0.1"
//! ```

// Re-export core
pub use specclass_core::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use specclass_core::classify::{ClassificationResult, ClassifiedItem, Classifier};
    pub use specclass_core::pipeline::{CsvReport, Pipeline, ReportWriter, RunSummary};
    pub use specclass_core::rag::{Chunk, DirectorySource, DocumentSource, VectorIndex};
    pub use specclass_core::{Config, Provider};
}
