//! End-to-end classification runs.
//!
//! A run resets the active collection (optional), ingests the corpus in
//! batches, verifies storage, then classifies every input item in order.
//! Batch failures during ingestion and errors on a single item are logged and
//! isolated; only fatal index errors abort the run, whichever step raises them.
//! Caches are cleared when a run ends, whether it succeeded or not.

mod input;
mod report;

pub use input::{find_input_file, list_columns, read_csv_items, ColumnSelector, InputError, InputItems};
pub use report::{CsvReport, ReportError, ReportWriter};

use crate::classify::{ClassificationResult, ClassifiedItem, Classifier, Invocation};
use crate::config::Config;
use crate::provider::ProviderError;
use crate::rag::{DocumentSource, IndexError, VectorIndex};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const VERIFY_QUERY: &str = "sample query for verification";
const PROGRESS_TEMPLATE: &str = "{msg:>12} [{bar:40}] {pos}/{len} ({eta})";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Knobs the orchestrator reads from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ingest_batch_size: usize,
    pub verify_samples: usize,
    pub context_separator: String,
    pub show_progress: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ingest_batch_size: config.ingest.batch_size,
            verify_samples: config.pipeline.verify_samples,
            context_separator: config.pipeline.context_separator.clone(),
            show_progress: config.pipeline.show_progress,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of the ingestion step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub chunks_ingested: usize,
    pub batches_skipped: usize,
    pub source_failures: usize,
}

/// Counts describing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ingest: IngestSummary,
    /// Documents in the active collection after ingestion.
    pub documents: usize,
    pub items_classified: usize,
    pub items_errored: usize,
}

/// Ordered results of classifying a list of items.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedItems {
    pub results: Vec<ClassifiedItem>,
    /// Items whose retrieval or model invocation failed.
    pub errored: usize,
}

/// Composes the vector index and the classifier into a run.
pub struct Pipeline {
    index: Arc<VectorIndex>,
    classifier: Arc<Classifier>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(index: Arc<VectorIndex>, classifier: Arc<Classifier>, settings: PipelineSettings) -> Self {
        Self {
            index,
            classifier,
            settings,
        }
    }

    /// Opens storage, activates the configured collection and builds the
    /// selected model backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index = VectorIndex::from_config(config).await?;
        let classifier = Classifier::from_config(config)?;
        Ok(Self::new(
            Arc::new(index),
            Arc::new(classifier),
            PipelineSettings::from_config(config),
        ))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Runs every step and writes the report.
    ///
    /// Caches are cleared before returning, including on error.
    pub async fn run(
        &self,
        source: &dyn DocumentSource,
        items: &[String],
        report: &dyn ReportWriter,
        reset: bool,
    ) -> Result<RunSummary> {
        info!(items = items.len(), reset, "Starting pipeline run");
        let outcome = self.run_steps(source, items, report, reset).await;
        self.clear_caches();

        match &outcome {
            Ok(summary) => info!(
                classified = summary.items_classified,
                errored = summary.items_errored,
                "Pipeline run completed"
            ),
            Err(e) => error!("Pipeline run aborted: {e}"),
        }
        outcome
    }

    async fn run_steps(
        &self,
        source: &dyn DocumentSource,
        items: &[String],
        report: &dyn ReportWriter,
        reset: bool,
    ) -> Result<RunSummary> {
        if reset {
            self.reset().await?;
        }
        let ingest = self.ingest(source).await?;
        let documents = self.verify().await?;

        let classified = self.classify_items(items).await?;
        report.write(items, &classified.results)?;

        Ok(RunSummary {
            ingest,
            documents,
            items_classified: classified.results.len() - classified.errored,
            items_errored: classified.errored,
        })
    }

    /// Empties the active collection.
    pub async fn reset(&self) -> Result<()> {
        let collection = self.index.active_collection().await?;
        info!(collection = %collection, "Resetting vector store");
        self.index.reset(&collection).await?;
        Ok(())
    }

    /// Loads chunks from `source` and inserts them in batches.
    ///
    /// A failed batch is logged and skipped; a fatal index error aborts.
    pub async fn ingest(&self, source: &dyn DocumentSource) -> Result<IngestSummary> {
        let loaded = source.load().await;
        for failure in &loaded.failures {
            warn!(path = %failure.path.display(), "Document source failure: {}", failure.reason);
        }
        info!("Processed {} chunks", loaded.chunks.len());

        let mut summary = IngestSummary {
            source_failures: loaded.failures.len(),
            ..IngestSummary::default()
        };

        let batch_size = self.settings.ingest_batch_size.max(1);
        let progress = self.progress_bar(loaded.chunks.len(), "Ingesting");

        for (batch_index, batch) in loaded.chunks.chunks(batch_size).enumerate() {
            match self.index.insert(batch.to_vec(), None).await {
                Ok(ids) => {
                    debug!(batch = batch_index, inserted = ids.len(), "Stored batch");
                    summary.chunks_ingested += ids.len();
                }
                Err(e) if e.is_fatal() => {
                    progress.abandon();
                    return Err(e.into());
                }
                Err(e) => {
                    error!(batch = batch_index, size = batch.len(), "Skipping batch: {e}");
                    summary.batches_skipped += 1;
                }
            }
            progress.inc(batch.len() as u64);
        }
        progress.finish_and_clear();

        info!(
            ingested = summary.chunks_ingested,
            skipped_batches = summary.batches_skipped,
            "Document processing and storage completed"
        );
        Ok(summary)
    }

    /// Samples the active collection and returns its document count.
    ///
    /// An empty collection is a warning; classification still runs.
    pub async fn verify(&self) -> Result<usize> {
        let collection = self.index.active_collection().await?;
        let total = self.index.count(&collection).await?;
        info!(collection = %collection, "Total documents in storage: {total}");

        if total == 0 {
            warn!("No documents found in storage");
            return Ok(0);
        }

        match self.index.search(VERIFY_QUERY, Some(self.settings.verify_samples)).await {
            Ok(samples) => {
                for (i, sample) in samples.iter().enumerate() {
                    let preview: String = sample.document.content.chars().take(100).collect();
                    debug!(
                        sample = i + 1,
                        distance = sample.distance,
                        metadata = ?sample.document.metadata,
                        "{preview}..."
                    );
                }
                info!("Retrieved {} sample documents", samples.len());
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!("Storage verification search failed: {e}"),
        }

        Ok(total)
    }

    /// Classifies `items` in order, one result per item.
    ///
    /// A failure on one item becomes that item's sentinel result. Fatal index
    /// errors abort instead, since every later item would fail the same way.
    pub async fn classify_items(&self, items: &[String]) -> Result<ClassifiedItems> {
        let progress = self.progress_bar(items.len(), "Classifying");
        let mut classified = ClassifiedItems {
            results: Vec::with_capacity(items.len()),
            errored: 0,
        };

        for (index, item) in items.iter().enumerate() {
            let result = match self.classify_one(item).await {
                Ok(invocation) => {
                    if invocation.state.is_failure() {
                        classified.errored += 1;
                    }
                    invocation.result
                }
                Err(e) if e.is_fatal() => {
                    progress.abandon();
                    return Err(e.into());
                }
                Err(e) => {
                    error!(item = index, "Error classifying item: {e}");
                    classified.errored += 1;
                    ClassificationResult::error(format!("Error in classification: {e}"))
                }
            };
            classified.results.push(ClassifiedItem::new(item.clone(), result));
            progress.inc(1);
        }
        progress.finish_and_clear();

        info!(
            classified = classified.results.len(),
            errored = classified.errored,
            "Classification finished"
        );
        Ok(classified)
    }

    async fn classify_one(&self, item: &str) -> std::result::Result<Invocation, IndexError> {
        let hits = self.index.search(item, None).await?;
        let context = hits
            .iter()
            .map(|hit| hit.document.content.as_str())
            .collect::<Vec<_>>()
            .join(&self.settings.context_separator);

        Ok(self.classifier.classify_detailed(&context, item).await)
    }

    /// Clears the embedding, retrieval and classification caches.
    pub fn clear_caches(&self) {
        self.index.embedder().clear_cache();
        self.index.clear_cache();
        self.classifier.clear_cache();
        debug!("Caches cleared");
    }

    fn progress_bar(&self, total: usize, message: &'static str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        ProgressBar::new(total as u64).with_style(style).with_message(message)
    }
}
