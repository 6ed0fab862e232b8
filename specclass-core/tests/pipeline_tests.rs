//! End-to-end runs over the in-memory store, the hash embedder and a scripted
//! model backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use specclass_core::classify::{ClassifiedItem, Classifier, PromptBuilder, RetryPolicy};
use specclass_core::config::RunConfig;
use specclass_core::pipeline::{Pipeline, PipelineError, PipelineSettings, ReportError, ReportWriter};
use specclass_core::provider::{self, Provider, ProviderError};
use specclass_core::rag::{
    Chunk, Document, EmbeddingBackend, EmbeddingError, EmbeddingService, HashEmbedder, IndexError, MemoryStore,
    RetrievalCache, SearchResult, VectorIndex, VectorStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIM: usize = 64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("specclass_core=debug")
        .with_test_writer()
        .try_init();
}

/// Classifies every item as its upper-cased text, except items listed as broken.
struct EchoProvider {
    broken: Vec<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl EchoProvider {
    fn new(broken: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            broken: broken.iter().map(|s| s.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, system_prompt: &str, user_query: &str, _schema: &Value) -> provider::Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_query.to_string()));

        if self.broken.iter().any(|b| b == user_query) {
            return Err(ProviderError::Other("model refused".into()));
        }

        Ok(json!({
            "primary_classification": format!("P-{user_query}"),
            "classification": user_query.to_uppercase(),
            "reasoning": "matched context",
            "confidence": 0.75
        })
        .to_string())
    }
}

/// Embeds like the hash embedder but fails any batch containing "poison".
struct PoisonableEmbedder(HashEmbedder);

#[async_trait]
impl EmbeddingBackend for PoisonableEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(EmbeddingError::Backend("backend rejected batch".into()));
        }
        self.0.embed_batch(texts).await
    }
}

/// A memory store whose n-th search (1-based) fails.
struct FlakySearchStore {
    inner: MemoryStore,
    fail_on: usize,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorStore for FlakySearchStore {
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        self.inner.has_collection(collection).await
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> anyhow::Result<()> {
        self.inner.create_collection(collection, dimension).await
    }

    async fn dimension(&self, collection: &str) -> anyhow::Result<Option<usize>> {
        self.inner.dimension(collection).await
    }

    async fn drop_collection(&self, collection: &str) -> anyhow::Result<()> {
        self.inner.drop_collection(collection).await
    }

    async fn add(&self, collection: &str, documents: Vec<Document>) -> anyhow::Result<()> {
        self.inner.add(collection, documents).await
    }

    async fn search(&self, collection: &str, query: &[f32], k: usize) -> anyhow::Result<Vec<SearchResult>> {
        if self.searches.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            anyhow::bail!("disk read failed");
        }
        self.inner.search(collection, query, k).await
    }

    async fn count(&self, collection: &str) -> anyhow::Result<usize> {
        self.inner.count(collection).await
    }
}

/// Always answers with the same reply.
struct FixedProvider(String);

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn invoke(&self, _system_prompt: &str, _user_query: &str, _schema: &Value) -> provider::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct MemoryReport {
    rows: Mutex<Vec<ClassifiedItem>>,
}

impl ReportWriter for MemoryReport {
    fn write(&self, items: &[String], results: &[ClassifiedItem]) -> Result<(), ReportError> {
        if items.len() != results.len() {
            return Err(ReportError::CountMismatch {
                items: items.len(),
                results: results.len(),
            });
        }
        *self.rows.lock().unwrap() = results.to_vec();
        Ok(())
    }
}

impl MemoryReport {
    fn rows(&self) -> Vec<ClassifiedItem> {
        self.rows.lock().unwrap().clone()
    }
}

fn settings(batch_size: usize) -> PipelineSettings {
    PipelineSettings {
        ingest_batch_size: batch_size,
        verify_samples: 2,
        context_separator: "\n\n".to_string(),
        show_progress: false,
    }
}

fn classifier(provider: Arc<dyn Provider>) -> Arc<Classifier> {
    let run = RunConfig {
        spec_book_description: "Hardware spec book".into(),
        item_description: "Purchase order lines".into(),
        weighted_spec: None,
    };
    Arc::new(Classifier::new(
        provider,
        RetryPolicy::new(3, Duration::ZERO),
        PromptBuilder::new(&run),
        64,
    ))
}

async fn index_with(store: Arc<dyn VectorStore>, backend: Arc<dyn EmbeddingBackend>, dimension: usize) -> Arc<VectorIndex> {
    let embedder = Arc::new(EmbeddingService::new(backend, 4, 256));
    let index = VectorIndex::new(store, embedder, dimension, 2, RetrievalCache::new(64));
    index.use_collection("specs").await.unwrap();
    Arc::new(index)
}

async fn memory_index() -> Arc<VectorIndex> {
    index_with(Arc::new(MemoryStore::new()), Arc::new(HashEmbedder::new(DIM)), DIM).await
}

fn corpus() -> Vec<Chunk> {
    [
        ("Bolts shall be stainless steel, grade 316.", "Fasteners"),
        ("Electrical wire shall be copper, 12 AWG minimum.", "Wiring"),
        ("Primer shall be applied before finish paint.", "Coatings"),
    ]
    .into_iter()
    .map(|(text, section)| Chunk::new(text).with_metadata("section_title", section))
    .collect()
}

fn items(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_output_matches_input_length_and_order() {
    init_tracing();
    let provider = EchoProvider::new(&[]);
    let pipeline = Pipeline::new(memory_index().await, classifier(provider.clone()), settings(32));
    let report = MemoryReport::default();
    let input = items(&["stainless bolt", "copper wire", "primer", "stainless bolt"]);

    let summary = pipeline.run(&corpus(), &input, &report, true).await.unwrap();

    let rows = report.rows();
    assert_eq!(rows.len(), input.len());
    for (row, item) in rows.iter().zip(&input) {
        assert_eq!(&row.item, item);
        assert_eq!(row.result.classification, item.to_uppercase());
        assert_eq!(row.result.primary_classification, format!("P-{item}"));
        assert_eq!(row.result.confidence, 0.75);
    }

    assert_eq!(summary.ingest.chunks_ingested, 3);
    assert_eq!(summary.documents, 3);
    assert_eq!(summary.items_classified, 4);
    assert_eq!(summary.items_errored, 0);

    // The repeated item had the same context, so the model was asked once.
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_context_is_joined_retrieved_chunks() {
    let provider = EchoProvider::new(&[]);
    let pipeline = Pipeline::new(memory_index().await, classifier(provider.clone()), settings(32));

    pipeline
        .run(&corpus(), &items(&["stainless steel bolts"]), &MemoryReport::default(), true)
        .await
        .unwrap();

    let prompts = provider.prompts.lock().unwrap();
    let (system_prompt, user_query) = &prompts[0];
    assert_eq!(user_query, "stainless steel bolts");
    assert!(system_prompt.contains("Bolts shall be stainless steel, grade 316."));
    assert!(system_prompt.contains("Specification Book Description: Hardware spec book"));
    // top_k is 2, so exactly one separator joins the context.
    let context = system_prompt
        .split("Context: ")
        .nth(1)
        .and_then(|rest| rest.split("\n\nSpecification Book Description").next())
        .unwrap();
    assert_eq!(context.matches("\n\n").count(), 1);
}

#[tokio::test]
async fn test_empty_corpus_still_classifies() {
    let provider = EchoProvider::new(&[]);
    let pipeline = Pipeline::new(memory_index().await, classifier(provider.clone()), settings(32));
    let report = MemoryReport::default();

    let summary = pipeline
        .run(&Vec::<Chunk>::new(), &items(&["widget"]), &report, true)
        .await
        .unwrap();

    assert_eq!(summary.documents, 0);
    let rows = report.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item, "widget");
    assert_eq!(rows[0].result.classification, "WIDGET");

    let prompts = provider.prompts.lock().unwrap();
    assert!(prompts[0].0.contains("Context: \n"));
}

#[tokio::test]
async fn test_failed_item_does_not_abort_batch() {
    init_tracing();
    let provider = EchoProvider::new(&["copper wire"]);
    let pipeline = Pipeline::new(memory_index().await, classifier(provider.clone()), settings(32));
    let report = MemoryReport::default();

    let summary = pipeline
        .run(&corpus(), &items(&["bolt", "copper wire", "primer"]), &report, true)
        .await
        .unwrap();

    let rows = report.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].result.classification, "BOLT");
    assert_eq!(rows[1].result.classification, "Error");
    assert_eq!(rows[1].result.confidence, 0.0);
    assert!(rows[1].result.reasoning.contains("model refused"));
    assert_eq!(rows[2].result.classification, "PRIMER");
    assert_eq!(summary.items_errored, 1);
    assert_eq!(summary.items_classified, 2);
}

#[tokio::test]
async fn test_retrieval_error_becomes_error_entry() {
    // Search #1 is the verification sample; #2 is the first item.
    let store = Arc::new(FlakySearchStore {
        inner: MemoryStore::new(),
        fail_on: 2,
        searches: AtomicUsize::new(0),
    });
    let index = index_with(store, Arc::new(HashEmbedder::new(DIM)), DIM).await;
    let pipeline = Pipeline::new(index, classifier(EchoProvider::new(&[])), settings(32));
    let report = MemoryReport::default();

    pipeline
        .run(&corpus(), &items(&["bolt", "primer"]), &report, true)
        .await
        .unwrap();

    let rows = report.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].result.classification, "Error");
    assert!(rows[0].result.reasoning.starts_with("Error in classification:"));
    assert!(rows[0].result.reasoning.contains("disk read failed"));
    assert_eq!(rows[1].result.classification, "PRIMER");
}

#[tokio::test]
async fn test_failed_ingest_batch_is_skipped() {
    init_tracing();
    let backend = Arc::new(PoisonableEmbedder(HashEmbedder::new(DIM)));
    let index = index_with(Arc::new(MemoryStore::new()), backend, DIM).await;
    let pipeline = Pipeline::new(index, classifier(EchoProvider::new(&[])), settings(2));

    let chunks = vec![
        Chunk::new("bolts"),
        Chunk::new("nuts"),
        Chunk::new("poison pill"),
        Chunk::new("washers"),
        Chunk::new("screws"),
    ];
    let summary = pipeline
        .run(&chunks, &items(&["bolt"]), &MemoryReport::default(), true)
        .await
        .unwrap();

    assert_eq!(summary.ingest.batches_skipped, 1);
    assert_eq!(summary.ingest.chunks_ingested, 3);
    assert_eq!(summary.documents, 3);
}

#[tokio::test]
async fn test_dimension_mismatch_aborts_run_and_clears_caches() {
    init_tracing();
    // The embedder produces 32-dimensional vectors for a 64-dimensional index.
    let index = index_with(Arc::new(MemoryStore::new()), Arc::new(HashEmbedder::new(32)), DIM).await;
    let pipeline = Pipeline::new(index, classifier(EchoProvider::new(&[])), settings(32));
    let report = MemoryReport::default();

    let err = pipeline
        .run(&corpus(), &items(&["bolt"]), &report, true)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Index(IndexError::DimensionMismatch { expected: 64, got: 32 })));
    assert!(report.rows().is_empty());
    assert_eq!(pipeline.index().embedder().cached_len(), 0);
}

#[tokio::test]
async fn test_caches_are_cleared_after_run() {
    let pipeline = Pipeline::new(memory_index().await, classifier(EchoProvider::new(&[])), settings(32));

    pipeline
        .run(&corpus(), &items(&["bolt", "wire"]), &MemoryReport::default(), true)
        .await
        .unwrap();

    assert_eq!(pipeline.classifier().cached_len(), 0);
    assert_eq!(pipeline.index().embedder().cached_len(), 0);
    assert_eq!(pipeline.index().cached_retrievals(), 0);
}

#[tokio::test]
async fn test_model_error_label_is_not_counted_as_failure() {
    let reply = json!({
        "primary_classification": "Error",
        "classification": "Error",
        "reasoning": "The item names an error code",
        "confidence": 0.0
    })
    .to_string();
    let pipeline = Pipeline::new(
        memory_index().await,
        classifier(Arc::new(FixedProvider(reply))),
        settings(32),
    );
    let report = MemoryReport::default();

    let summary = pipeline
        .run(&corpus(), &items(&["error code E-42"]), &report, true)
        .await
        .unwrap();

    assert_eq!(report.rows()[0].result.classification, "Error");
    assert_eq!(summary.items_classified, 1);
    assert_eq!(summary.items_errored, 0);
}

#[tokio::test]
async fn test_fatal_index_error_aborts_classification() {
    let provider = EchoProvider::new(&[]);
    let pipeline = Pipeline::new(memory_index().await, classifier(provider.clone()), settings(32));
    pipeline.ingest(&corpus()).await.unwrap();
    pipeline.index().drop_collection().await.unwrap();

    let err = pipeline
        .classify_items(&items(&["bolt", "primer"]))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Index(IndexError::NotReady(_))));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_reingest_without_reset_duplicates() {
    let pipeline = Pipeline::new(memory_index().await, classifier(EchoProvider::new(&[])), settings(32));
    let report = MemoryReport::default();

    let first = pipeline.run(&corpus(), &items(&["bolt"]), &report, true).await.unwrap();
    assert_eq!(first.documents, 3);

    let second = pipeline.run(&corpus(), &items(&["bolt"]), &report, false).await.unwrap();
    assert_eq!(second.documents, 6);

    let third = pipeline.run(&corpus(), &items(&["bolt"]), &report, true).await.unwrap();
    assert_eq!(third.documents, 3);
}
