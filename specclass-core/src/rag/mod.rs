//! Retrieval: embedding, vector storage and cached similarity search.
//!
//! # Architecture
//!
//! - [`EmbeddingService`]: batches texts to an [`EmbeddingBackend`] and
//!   memoizes vectors by content hash
//! - [`VectorStore`]: per-collection storage (embedded LanceDB or in-memory)
//! - [`VectorIndex`]: the active collection, ID assignment, dimension checks
//!   and the [`RetrievalCache`] in front of search
//! - [`DocumentSource`]: where chunks come from before ingestion
//!
//! # How It Works
//!
//! 1. **Ingest**: chunks are embedded in batches and appended to the active
//!    collection under sequential, collection-local IDs
//! 2. **Retrieve**: the query is embedded (usually a cache hit for repeated
//!    items) and the nearest chunks are returned by ascending cosine distance
//! 3. **Reset**: the collection is dropped and recreated, and every cached
//!    retrieval for it is invalidated

mod embedder;
mod index;
mod lancedb_store;
mod memory_store;
mod retrieval_cache;
mod source;
mod store;
mod types;

pub use embedder::{create_embedding_backend, EmbeddingBackend, EmbeddingError, EmbeddingService, HashEmbedder};
pub use index::{IndexError, VectorIndex};
pub use lancedb_store::LanceDbStore;
pub use memory_store::MemoryStore;
pub use retrieval_cache::{RetrievalCache, RetrievalKey};
pub use source::{DirectorySource, DocumentSource, SourceError, SourceFailure, SourceReport};
pub use store::{create_vector_store, VectorStore};
pub use types::{Chunk, Document, Metadata, MetadataValue, SearchResult};
