//! specclass-core - Retrieval-augmented classification engine
//!
//! Provides the components of a classification run:
//! - Model backends (Ollama, OpenAI, Anthropic) behind one [`Provider`] trait
//! - Embedding, vector storage and cached similarity search ([`rag`])
//! - Prompting, retries, response parsing and result caching ([`classify`])
//! - Configuration management
//! - The run orchestrator ([`Pipeline`])
//!
//! ## Primary API
//!
//! Most users build a [`Pipeline`] from a [`Config`] and call
//! [`Pipeline::run`].

// Public modules
pub mod classify;
pub mod config;
pub mod pipeline;
pub mod provider;
pub mod rag;

// Public exports
pub use classify::{ClassificationResult, ClassifiedItem, Classifier, Invocation, InvocationState};
pub use config::{Config, ConfigError};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use rag::{Chunk, DirectorySource, DocumentSource, VectorIndex};

// Provider exports
pub use provider::{Provider, ProviderError};
