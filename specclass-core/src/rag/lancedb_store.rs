//! LanceDB vector database storage implementation.
//!
//! This module provides integration with LanceDB for embedded, in-process
//! vector storage. Each collection is one table under the storage directory.

use super::store::VectorStore;
use super::types::{Document, Metadata, SearchResult};
use anyhow::{bail, Context, Result};
use arrow_array::{
    array::{ArrayRef, FixedSizeListArray, Float32Array, StringArray},
    types::Float32Type,
    RecordBatch, RecordBatchIterator,
};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use lancedb::arrow::arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// LanceDB-based vector store for embedded deployment.
///
/// Provides zero-setup, persistent vector storage using LanceDB.
pub struct LanceDbStore {
    conn: Connection,
    path: PathBuf,
}

impl LanceDbStore {
    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    /// Opens (creating if needed) a LanceDB database rooted at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory path where LanceDB should store data
    pub async fn new(path: &str) -> Result<Self> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create storage directory {path}"))?;

        let conn = connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            conn,
            path: PathBuf::from(path),
        })
    }

    fn table_dir(&self, collection: &str) -> PathBuf {
        self.path.join(format!("{collection}.lance"))
    }

    fn to_record_batch(documents: Vec<Document>, dimension: usize) -> Result<RecordBatch> {
        let schema = Self::create_schema(dimension);

        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let metadata = documents
            .iter()
            .map(|d| serde_json::to_string(&d.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to serialize metadata")?;

        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            documents
                .into_iter()
                .map(|d| Some(d.embedding.into_iter().map(Some).collect::<Vec<_>>())),
            dimension as i32,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(contents)) as ArrayRef,
                Arc::new(vectors) as ArrayRef,
                Arc::new(StringArray::from(metadata)) as ArrayRef,
            ],
        )
        .context("Failed to create record batch")
    }
}

#[async_trait]
impl VectorStore for LanceDbStore {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let table_names = self.conn.table_names().execute().await?;
        Ok(table_names.iter().any(|name| name == collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        if self.has_collection(collection).await? {
            return Ok(());
        }

        self.conn
            .create_empty_table(collection, Self::create_schema(dimension))
            .execute()
            .await
            .with_context(|| format!("Failed to create LanceDB table '{collection}'"))?;

        debug!(collection, dimension, "Created LanceDB table");
        Ok(())
    }

    async fn dimension(&self, collection: &str) -> Result<Option<usize>> {
        if !self.has_collection(collection).await? {
            return Ok(None);
        }

        let table = self.conn.open_table(collection).execute().await?;
        let schema = table.schema().await?;
        let field = schema
            .field_with_name("vector")
            .with_context(|| format!("LanceDB table '{collection}' has no 'vector' column"))?;

        match field.data_type() {
            DataType::FixedSizeList(_, size) => Ok(Some(*size as usize)),
            other => bail!("LanceDB table '{collection}' has unexpected vector type {other}"),
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        if self.has_collection(collection).await? {
            self.conn
                .drop_table(collection, &[])
                .await
                .with_context(|| format!("Failed to drop LanceDB table '{collection}'"))?;
        }

        let dir = self.table_dir(collection);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }

        Ok(())
    }

    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let Some(dimension) = documents.first().map(|d| d.embedding.len()) else {
            return Ok(());
        };

        let batch = Self::to_record_batch(documents, dimension)?;
        let schema_ref = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema_ref);

        let table = self.conn.open_table(collection).execute().await?;
        table
            .add(reader)
            .execute()
            .await
            .context("Failed to add documents to LanceDB")?;

        Ok(())
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let table = self.conn.open_table(collection).execute().await?;
        if k == 0 || table.count_rows(None).await? == 0 {
            return Ok(Vec::new());
        }

        let results = table
            .query()
            .nearest_to(query_embedding)?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute LanceDB query")?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let mut search_results = Vec::new();

        for batch in batches {
            let id_array = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .context("Missing 'id' column")?;
            let content_array = batch
                .column_by_name("content")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .context("Missing 'content' column")?;
            let metadata_array = batch
                .column_by_name("metadata")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .context("Missing 'metadata' column")?;
            let distance_array = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .context("Missing '_distance' column")?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata = serde_json::from_str(metadata_array.value(i))
                    .context("Failed to parse stored metadata")?;

                search_results.push(SearchResult {
                    document: Document {
                        id: id_array.value(i).to_string(),
                        content: content_array.value(i).to_string(),
                        embedding: vec![],
                        metadata,
                    },
                    distance: distance_array.value(i),
                });
            }
        }

        search_results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        search_results.truncate(k);
        Ok(search_results)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let table = self.conn.open_table(collection).execute().await?;
        let count = table.count_rows(None).await?;
        Ok(count)
    }
}
