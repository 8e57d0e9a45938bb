
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    Document, MetadataFilter, QueryInput, ScoredDocument, VectorStore, validate_collection_name,
};
use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

/// LanceDB-backed store holding one table per collection
pub struct LanceVectorStore {
    connection: Connection,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

fn store_error(context: &str, error: impl std::fmt::Display) -> RagError {
    RagError::VectorStore(format!("{context}: {error}"))
}

fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `LIKE` prefilter over the serialized `metadata` column.
///
/// It can over-match (`_` and `%` stay wildcards) but never under-match, so results
/// are re-checked with [`Document::matches`]. Pairs whose JSON contains a backslash
/// are left to that re-check alone.
fn metadata_predicate(filter: &MetadataFilter) -> Option<String> {
    let clauses: Vec<String> = filter
        .iter()
        .filter_map(|(key, value)| {
            let key = serde_json::to_string(key).ok()?;
            let value = serde_json::to_string(value).ok()?;
            let pair = format!("{key}:{value}");
            (!pair.contains('\\')).then(|| {
                format!(
                    "(metadata LIKE {} OR metadata LIKE {})",
                    sql_quote(&format!("%{pair},%")),
                    sql_quote(&format!("%{pair}}}%"))
                )
            })
        })
        .collect();

    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

impl LanceVectorStore {
    /// Open (or create) the database under `db_path`
    #[inline]
    pub async fn open(
        db_path: &Path,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            store_error("Failed to create vector database directory", e)
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_error("Failed to connect to LanceDB", e))?;

        info!("Vector store opened at {:?}", db_path);
        Ok(Self {
            connection,
            embedder,
        })
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn table_exists(&self, collection: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("Failed to list tables", e))?;
        Ok(table_names.iter().any(|name| name == collection))
    }

    async fn open_table(&self, collection: &str) -> Result<lancedb::Table> {
        self.connection
            .open_table(collection)
            .execute()
            .await
            .map_err(|e| store_error(&format!("Failed to open collection '{collection}'"), e))
    }

    /// Dimension of the `vector` column of an existing table
    async fn table_dimension(table: &lancedb::Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| store_error("Failed to get table schema", e))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::VectorStore(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })
    }

    fn create_record_batch(documents: &[&Document], vector_dim: usize) -> Result<RecordBatch> {
        let len = documents.len();
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);

        for document in documents {
            ids.push(document.id.as_str());
            contents.push(document.content.as_str());
            sources.push(document.source().unwrap_or("Unknown"));
            metadata.push(
                serde_json::to_string(&document.metadata)
                    .map_err(|e| store_error("Failed to serialize metadata", e))?,
            );
            flat_values.extend_from_slice(&document.embedding);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| store_error("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(StringArray::from(vec![created_at.as_str(); len])),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| store_error("Failed to create record batch", e))
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .ok_or_else(|| RagError::VectorStore(format!("Missing {name} column")))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| RagError::VectorStore(format!("Invalid {name} column type")))
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredDocument>> {
        let ids = Self::string_column(batch, "id")?;
        let contents = Self::string_column(batch, "content")?;
        let metadata = Self::string_column(batch, "metadata")?;

        let vectors = batch
            .column_by_name("vector")
            .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>());

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let metadata: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(metadata.value(row)).unwrap_or_else(|e| {
                    warn!("Unreadable metadata for {}: {}", ids.value(row), e);
                    BTreeMap::new()
                });

            let embedding = vectors
                .and_then(|v| {
                    v.value(row)
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|values| values.values().to_vec())
                })
                .unwrap_or_default();

            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            results.push(ScoredDocument {
                document: Document {
                    id: ids.value(row).to_string(),
                    content: contents.value(row).to_string(),
                    metadata,
                    embedding,
                },
                // cosine distance lies in [0, 2]
                similarity_score: (1.0 - distance).clamp(0.0, 1.0),
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn query(
        &self,
        collection: &str,
        input: QueryInput<'_>,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        validate_collection_name(collection)?;

        let embedded;
        let query_vector = match input {
            QueryInput::Vector(vector) => vector,
            QueryInput::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    RagError::VectorStore("Text queries need an embedding provider".to_string())
                })?;
                embedded = embedder.embed(text).await?;
                embedded.as_slice()
            }
        };

        debug!(
            "Searching collection '{}' with limit: {}",
            collection, top_k
        );

        let table = self.open_table(collection).await?;
        let mut search = table
            .vector_search(query_vector)
            .map_err(|e| store_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = metadata_predicate(filter) {
            debug!("Filtering '{}' with {}", collection, predicate);
            search = search.only_if(predicate);
        }

        let mut stream = search
            .execute()
            .await
            .map_err(|e| store_error("Failed to execute search", e))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| store_error("Failed to read result stream", e))?
        {
            results.extend(Self::parse_search_batch(&batch)?);
        }

        results.retain(|scored| scored.document.matches(filter));
        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        results.truncate(top_k);

        debug!("Collection '{}' returned {} results", collection, results.len());
        Ok(results)
    }

    async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<()> {
        validate_collection_name(collection)?;

        let Some(first) = documents.first() else {
            debug!("No documents to store");
            return Ok(());
        };

        let vector_dim = first.embedding.len();
        if vector_dim == 0 {
            return Err(RagError::VectorStore(format!(
                "Document {} has no embedding",
                first.id
            )));
        }
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != vector_dim) {
            return Err(RagError::VectorStore(format!(
                "Document {} has {} dimensions, expected {}",
                bad.id,
                bad.embedding.len(),
                vector_dim
            )));
        }

        if !self.table_exists(collection).await? {
            info!(
                "Creating collection '{}' with {} dimensions",
                collection, vector_dim
            );
            self.connection
                .create_empty_table(collection, Self::create_schema(vector_dim))
                .execute()
                .await
                .map_err(|e| store_error("Failed to create table", e))?;
        }

        let table = self.open_table(collection).await?;
        let table_dim = Self::table_dimension(&table).await?;
        if table_dim != vector_dim {
            return Err(RagError::VectorStore(format!(
                "Collection '{collection}' stores {table_dim}-dimensional vectors, got {vector_dim}"
            )));
        }

        // merge keys must be unique within the batch; the last duplicate wins
        let mut seen = HashSet::new();
        let unique: Vec<&Document> = documents
            .iter()
            .rev()
            .filter(|document| seen.insert(document.id.as_str()))
            .collect();

        let record_batch = Self::create_record_batch(&unique, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| store_error("Failed to upsert documents", e))?;

        info!(
            "Stored {} documents in collection '{}'",
            unique.len(),
            collection
        );
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        validate_collection_name(collection)?;

        if ids.is_empty() || !self.table_exists(collection).await? {
            return Ok(());
        }

        let predicate = format!(
            "id IN ({})",
            ids.iter()
                .map(|id| sql_quote(id))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.open_table(collection)
            .await?
            .delete(&predicate)
            .await
            .map_err(|e| store_error("Failed to delete documents", e))?;

        debug!("Deleted up to {} documents from '{}'", ids.len(), collection);
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;

        if !self.table_exists(collection).await? {
            return Ok(0);
        }

        self.open_table(collection)
            .await?
            .count_rows(None)
            .await
            .map_err(|e| store_error("Failed to count rows", e))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("Failed to list tables", e))
    }
}
