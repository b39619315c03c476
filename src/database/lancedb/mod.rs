// LanceDB vector index
// One table per collection, cosine distance for similarity search


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{CollectionHandle, IndexedRecord, RetrievedDocument, VectorIndex};
use crate::config::Config;
use crate::{QaError, Result};

/// Vector index persisted with LanceDB
pub struct LanceIndex {
    connection: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for LanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LanceIndex {
    /// Open (or create) the index under the configured vector database directory
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.vector_database_path()).await
    }

    /// Open (or create) the index stored at `path`
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            QaError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB at {}: {}", uri, e);
            QaError::Database(format!("Failed to connect to LanceDB: {}", e))
        })?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| QaError::Database(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.iter().any(|table| table == name))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        match self.connection.open_table(name).execute().await {
            Ok(table) => Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => {
                Err(QaError::CollectionNotFound(name.to_string()))
            }
            Err(e) => Err(QaError::Database(format!(
                "Failed to open table {}: {}",
                name, e
            ))),
        }
    }

    /// Vector dimension of an existing table, read from its schema
    async fn detect_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| QaError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        QaError::Database(format!("Invalid vector dimension: {}", size))
                    });
                }
            }
        }

        Err(QaError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_schema(dimension: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    dimension,
                ),
                false,
            ),
            Field::new("document", DataType::Utf8, false),
            Field::new("position", DataType::UInt32, false),
            Field::new("source_offset", DataType::UInt32, false),
            Field::new("ingested_at", DataType::Utf8, false),
        ]))
    }

    fn dimension_to_i32(dimension: usize) -> Result<i32> {
        i32::try_from(dimension)
            .ok()
            .filter(|dim| *dim > 0)
            .ok_or_else(|| QaError::Database(format!("Invalid vector dimension: {}", dimension)))
    }

    /// Build a RecordBatch from indexed records
    fn create_record_batch(
        collection: &CollectionHandle,
        records: &[IndexedRecord],
    ) -> Result<RecordBatch> {
        let dimension = Self::dimension_to_i32(collection.dimension())?;
        let len = records.len();
        let ingested_at = chrono::Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * collection.dimension());
        let mut documents = Vec::with_capacity(len);
        let mut positions = Vec::with_capacity(len);
        let mut offsets = Vec::with_capacity(len);

        for record in records {
            if record.embedding.len() != collection.dimension() {
                return Err(QaError::Database(format!(
                    "record {} has {} dimensions, collection {} expects {}",
                    record.id,
                    record.embedding.len(),
                    collection.name(),
                    collection.dimension()
                )));
            }
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.embedding);
            documents.push(record.document.as_str());
            positions.push(record.position);
            offsets.push(record.source_offset);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, dimension, Arc::new(values_array), None).map_err(
                |e| QaError::Database(format!("Failed to create vector array: {}", e)),
            )?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(documents)),
            Arc::new(UInt32Array::from(positions)),
            Arc::new(UInt32Array::from(offsets)),
            Arc::new(StringArray::from(vec![ingested_at.as_str(); len])),
        ];

        RecordBatch::try_new(Self::create_schema(dimension), arrays)
            .map_err(|e| QaError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Parse a single record batch of search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedDocument>> {
        let ids = string_column(batch, "id")?;
        let documents = string_column(batch, "document")?;
        let positions = batch
            .column_by_name("position")
            .ok_or_else(|| QaError::Database("Missing position column".to_string()))?
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| QaError::Database("Invalid position column type".to_string()))?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let results = (0..batch.num_rows())
            .map(|row| RetrievedDocument {
                id: ids.value(row).to_string(),
                document: documents.value(row).to_string(),
                position: positions.value(row),
                distance: distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) }),
            })
            .collect();

        Ok(results)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| QaError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| QaError::Database(format!("Invalid {} column type", name)))
}

#[async_trait]
impl VectorIndex for LanceIndex {
    #[inline]
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<CollectionHandle> {
        if self.table_exists(name).await? {
            return Err(QaError::CollectionAlreadyExists(name.to_string()));
        }

        let schema = Self::create_schema(Self::dimension_to_i32(dimension)?);
        self.connection
            .create_empty_table(name, schema)
            .execute()
            .await
            .map_err(|e| match e {
                lancedb::Error::TableAlreadyExists { .. } => {
                    QaError::CollectionAlreadyExists(name.to_string())
                }
                other => QaError::Database(format!("Failed to create table {}: {}", name, other)),
            })?;

        info!("Created collection {} with {} dimensions", name, dimension);
        Ok(CollectionHandle::new(name, dimension))
    }

    #[inline]
    async fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        let table = self.open_table(name).await?;
        let dimension = Self::detect_dimension(&table).await?;
        debug!("Opened collection {} ({} dimensions)", name, dimension);
        Ok(CollectionHandle::new(name, dimension))
    }

    #[inline]
    async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.table_exists(name).await? {
            return Err(QaError::CollectionNotFound(name.to_string()));
        }

        self.connection
            .drop_table(name)
            .await
            .map_err(|e| QaError::Database(format!("Failed to drop table {}: {}", name, e)))?;

        info!("Deleted collection {}", name);
        Ok(())
    }

    #[inline]
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| QaError::Database(format!("Failed to list tables: {}", e)))?;
        names.sort();
        Ok(names)
    }

    #[inline]
    async fn add(&self, collection: &CollectionHandle, records: Vec<IndexedRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No records to store");
            return Ok(());
        }

        debug!(
            "Storing batch of {} records in {}",
            records.len(),
            collection.name()
        );

        let record_batch = Self::create_record_batch(collection, &records)?;
        let table = self.open_table(collection.name()).await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| QaError::Database(format!("Failed to insert records: {}", e)))?;

        Ok(())
    }

    #[inline]
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        debug!(
            "Searching {} for {} nearest records",
            collection.name(),
            k
        );

        if vector.len() != collection.dimension() {
            return Err(QaError::Database(format!(
                "query vector has {} dimensions, collection {} expects {}",
                vector.len(),
                collection.name(),
                collection.dimension()
            )));
        }

        let table = self.open_table(collection.name()).await?;

        // Vector search over an empty dataset has nothing to rank
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| QaError::Database(format!("Failed to count rows: {}", e)))?;
        if rows == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut results = table
            .vector_search(vector)
            .map_err(|e| QaError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| QaError::Database(format!("Failed to execute search: {}", e)))?;

        let mut documents = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| QaError::Database(format!("Failed to read result stream: {}", e)))?
        {
            documents.extend(Self::parse_search_batch(&batch)?);
        }

        documents.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        documents.truncate(k);
        debug!("Retrieved {} documents from {}", documents.len(), collection.name());
        Ok(documents)
    }

    #[inline]
    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let table = self.open_table(collection.name()).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| QaError::Database(format!("Failed to count rows: {}", e)))
    }
}
