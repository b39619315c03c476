
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CollectionHandle, IndexedRecord, RetrievedDocument, VectorIndex, cosine_distance};
use crate::{QaError, Result};

/// Process-local vector index with brute-force cosine search
#[derive(Debug, Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

#[derive(Debug)]
struct MemoryCollection {
    dimension: usize,
    ids: HashSet<String>,
    records: Vec<IndexedRecord>,
}

impl MemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    #[inline]
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<CollectionHandle> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(QaError::CollectionAlreadyExists(name.to_string()));
        }

        collections.insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                ids: HashSet::new(),
                records: Vec::new(),
            },
        );
        debug!("Created in-memory collection {} ({} dimensions)", name, dimension);
        Ok(CollectionHandle::new(name, dimension))
    }

    #[inline]
    async fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        let collections = self.collections.read().await;
        collections
            .get(name)
            .map(|collection| CollectionHandle::new(name, collection.dimension))
            .ok_or_else(|| QaError::CollectionNotFound(name.to_string()))
    }

    #[inline]
    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| info!("Deleted in-memory collection {}", name))
            .ok_or_else(|| QaError::CollectionNotFound(name.to_string()))
    }

    #[inline]
    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    #[inline]
    async fn add(&self, collection: &CollectionHandle, records: Vec<IndexedRecord>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection.name())
            .ok_or_else(|| QaError::CollectionNotFound(collection.name().to_string()))?;

        // Validate the whole batch before touching the collection
        let mut batch_ids = HashSet::with_capacity(records.len());
        for record in &records {
            if record.embedding.len() != target.dimension {
                return Err(QaError::Database(format!(
                    "record {} has {} dimensions, collection {} expects {}",
                    record.id,
                    record.embedding.len(),
                    collection.name(),
                    target.dimension
                )));
            }
            if target.ids.contains(&record.id) || !batch_ids.insert(record.id.as_str()) {
                return Err(QaError::Database(format!(
                    "duplicate record id {} in collection {}",
                    record.id,
                    collection.name()
                )));
            }
        }

        debug!(
            "Adding {} records to in-memory collection {}",
            records.len(),
            collection.name()
        );
        for record in records {
            target.ids.insert(record.id.clone());
            target.records.push(record);
        }
        Ok(())
    }

    #[inline]
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection.name())
            .ok_or_else(|| QaError::CollectionNotFound(collection.name().to_string()))?;

        if vector.len() != target.dimension {
            return Err(QaError::Database(format!(
                "query vector has {} dimensions, collection {} expects {}",
                vector.len(),
                collection.name(),
                target.dimension
            )));
        }

        let mut scored: Vec<RetrievedDocument> = target
            .records
            .iter()
            .map(|record| RetrievedDocument {
                id: record.id.clone(),
                document: record.document.clone(),
                position: record.position,
                distance: cosine_distance(&record.embedding, vector),
            })
            .collect();

        // Ties keep insertion order
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    #[inline]
    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let collections = self.collections.read().await;
        collections
            .get(collection.name())
            .map(|target| target.records.len())
            .ok_or_else(|| QaError::CollectionNotFound(collection.name().to_string()))
    }
}
