//! Vector index capability.
//!
//! Collections hold immutable `(id, embedding, document)` records and answer nearest-neighbour
//! queries. [`lancedb::LanceIndex`] persists them on disk, [`memory::MemoryIndex`] keeps them in
//! process.

pub mod lancedb;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::lancedb::LanceIndex;
pub use self::memory::MemoryIndex;

/// Record written into a collection during ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Unique within a collection generation
    pub id: String,
    pub embedding: Vec<f32>,
    /// The chunk text
    pub document: String,
    /// Position of the chunk within its source document
    pub position: u32,
    /// Word offset of the chunk within its source document
    pub source_offset: u32,
}

/// Document returned by a nearest-neighbour query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub document: String,
    pub position: u32,
    /// Cosine distance to the query vector, lower is closer
    pub distance: f32,
}

impl RetrievedDocument {
    /// Similarity score derived from the distance, higher is closer
    #[inline]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Opened collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
    dimension: usize,
}

impl CollectionHandle {
    #[inline]
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length every embedding in the collection must have
    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create an empty collection; fails with `CollectionAlreadyExists` if the name is taken
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<CollectionHandle>;

    /// Open an existing collection; fails with `CollectionNotFound`
    async fn get_collection(&self, name: &str) -> Result<CollectionHandle>;

    /// Drop a collection and all its records; fails with `CollectionNotFound`
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Append records. Records are never updated in place.
    async fn add(&self, collection: &CollectionHandle, records: Vec<IndexedRecord>) -> Result<()>;

    /// Up to `k` documents ordered by ascending distance to `vector`
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>>;

    async fn count(&self, collection: &CollectionHandle) -> Result<usize>;
}

/// Cosine distance in `[0, 2]`; vectors with zero norm are treated as orthogonal
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
