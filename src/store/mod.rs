//! Vector store: stable external IDs over the arena and the HNSW index.
//!
//! Composes the [`VectorArena`] (slot storage) and [`HnswGraph`] (ANN
//! index) behind memory UUIDs, and adds the warmup policy: below a
//! configurable index threshold the graph is bypassed entirely and
//! searches fall back to a linear scan, which is cheaper for tiny stores;
//! crossing the threshold bulk-inserts the deferred backlog.

use crate::arena::{ArenaError, SlotId, SlotMeta, VectorArena};
use crate::hnsw::{HnswConfig, HnswError, HnswGraph};
use crate::metric::DistanceKind;
use crate::types::MemoryType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Over-fetch multiplier when an indexed search carries filters; the
/// post-filter can discard most of the beam otherwise.
const FILTER_OVERFETCH: usize = 4;

/// Errors raised by vector-store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The arena has no free slot.
    #[error("vector store full")]
    Full,

    /// Vector length differs from the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Provided vector length.
        actual: usize,
    },

    /// The external ID is already present.
    #[error("duplicate id: {0}")]
    DuplicateId(Uuid),

    /// No vector is stored under the external ID.
    #[error("vector not found: {0}")]
    NotFound(Uuid),

    /// Arena-level failure.
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// Index-level failure.
    #[error(transparent)]
    Hnsw(#[from] HnswError),
}

/// Construction-time store configuration. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorStoreConfig {
    /// Byte budget for the arena, in mebibytes.
    pub max_memory_mb: usize,
    /// Vector dimensionality.
    pub dimensions: usize,
    /// HNSW parameters.
    pub hnsw: HnswConfig,
    /// Vector count below which the HNSW index is bypassed.
    pub index_threshold: usize,
}

impl VectorStoreConfig {
    /// Default configuration for a dimensionality: 64 MiB budget,
    /// default HNSW parameters, index threshold 100.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            max_memory_mb: 64,
            dimensions,
            hnsw: HnswConfig::new(dimensions as u32),
            index_threshold: 100,
        }
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// `HnswError::InvalidConfig` when the HNSW dimensionality disagrees
    /// with the store's, or the HNSW parameters are out of range.
    pub fn validate(&self) -> Result<(), HnswError> {
        if self.hnsw.dimensions as usize != self.dimensions {
            return Err(HnswError::InvalidConfig(format!(
                "hnsw dimensions {} != store dimensions {}",
                self.hnsw.dimensions, self.dimensions
            )));
        }
        if self.max_memory_mb == 0 {
            return Err(HnswError::InvalidConfig(
                "max_memory_mb must be > 0".to_string(),
            ));
        }
        self.hnsw.validate()
    }
}

/// Filter predicates applied to search results.
#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    /// Exact match on the owning persona.
    pub persona_id: Option<Uuid>,
    /// Exact match on the memory type.
    pub memory_type: Option<MemoryType>,
    /// Event timestamp must be `>=` this cutoff (epoch milliseconds).
    pub since_ms: Option<i64>,
}

impl SearchFilters {
    /// Restricts results to one persona.
    #[must_use]
    pub fn persona(persona_id: Uuid) -> Self {
        Self {
            persona_id: Some(persona_id),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.persona_id.is_none() && self.memory_type.is_none() && self.since_ms.is_none()
    }

    fn matches(&self, meta: &SlotMeta) -> bool {
        if let Some(persona) = self.persona_id {
            if meta.persona() != persona {
                return false;
            }
        }
        if let Some(ty) = self.memory_type {
            if meta.kind() != ty {
                return false;
            }
        }
        if let Some(cutoff) = self.since_ms {
            if meta.timestamp_ms < cutoff {
                return false;
            }
        }
        true
    }
}

/// Options for a similarity search.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Maximum results returned.
    pub limit: usize,
    /// Minimum similarity in `[0, 1]`.
    pub threshold: f32,
    /// Metadata predicates.
    pub filters: SearchFilters,
    /// When false, forces a linear scan even if the index is built.
    pub use_index: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.0,
            filters: SearchFilters::default(),
            use_index: true,
        }
    }
}

/// A scored search result.
#[derive(Clone, Debug)]
pub struct SearchHit {
    /// External memory ID.
    pub id: Uuid,
    /// Similarity in `[0, 1]` (metric-dependent mapping).
    pub similarity: f32,
    /// Inline slot metadata.
    pub meta: SlotMeta,
}

/// Fixed-capacity vector store addressed by memory UUID.
pub struct VectorStore {
    config: VectorStoreConfig,
    arena: VectorArena,
    graph: HnswGraph,
    id_to_slot: HashMap<Uuid, SlotId>,
    slot_to_id: Vec<Option<Uuid>>,
    /// Slots awaiting bulk insertion into the graph (warmup phase).
    backlog: Vec<SlotId>,
    /// Set once the backlog has been flushed into the graph.
    indexed: bool,
}

impl VectorStore {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// `StoreError::Hnsw` when the configuration is invalid.
    pub fn new(config: VectorStoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let arena = VectorArena::new(config.max_memory_mb, config.dimensions);
        let capacity = arena.capacity();
        let graph = HnswGraph::new(config.hnsw.clone())?;
        Ok(Self {
            config,
            arena,
            graph,
            id_to_slot: HashMap::new(),
            slot_to_id: vec![None; capacity],
            backlog: Vec::new(),
            indexed: false,
        })
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    /// Adds a vector under an external ID.
    ///
    /// Below the index threshold the vector only lands in the arena; once
    /// the live count reaches the threshold, the whole backlog is bulk
    /// inserted into the HNSW graph and subsequent adds go straight in.
    ///
    /// # Errors
    ///
    /// `Full`, `DimensionMismatch`, or `DuplicateId`.
    pub fn add(&mut self, id: Uuid, vector: &[f32], meta: SlotMeta) -> Result<(), StoreError> {
        if vector.len() != self.config.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }
        if self.id_to_slot.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }

        let slot = self.arena.allocate().map_err(|e| match e {
            ArenaError::Full => StoreError::Full,
            other => StoreError::Arena(other),
        })?;
        self.arena.write(slot, vector, meta)?;
        self.id_to_slot.insert(id, slot);
        self.slot_to_id[slot.index()] = Some(id);

        if self.indexed {
            self.graph.insert(slot, vector, &self.arena)?;
        } else {
            self.backlog.push(slot);
            if self.arena.len() >= self.config.index_threshold {
                self.build_index()?;
            }
        }
        Ok(())
    }

    /// Flushes the warmup backlog into the HNSW graph.
    fn build_index(&mut self) -> Result<(), StoreError> {
        let backlog = std::mem::take(&mut self.backlog);
        log::debug!("index threshold reached; bulk-inserting {} vectors", backlog.len());
        for slot in backlog {
            let vector = self.arena.vector(slot)?.to_vec();
            self.graph.insert(slot, &vector, &self.arena)?;
        }
        self.indexed = true;
        Ok(())
    }

    /// Returns the vector and metadata stored under `id`.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the ID is absent.
    pub fn get(&self, id: Uuid) -> Result<(&[f32], &SlotMeta), StoreError> {
        let slot = self.id_to_slot.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(self.arena.read(*slot)?)
    }

    /// Removes the vector stored under `id`.
    ///
    /// Tombstones the graph node (it keeps routing until its slot is
    /// reused), frees the arena slot, and drops both ID mappings.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the ID is absent.
    pub fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        let slot = self
            .id_to_slot
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        self.slot_to_id[slot.index()] = None;
        if self.indexed {
            self.graph.tombstone(slot);
        } else {
            self.backlog.retain(|&s| s != slot);
        }
        self.arena.free(slot)?;
        Ok(())
    }

    /// Similarity search.
    ///
    /// Uses the HNSW index when it is built and `use_index` is set;
    /// otherwise performs a linear scan over live slots. Results are
    /// filtered by threshold and predicates, sorted by similarity
    /// descending (ties broken by ID for determinism), and truncated.
    ///
    /// # Errors
    ///
    /// `StoreError::DimensionMismatch` on a wrong query length.
    pub fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.config.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: query.len(),
            });
        }
        if opts.limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = if self.indexed && opts.use_index {
            self.search_indexed(query, opts)?
        } else {
            self.search_linear(query, opts)
        };

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(opts.limit);
        Ok(hits)
    }

    fn search_indexed(
        &self,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let fetch = if opts.filters.is_empty() {
            opts.limit
        } else {
            opts.limit.saturating_mul(FILTER_OVERFETCH)
        };
        let ef = (self.config.hnsw.ef_search as usize).max(fetch);
        let neighbors = self.graph.search(query, fetch, Some(ef), &self.arena)?;

        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(id) = self.slot_to_id[neighbor.slot.index()] else {
                continue;
            };
            let meta = *self.arena.slot_meta(neighbor.slot)?;
            let similarity = self.distance_kind().similarity(neighbor.distance);
            if similarity >= opts.threshold && opts.filters.matches(&meta) {
                hits.push(SearchHit { id, similarity, meta });
            }
        }
        Ok(hits)
    }

    fn search_linear(&self, query: &[f32], opts: &SearchOptions) -> Vec<SearchHit> {
        let kind = self.distance_kind();
        let mut hits = Vec::new();
        for (slot, vector, meta) in self.arena.iter_live() {
            let Some(id) = self.slot_to_id[slot.index()] else {
                continue;
            };
            if !opts.filters.matches(meta) {
                continue;
            }
            let similarity = kind.similarity(kind.distance(query, vector));
            if similarity >= opts.threshold {
                hits.push(SearchHit {
                    id,
                    similarity,
                    meta: *meta,
                });
            }
        }
        hits
    }

    /// The configured distance strategy.
    #[must_use]
    pub fn distance_kind(&self) -> DistanceKind {
        self.config.hnsw.distance
    }

    /// True if a vector is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.id_to_slot.contains_key(&id)
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.id_to_slot.len()
    }

    /// Number of vectors inserted into the HNSW graph.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.graph.live_count()
    }

    /// True once the warmup backlog has been flushed into the graph.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Iterates all stored memories with their metadata.
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, &SlotMeta)> + '_ {
        self.arena.iter_live().filter_map(move |(slot, _, meta)| {
            self.slot_to_id[slot.index()].map(|id| (id, meta))
        })
    }

    /// Approximate resident bytes of arena and graph.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage() + self.graph.memory_usage()
    }
}
