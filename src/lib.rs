//! # Engram
//!
//! Persona-scoped hybrid memory engine for conversational agents.
//!
//! For each persona (an isolated agent identity owned by a user), the
//! engine ingests free-text memories, embeds them into dense vectors,
//! indexes them in a fixed-capacity HNSW vector store, extracts entities
//! and relationships into a per-persona knowledge graph, and answers
//! relevance queries by fusing vector similarity with graph expansion.
//! Capacity eviction and time-based decay keep each persona's memory
//! bounded.
//!
//! ## Architecture
//!
//! - [`arena`] — fixed-byte-budget slab of vector slots with inline
//!   metadata and free-list allocation.
//! - [`hnsw`] — multi-layer proximity graph over slot IDs: insert,
//!   tombstone delete, k-NN search.
//! - [`store`] — stable memory UUIDs over arena + index, with an
//!   index-threshold warmup that linearly scans small stores.
//! - [`graph`] — per-persona entity/relationship tables with bounded
//!   neighborhood traversal.
//! - [`hybrid`] — the fusion pipeline combining both retrieval paths.
//! - [`manager`] — persona lifecycle, ingestion, retrieval, eviction,
//!   expiry, and cold-start reload.
//! - [`metadata`] — the durable record store interface the engine
//!   rebuilds itself from after a restart.
//!
//! External collaborators (embedding providers, graph extractors,
//! durable metadata backends) are consumed through the traits in
//! [`providers`] and [`metadata`].
//!
//! ## Example
//!
//! ```no_run
//! use engram::manager::MemoryManager;
//! use engram::metadata::MemoryMetadataStore;
//! use engram::persona::PersonaConfig;
//! use engram::store::VectorStoreConfig;
//! use engram::types::{MemoryContext, MemoryType};
//! use engram::RetrieveOptions;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use uuid::Uuid;
//!
//! # async fn demo(embedder: Arc<dyn engram::providers::Embedder>) -> Result<(), engram::EngramError> {
//! let manager = MemoryManager::new(
//!     VectorStoreConfig::new(384),
//!     embedder,
//!     Arc::new(MemoryMetadataStore::new()),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! let persona = manager
//!     .create_persona(Uuid::new_v4(), PersonaConfig::default())
//!     .await?;
//! manager
//!     .add_memory(
//!         persona.id,
//!         "The user's favorite color is green.",
//!         MemoryType::Preference,
//!         MemoryContext::default(),
//!         &cancel,
//!     )
//!     .await?;
//! let memories = manager
//!     .retrieve_relevant_memories(
//!         persona.id,
//!         "What is the user's favorite color?",
//!         &RetrieveOptions::default(),
//!         &cancel,
//!     )
//!     .await?;
//! assert!(!memories.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

/// Vector arena: slot storage with inline metadata.
pub mod arena;

/// Unified error handling.
pub mod error;

/// Per-persona knowledge-graph store.
pub mod graph;

/// HNSW index.
pub mod hnsw;

/// Hybrid vector + graph retrieval.
pub mod hybrid;

/// Persona lifecycle and memory orchestration.
pub mod manager;

/// Durable metadata records and store interface.
pub mod metadata;

/// Distance metrics.
pub mod metric;

/// Persona records and configuration.
pub mod persona;

/// External collaborator interfaces.
pub mod providers;

/// Vector store over arena and index.
pub mod store;

/// Core domain enums.
pub mod types;

pub use error::EngramError;
pub use hybrid::{HybridHit, HybridSearchOptions};
pub use manager::{MemoryManager, RetrieveOptions, RetrievedMemory};
pub use metric::DistanceKind;
pub use store::{SearchFilters, SearchHit, SearchOptions, VectorStoreConfig};

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub fn version() -> &'static str {
    VERSION
}
