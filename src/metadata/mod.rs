//! Durable metadata records and the store interface.
//!
//! The metadata store is the engine's only durable collaborator: it
//! mirrors the in-memory vector index so a cold start can rebuild the
//! index from stored content, and it is the sole home of original memory
//! text (the vector arena never holds content). [`MemoryMetadataStore`]
//! is the in-memory reference implementation used by tests and
//! single-process deployments.

mod record;
mod store;

pub use record::{MemoryCustomMetadata, VectorMetadataRecord};
pub use store::MemoryMetadataStore;

use crate::persona::PersonaRecord;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by metadata stores.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// No record under this ID.
    #[error("metadata record not found: {0}")]
    NotFound(Uuid),

    /// A uniqueness or concurrency conflict.
    #[error("metadata conflict: {0}")]
    Conflict(String),

    /// Backend failure, wrapped with a store label.
    #[error("metadata backend '{store}' failed: {message}")]
    Backend {
        /// Store label.
        store: String,
        /// Backend detail.
        message: String,
    },
}

/// Query for [`MetadataStore::search_vector_metadata`].
#[derive(Clone, Debug, Default)]
pub struct MetadataQuery {
    /// Restrict to one persona.
    pub persona_id: Option<Uuid>,
    /// Maximum records returned.
    pub limit: Option<usize>,
    /// Records to skip, for batched iteration.
    pub offset: usize,
}

/// Durable key→record store for memory metadata and personas.
///
/// Every method is a suspension point; implementations must be safe to
/// call concurrently.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persists a metadata record.
    ///
    /// # Errors
    ///
    /// `Conflict` when the ID already exists.
    async fn insert_vector_metadata(
        &self,
        record: VectorMetadataRecord,
    ) -> Result<(), MetadataError>;

    /// Fetches a record by memory ID.
    async fn get_vector_metadata(
        &self,
        id: Uuid,
    ) -> Result<Option<VectorMetadataRecord>, MetadataError>;

    /// Deletes a record; returns whether it existed.
    async fn delete_vector_metadata(&self, id: Uuid) -> Result<bool, MetadataError>;

    /// Lists records matching the query in stable (creation, id) order.
    async fn search_vector_metadata(
        &self,
        query: &MetadataQuery,
    ) -> Result<Vec<VectorMetadataRecord>, MetadataError>;

    /// Persists a persona.
    ///
    /// # Errors
    ///
    /// `Conflict` when the ID already exists.
    async fn insert_persona(&self, record: PersonaRecord) -> Result<(), MetadataError>;

    /// Fetches a persona by ID.
    async fn get_persona(&self, id: Uuid) -> Result<Option<PersonaRecord>, MetadataError>;

    /// Lists a user's personas, optionally including soft-deleted ones.
    async fn list_personas(
        &self,
        user_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PersonaRecord>, MetadataError>;

    /// Replaces a persona record.
    ///
    /// # Errors
    ///
    /// `NotFound` when the persona does not exist.
    async fn update_persona(&self, record: PersonaRecord) -> Result<(), MetadataError>;

    /// Soft-deletes a persona (clears its active flag).
    ///
    /// # Errors
    ///
    /// `NotFound` when the persona does not exist.
    async fn delete_persona(&self, id: Uuid) -> Result<(), MetadataError>;
}
