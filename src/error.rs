//! Unified error hierarchy.
//!
//! Each component defines its own error enum; [`EngramError`] is the
//! top-level type observable at the engine boundary. Component errors are
//! folded into the boundary kinds via `From` impls so callers match on a
//! single set of distinct, documented variants.

use crate::arena::ArenaError;
use crate::graph::GraphError;
use crate::hnsw::HnswError;
use crate::metadata::MetadataError;
use crate::providers::{EmbedderError, ExtractorError};
use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// The top-level engine error.
///
/// Variants correspond one-to-one with the observable error kinds of the
/// engine contract. `NotFound` and `Unauthorized` are kept distinct here;
/// collapsing them into an opaque response is an API-boundary concern.
#[derive(Debug, Error)]
pub enum EngramError {
    /// A persona, memory, or entity does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// What kind of resource was looked up.
        resource: &'static str,
        /// The identifier that missed.
        id: Uuid,
    },

    /// The persona exists but does not belong to the caller's user.
    #[error("persona {persona_id} is not owned by the requesting user")]
    Unauthorized {
        /// The persona that was addressed.
        persona_id: Uuid,
    },

    /// Input outside its documented range, rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The vector arena is full.
    #[error("vector arena capacity exhausted")]
    CapacityExhausted,

    /// Vector length differs from the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// A memory with this ID already exists in the vector store.
    #[error("duplicate memory id: {0}")]
    DuplicateId(Uuid),

    /// An embedding or extraction provider surfaced an error.
    #[error("provider '{provider}' failed: {message}")]
    ProviderFailure {
        /// Name of the failing provider.
        provider: String,
        /// Provider-reported detail.
        message: String,
    },

    /// The metadata store surfaced an error.
    #[error("metadata store '{store}' failed: {message}")]
    StorageFailure {
        /// Label of the failing store.
        store: String,
        /// Backend-reported detail.
        message: String,
    },

    /// A concurrent modification was observed; the caller may retry.
    #[error("conflicting concurrent modification")]
    Conflict,

    /// The operation's cancellation token fired before completion.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngramError {
    /// Shorthand for a [`EngramError::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        EngramError::Validation(message.into())
    }
}

impl From<StoreError> for EngramError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Full => EngramError::CapacityExhausted,
            StoreError::DimensionMismatch { expected, actual } => {
                EngramError::DimensionMismatch { expected, actual }
            }
            StoreError::DuplicateId(id) => EngramError::DuplicateId(id),
            StoreError::NotFound(id) => EngramError::NotFound {
                resource: "memory",
                id,
            },
            StoreError::Arena(e) => e.into(),
            StoreError::Hnsw(e) => e.into(),
        }
    }
}

impl From<ArenaError> for EngramError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::Full => EngramError::CapacityExhausted,
            ArenaError::DimensionMismatch { expected, actual } => {
                EngramError::DimensionMismatch { expected, actual }
            }
            ArenaError::InvalidSlot(slot) => {
                EngramError::Validation(format!("invalid arena slot {slot}"))
            }
        }
    }
}

impl From<HnswError> for EngramError {
    fn from(err: HnswError) -> Self {
        match err {
            HnswError::DimensionMismatch { expected, actual } => {
                EngramError::DimensionMismatch { expected, actual }
            }
            HnswError::InvalidConfig(msg) => EngramError::Validation(msg),
            HnswError::NodeOutOfBounds(slot) => {
                EngramError::Validation(format!("hnsw node {slot} out of bounds"))
            }
        }
    }
}

impl From<GraphError> for EngramError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Validation(msg) => EngramError::Validation(msg),
            GraphError::EntityNotFound { persona_id, .. } => EngramError::NotFound {
                resource: "entity",
                id: persona_id,
            },
        }
    }
}

impl From<EmbedderError> for EngramError {
    fn from(err: EmbedderError) -> Self {
        EngramError::ProviderFailure {
            provider: err.provider().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ExtractorError> for EngramError {
    fn from(err: ExtractorError) -> Self {
        EngramError::ProviderFailure {
            provider: "graph-extractor".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<MetadataError> for EngramError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(id) => EngramError::NotFound {
                resource: "metadata record",
                id,
            },
            MetadataError::Conflict(_) => EngramError::Conflict,
            MetadataError::Backend { store, message } => {
                EngramError::StorageFailure { store, message }
            }
        }
    }
}
