//! External collaborator interfaces: embedding and graph extraction.
//!
//! The engine consumes these as `Arc<dyn ...>` trait objects; concrete
//! implementations (remote API clients, in-process models) live outside
//! the core. Both are suspension points under the concurrency model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Options for one embedding request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbedOptions {
    /// Model override; providers fall back to their default.
    pub model: Option<String>,
    /// Requested output dimensionality, for providers that support it.
    pub dimensions: Option<usize>,
    /// Ask the provider for unit-length output. The store assumes unit
    /// vectors under the cosine metric and never re-normalizes.
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            model: None,
            dimensions: None,
            normalize: true,
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    /// Tokens consumed by the request.
    pub tokens: u32,
}

/// A produced embedding.
#[derive(Clone, Debug)]
pub struct Embedding {
    /// The dense vector.
    pub vector: Vec<f32>,
    /// Model that produced it.
    pub model: String,
    /// Usage accounting.
    pub usage: EmbeddingUsage,
}

/// Provider health report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbedderHealth {
    /// Free-form status, "ok" when healthy.
    pub status: String,
    /// Output dimensionality of the default model.
    pub dimensions: usize,
}

/// Errors surfaced by embedding providers.
#[derive(Debug, Clone, Error)]
pub enum EmbedderError {
    /// The provider is unreachable or returned a transport error.
    #[error("provider '{provider}' unavailable: {message}")]
    ProviderUnavailable {
        /// Provider name.
        provider: String,
        /// Transport-level detail.
        message: String,
    },

    /// The input exceeds the provider's context limit.
    #[error("text too long for provider '{provider}': {length} > {max}")]
    TextTooLong {
        /// Provider name.
        provider: String,
        /// Input length.
        length: usize,
        /// Provider limit.
        max: usize,
    },

    /// The request options are invalid for this provider.
    #[error("invalid config for provider '{provider}': {message}")]
    InvalidConfig {
        /// Provider name.
        provider: String,
        /// Detail.
        message: String,
    },
}

impl EmbedderError {
    /// The provider the error originates from.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            EmbedderError::ProviderUnavailable { provider, .. }
            | EmbedderError::TextTooLong { provider, .. }
            | EmbedderError::InvalidConfig { provider, .. } => provider,
        }
    }
}

/// Maps text to fixed-dimension dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text.
    async fn embed(&self, text: &str, opts: &EmbedOptions) -> Result<Embedding, EmbedderError>;

    /// Embeds a batch of texts.
    ///
    /// The default implementation loops over [`Embedder::embed`];
    /// providers with a batch endpoint should override it.
    async fn embed_batch(
        &self,
        texts: &[String],
        opts: &EmbedOptions,
    ) -> Result<Vec<Embedding>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, opts).await?);
        }
        Ok(out)
    }

    /// Reports provider health and default dimensionality.
    async fn health_check(&self) -> Result<EmbedderHealth, EmbedderError>;
}

/// An entity produced by extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Surface name.
    pub name: String,
    /// Open-vocabulary type tag.
    pub entity_type: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// A relationship produced by extraction. Endpoints reference entity
/// names within the same extraction result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Source entity name.
    pub source: String,
    /// Target entity name.
    pub target: String,
    /// Open-vocabulary relationship type.
    pub rel_type: String,
    /// Strength in `[0, 1]`.
    pub strength: f32,
}

/// Extraction output for one text.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractedGraph {
    /// Entities found in the text.
    pub entities: Vec<ExtractedEntity>,
    /// Relationships among those entities.
    pub relationships: Vec<ExtractedRelationship>,
}

/// Context handed to the extractor with each request.
#[derive(Clone, Copy, Debug)]
pub struct ExtractionContext {
    /// Persona the memory belongs to.
    pub persona_id: Uuid,
    /// The memory being ingested.
    pub memory_id: Uuid,
}

/// Extraction failure. Extractor errors never fail ingestion; the memory
/// is indexed without graph content and the failure is logged.
#[derive(Debug, Clone, Error)]
#[error("extraction failed: {0}")]
pub struct ExtractorError(pub String);

/// Turns free text into entities and relationships.
#[async_trait]
pub trait GraphExtractor: Send + Sync {
    /// Extracts graph content from one text.
    async fn extract(
        &self,
        text: &str,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedGraph, ExtractorError>;
}
