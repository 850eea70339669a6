//! Shared test doubles: a deterministic embedder, a table-driven graph
//! extractor, and manager construction helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use engram::manager::{Clock, ManualClock, MemoryManager};
use engram::metadata::{MemoryMetadataStore, MetadataStore};
use engram::persona::PersonaConfig;
use engram::providers::{
    EmbedOptions, Embedder, EmbedderError, EmbedderHealth, Embedding, EmbeddingUsage,
    ExtractedEntity, ExtractedGraph, ExtractedRelationship, ExtractionContext, ExtractorError,
    GraphExtractor,
};
use engram::store::VectorStoreConfig;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deterministic bag-of-words embedder.
///
/// Tokens hash into buckets of a fixed-dimension vector which is then
/// unit-normalized, so shared vocabulary between two texts yields high
/// cosine similarity and identical text embeds identically.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dims;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str, _opts: &EmbedOptions) -> Result<Embedding, EmbedderError> {
        Ok(Embedding {
            vector: self.embed_text(text),
            model: "hash-bow".to_string(),
            usage: EmbeddingUsage {
                tokens: text.split_whitespace().count() as u32,
            },
        })
    }

    async fn health_check(&self) -> Result<EmbedderHealth, EmbedderError> {
        Ok(EmbedderHealth {
            status: "ok".to_string(),
            dimensions: self.dims,
        })
    }
}

/// Embedder that can be switched into a failing state.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    failing: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dims),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str, opts: &EmbedOptions) -> Result<Embedding, EmbedderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbedderError::ProviderUnavailable {
                provider: "hash-bow".to_string(),
                message: "simulated outage".to_string(),
            });
        }
        self.inner.embed(text, opts).await
    }

    async fn health_check(&self) -> Result<EmbedderHealth, EmbedderError> {
        self.inner.health_check().await
    }
}

/// Extractor that looks extraction results up by content substring.
#[derive(Default)]
pub struct TableExtractor {
    by_content: HashMap<String, ExtractedGraph>,
}

impl TableExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, content_key: &str, graph: ExtractedGraph) -> Self {
        self.by_content.insert(content_key.to_string(), graph);
        self
    }
}

#[async_trait]
impl GraphExtractor for TableExtractor {
    async fn extract(
        &self,
        text: &str,
        _ctx: &ExtractionContext,
    ) -> Result<ExtractedGraph, ExtractorError> {
        Ok(self
            .by_content
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, graph)| graph.clone())
            .unwrap_or_default())
    }
}

/// Extractor that always fails; ingestion must still succeed.
pub struct FailingExtractor;

#[async_trait]
impl GraphExtractor for FailingExtractor {
    async fn extract(
        &self,
        _text: &str,
        _ctx: &ExtractionContext,
    ) -> Result<ExtractedGraph, ExtractorError> {
        Err(ExtractorError("simulated extractor failure".to_string()))
    }
}

pub fn entity(name: &str, entity_type: &str, confidence: f32) -> ExtractedEntity {
    ExtractedEntity {
        name: name.to_string(),
        entity_type: entity_type.to_string(),
        confidence,
    }
}

pub fn relationship(source: &str, target: &str, rel_type: &str, strength: f32) -> ExtractedRelationship {
    ExtractedRelationship {
        source: source.to_string(),
        target: target.to_string(),
        rel_type: rel_type.to_string(),
        strength,
    }
}

pub const TEST_DIMS: usize = 256;

pub fn test_store_config() -> VectorStoreConfig {
    let mut config = VectorStoreConfig::new(TEST_DIMS);
    config.max_memory_mb = 4;
    // Small enough that lifecycle tests exercise the indexed path too.
    config.index_threshold = 4;
    config
}

pub struct TestHarness {
    pub manager: MemoryManager,
    pub metadata: Arc<MemoryMetadataStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> TestHarness {
    harness_with(test_store_config(), None)
}

pub fn harness_with(
    config: VectorStoreConfig,
    extractor: Option<Arc<dyn GraphExtractor>>,
) -> TestHarness {
    let metadata = Arc::new(MemoryMetadataStore::new());
    let clock = Arc::new(ManualClock::new(1_000_000));
    let mut manager = MemoryManager::new(
        config,
        Arc::new(HashEmbedder::new(TEST_DIMS)),
        metadata.clone() as Arc<dyn MetadataStore>,
    )
    .expect("valid test config")
    .with_clock(clock.clone() as Arc<dyn Clock>);
    if let Some(extractor) = extractor {
        manager = manager.with_extractor(extractor);
    }
    TestHarness {
        manager,
        metadata,
        clock,
    }
}

pub fn persona_config(max_memory_size: usize, memory_decay_ms: i64) -> PersonaConfig {
    PersonaConfig {
        max_memory_size,
        memory_decay_ms,
        ..PersonaConfig::default()
    }
}
