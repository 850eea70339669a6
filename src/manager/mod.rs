//! Memory manager: persona lifecycle and memory orchestration.
//!
//! Owns the "embed → index → persist → extract" ingestion sequence, the
//! retrieval pipeline, capacity eviction, time-based expiry, and the
//! cold-start reload. The in-memory stores live behind a synchronous
//! `RwLock` that is never held across a suspension point; per-persona
//! async mutexes serialize writers while readers proceed in parallel.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::arena::SlotMeta;
use crate::error::EngramError;
use crate::graph::GraphStore;
use crate::hybrid::{hybrid_search, HybridSearchOptions};
use crate::metadata::{
    MemoryCustomMetadata, MetadataQuery, MetadataStore, VectorMetadataRecord,
};
use crate::persona::{PersonaConfig, PersonaRecord};
use crate::providers::{EmbedOptions, Embedder, ExtractionContext, GraphExtractor};
use crate::store::{VectorStore, VectorStoreConfig};
use crate::types::{MemoryContext, MemoryType, Speaker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Batch size for the cold-start reload.
const RELOAD_BATCH: usize = 50;

/// Weight of the recency term in the eviction score.
const EVICTION_RECENCY_WEIGHT: f32 = 0.3;

/// Horizon of the eviction recency term, in days.
const EVICTION_RECENCY_HORIZON_DAYS: f32 = 30.0;

const MS_PER_DAY: f32 = 86_400_000.0;

/// The in-memory engine state guarded by one reader-writer lock.
struct EngineState {
    store: VectorStore,
    graph: GraphStore,
}

/// Retrieval options at the manager surface.
///
/// `threshold` defaults to the persona's configured retrieval threshold
/// when unset; the remaining knobs mirror [`HybridSearchOptions`].
#[derive(Clone, Debug)]
pub struct RetrieveOptions {
    /// Maximum results returned.
    pub limit: usize,
    /// Minimum vector similarity; persona default when `None`.
    pub threshold: Option<f32>,
    /// Restrict to these memory types.
    pub memory_types: Option<Vec<MemoryType>>,
    /// Drop memories older than this, in milliseconds.
    pub max_age_ms: Option<i64>,
    /// Expand through the knowledge graph.
    pub use_graph_expansion: bool,
    /// Graph traversal depth.
    pub graph_depth: usize,
    /// Fusion weight of the graph score.
    pub graph_weight: f32,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        let hybrid = HybridSearchOptions::default();
        Self {
            limit: hybrid.limit,
            threshold: None,
            memory_types: None,
            max_age_ms: None,
            use_graph_expansion: hybrid.use_graph_expansion,
            graph_depth: hybrid.graph_depth,
            graph_weight: hybrid.graph_weight,
        }
    }
}

/// A retrieved memory, enriched with its original content.
#[derive(Clone, Debug)]
pub struct RetrievedMemory {
    /// Memory ID.
    pub id: Uuid,
    /// Original text from the metadata store.
    pub content: String,
    /// Vector similarity in `[0, 1]`.
    pub similarity: f32,
    /// Fused ranking score.
    pub final_score: f32,
    /// Reached only through graph expansion.
    pub graph_expanded: bool,
    /// Vector hit additionally supported by the graph.
    pub graph_boosted: bool,
    /// Memory classification.
    pub memory_type: MemoryType,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Event timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Conversation grouping, if any.
    pub conversation_id: Option<Uuid>,
    /// Speaker tag, if any.
    pub speaker: Option<Speaker>,
}

/// One turn of persisted conversation history.
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    /// Memory ID backing the turn.
    pub memory_id: Uuid,
    /// Turn text.
    pub content: String,
    /// Who spoke.
    pub speaker: Option<Speaker>,
    /// Event timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Engine-level counters.
#[derive(Clone, Copy, Debug)]
pub struct EngineStats {
    /// Memories currently in the vector store.
    pub vector_count: usize,
    /// Vectors inserted into the HNSW graph.
    pub indexed_count: usize,
    /// Personas known to this manager instance.
    pub persona_count: usize,
    /// Approximate resident bytes of the in-memory stores.
    pub memory_usage: usize,
}

/// Persona-scoped memory engine.
pub struct MemoryManager {
    state: StdRwLock<EngineState>,
    /// Persona cache; misses fall back to the metadata store.
    personas: StdRwLock<HashMap<Uuid, PersonaRecord>>,
    /// Per-persona write serialization for `add_memory`.
    write_guards: StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    embedder: Arc<dyn Embedder>,
    extractor: Option<Arc<dyn GraphExtractor>>,
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
}

impl MemoryManager {
    /// Creates a manager over the given collaborators.
    ///
    /// # Errors
    ///
    /// Propagates configuration validation failures.
    pub fn new(
        config: VectorStoreConfig,
        embedder: Arc<dyn Embedder>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self, EngramError> {
        let store = VectorStore::new(config)?;
        Ok(Self {
            state: StdRwLock::new(EngineState {
                store,
                graph: GraphStore::new(),
            }),
            personas: StdRwLock::new(HashMap::new()),
            write_guards: StdMutex::new(HashMap::new()),
            embedder,
            extractor: None,
            metadata,
            clock: Arc::new(SystemClock),
        })
    }

    /// Attaches a graph extractor; without one, memories are indexed
    /// without graph content.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn GraphExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Overrides the wall clock (tests drive decay with a manual clock).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // =========================================================================
    // Persona lifecycle
    // =========================================================================

    /// Creates and persists a persona for a user.
    ///
    /// # Errors
    ///
    /// `Validation` on out-of-range configuration; `StorageFailure` when
    /// persistence fails.
    pub async fn create_persona(
        &self,
        user_id: Uuid,
        config: PersonaConfig,
    ) -> Result<PersonaRecord, EngramError> {
        config.validate()?;
        let record = PersonaRecord::new(user_id, config, self.clock.now_ms());
        self.metadata.insert_persona(record.clone()).await?;
        self.cache_persona(record.clone());
        log::debug!("created persona {} for user {user_id}", record.id);
        Ok(record)
    }

    /// Fetches a persona, enforcing ownership.
    ///
    /// # Errors
    ///
    /// `NotFound` when absent or soft-deleted; `Unauthorized` when owned
    /// by another user.
    pub async fn get_persona(
        &self,
        persona_id: Uuid,
        user_id: Uuid,
    ) -> Result<PersonaRecord, EngramError> {
        let record = self.persona(persona_id).await?;
        self.authorize(&record, user_id)?;
        Ok(record)
    }

    /// Lists a user's personas.
    ///
    /// # Errors
    ///
    /// `StorageFailure` when the metadata store fails.
    pub async fn list_personas(
        &self,
        user_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PersonaRecord>, EngramError> {
        Ok(self.metadata.list_personas(user_id, include_inactive).await?)
    }

    /// Replaces a persona's configuration.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `Validation`.
    pub async fn update_persona(
        &self,
        persona_id: Uuid,
        user_id: Uuid,
        config: PersonaConfig,
    ) -> Result<PersonaRecord, EngramError> {
        config.validate()?;
        let mut record = self.persona(persona_id).await?;
        self.authorize(&record, user_id)?;
        record.config = config;
        self.metadata.update_persona(record.clone()).await?;
        self.cache_persona(record.clone());
        Ok(record)
    }

    /// Soft-deletes a persona. Its memories stay in place but the
    /// persona no longer accepts operations.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Unauthorized`.
    pub async fn delete_persona(&self, persona_id: Uuid, user_id: Uuid) -> Result<(), EngramError> {
        let mut record = self.persona(persona_id).await?;
        self.authorize(&record, user_id)?;
        self.metadata.delete_persona(persona_id).await?;
        record.active = false;
        self.cache_persona(record);
        Ok(())
    }

    fn authorize(&self, record: &PersonaRecord, user_id: Uuid) -> Result<(), EngramError> {
        if record.user_id != user_id {
            return Err(EngramError::Unauthorized {
                persona_id: record.id,
            });
        }
        Ok(())
    }

    /// Resolves an active persona from cache, falling back to the store.
    async fn persona(&self, persona_id: Uuid) -> Result<PersonaRecord, EngramError> {
        if let Some(record) = self
            .personas
            .read()
            .expect("persona cache lock poisoned")
            .get(&persona_id)
        {
            if !record.active {
                return Err(EngramError::NotFound {
                    resource: "persona",
                    id: persona_id,
                });
            }
            return Ok(record.clone());
        }
        let record = self
            .metadata
            .get_persona(persona_id)
            .await?
            .filter(|r| r.active)
            .ok_or(EngramError::NotFound {
                resource: "persona",
                id: persona_id,
            })?;
        self.cache_persona(record.clone());
        Ok(record)
    }

    fn cache_persona(&self, record: PersonaRecord) {
        self.personas
            .write()
            .expect("persona cache lock poisoned")
            .insert(record.id, record);
    }

    fn write_guard(&self, persona_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.write_guards
            .lock()
            .expect("write guard map poisoned")
            .entry(persona_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingests a memory: embed, index, persist, extract, enforce limits.
    ///
    /// Concurrent calls for the same persona serialize through its write
    /// guard, making each add linearizable with respect to searches. A
    /// failure (or cancellation) after the vector insert rolls the vector
    /// back; extractor failures are logged and swallowed.
    ///
    /// # Errors
    ///
    /// `Validation`, `NotFound`, `CapacityExhausted`, `ProviderFailure`,
    /// `StorageFailure`, or `Cancelled`.
    pub async fn add_memory(
        &self,
        persona_id: Uuid,
        content: &str,
        memory_type: MemoryType,
        ctx: MemoryContext,
        cancel: &CancellationToken,
    ) -> Result<Uuid, EngramError> {
        if content.trim().is_empty() {
            return Err(EngramError::validation("memory content is empty"));
        }
        if let Some(importance) = ctx.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(EngramError::validation(format!(
                    "importance {importance} outside [0, 1]"
                )));
            }
        }
        let persona = self.persona(persona_id).await?;

        let guard = self.write_guard(persona_id);
        let _serialized = guard.lock().await;
        check_cancelled(cancel)?;

        let embedding = self
            .embedder
            .embed(
                content,
                &EmbedOptions {
                    model: Some(persona.config.embedding_model.clone()),
                    ..EmbedOptions::default()
                },
            )
            .await?;
        check_cancelled(cancel)?;

        let memory_id = Uuid::new_v4();
        let now = self.clock.now_ms();
        let timestamp = ctx.timestamp_ms.unwrap_or(now);
        let importance = ctx.importance.unwrap_or(0.5);
        let meta = SlotMeta::new(
            persona_id,
            ctx.conversation_id,
            memory_type,
            ctx.speaker,
            importance,
            now,
            timestamp,
        );

        {
            let mut state = self.state.write().expect("engine state lock poisoned");
            state.store.add(memory_id, &embedding.vector, meta)?;
        }

        let record = VectorMetadataRecord {
            id: memory_id,
            dimensions: embedding.vector.len(),
            persona_id: Some(persona_id),
            content_type: "text/plain".to_string(),
            source: "memory-manager".to_string(),
            tags: vec!["memory".to_string()],
            created_at: now,
            custom_metadata: MemoryCustomMetadata {
                original_content: content.to_string(),
                memory_type,
                importance,
                conversation_id: ctx.conversation_id,
                speaker: ctx.speaker,
                timestamp,
                embedding_provider: persona.config.embedding_provider.clone(),
                embedding_model: embedding.model.clone(),
                context: ctx.extra.clone(),
            },
        };

        let persisted = if cancel.is_cancelled() {
            Err(EngramError::Cancelled)
        } else {
            self.metadata
                .insert_vector_metadata(record)
                .await
                .map_err(EngramError::from)
        };
        if let Err(err) = persisted {
            // Compensating delete: the vector must not outlive its record.
            self.rollback_vector(memory_id);
            return Err(err);
        }

        if let Some(extractor) = &self.extractor {
            self.extract_graph(extractor, persona_id, memory_id, content)
                .await;
        }

        self.enforce_memory_limits(persona_id).await?;
        Ok(memory_id)
    }

    fn rollback_vector(&self, memory_id: Uuid) {
        let mut state = self.state.write().expect("engine state lock poisoned");
        if let Err(err) = state.store.delete(memory_id) {
            log::warn!("rollback of vector {memory_id} failed: {err}");
        }
    }

    /// Runs extraction and applies the result. Never fails the caller.
    async fn extract_graph(
        &self,
        extractor: &Arc<dyn GraphExtractor>,
        persona_id: Uuid,
        memory_id: Uuid,
        content: &str,
    ) {
        let ctx = ExtractionContext {
            persona_id,
            memory_id,
        };
        let extracted = match extractor.extract(content, &ctx).await {
            Ok(extracted) => extracted,
            Err(err) => {
                log::warn!("graph extraction failed for memory {memory_id}: {err}");
                return;
            }
        };

        let mut state = self.state.write().expect("engine state lock poisoned");
        let mut by_name = HashMap::new();
        for entity in &extracted.entities {
            match state.graph.upsert_entity(
                persona_id,
                &entity.name,
                &entity.entity_type,
                memory_id,
                entity.confidence.clamp(0.0, 1.0),
            ) {
                Ok(id) => {
                    by_name.insert(normalize_entity_key(&entity.name), id);
                }
                Err(err) => {
                    log::warn!("skipping extracted entity '{}': {err}", entity.name);
                }
            }
        }
        for rel in &extracted.relationships {
            let (Some(&source), Some(&target)) = (
                by_name.get(&normalize_entity_key(&rel.source)),
                by_name.get(&normalize_entity_key(&rel.target)),
            ) else {
                log::debug!(
                    "relationship {} -> {} references unknown entities; skipped",
                    rel.source,
                    rel.target
                );
                continue;
            };
            if let Err(err) = state.graph.upsert_relationship(
                persona_id,
                source,
                target,
                &rel.rel_type,
                rel.strength.clamp(0.0, 1.0),
                memory_id,
            ) {
                log::warn!("skipping extracted relationship '{}': {err}", rel.rel_type);
            }
        }
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Retrieves relevant memories for a query, enriched with content.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`, `ProviderFailure`, `StorageFailure`, or
    /// `Cancelled`.
    pub async fn retrieve_relevant_memories(
        &self,
        persona_id: Uuid,
        query: &str,
        opts: &RetrieveOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedMemory>, EngramError> {
        let persona = self.persona(persona_id).await?;
        let hybrid_opts = HybridSearchOptions {
            limit: opts.limit,
            threshold: opts
                .threshold
                .unwrap_or(persona.config.memory_retrieval_threshold),
            memory_types: opts.memory_types.clone(),
            max_age_ms: opts.max_age_ms,
            use_graph_expansion: opts.use_graph_expansion,
            graph_depth: opts.graph_depth,
            graph_weight: opts.graph_weight,
        };
        hybrid_opts.validate().map_err(EngramError::Validation)?;
        check_cancelled(cancel)?;

        let embedding = self.embedder.embed(query, &EmbedOptions::default()).await?;
        check_cancelled(cancel)?;

        let hits = {
            let state = self.state.read().expect("engine state lock poisoned");
            hybrid_search(
                &state.store,
                &state.graph,
                persona_id,
                &embedding.vector,
                self.clock.now_ms(),
                &hybrid_opts,
            )?
        };

        // Batched enrichment with original content.
        let fetches = hits
            .iter()
            .map(|hit| self.metadata.get_vector_metadata(hit.id));
        let records = futures::future::join_all(fetches).await;

        let mut results = Vec::with_capacity(hits.len());
        for (hit, record) in hits.into_iter().zip(records) {
            let record = match record {
                Ok(Some(record)) => record,
                Ok(None) => {
                    log::warn!("memory {} indexed but missing from metadata store", hit.id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            results.push(RetrievedMemory {
                id: hit.id,
                content: record.custom_metadata.original_content,
                similarity: hit.vector_score,
                final_score: hit.final_score,
                graph_expanded: hit.graph_expanded,
                graph_boosted: hit.graph_boosted,
                memory_type: hit.meta.kind(),
                importance: hit.meta.importance,
                timestamp_ms: hit.meta.timestamp_ms,
                conversation_id: hit.meta.conversation(),
                speaker: hit.meta.speaker_tag(),
            });
        }
        Ok(results)
    }

    /// Removes one memory, cascading to vector, metadata, and mentions.
    ///
    /// # Errors
    ///
    /// `NotFound` when the memory does not exist under this persona.
    pub async fn remove_memory(&self, persona_id: Uuid, memory_id: Uuid) -> Result<(), EngramError> {
        {
            let mut state = self.state.write().expect("engine state lock poisoned");
            let owner = state.store.get(memory_id).map(|(_, meta)| meta.persona());
            match owner {
                Ok(owner) if owner == persona_id => {}
                _ => {
                    return Err(EngramError::NotFound {
                        resource: "memory",
                        id: memory_id,
                    })
                }
            }
            state.store.delete(memory_id)?;
            state.graph.remove_memory_mentions(persona_id, memory_id);
        }
        self.metadata.delete_vector_metadata(memory_id).await?;
        Ok(())
    }

    // =========================================================================
    // Capacity and decay
    // =========================================================================

    /// Evicts the lowest-scoring memories above the persona's capacity.
    ///
    /// Works on a snapshot: concurrent adds may transiently push the
    /// count above the bound, reconverging on the next add. The eviction
    /// score is `importance + 0.3 * (1 - age_days / 30)` with the
    /// recency term clamped to `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Propagates cascade failures from [`MemoryManager::remove_memory`].
    pub async fn enforce_memory_limits(&self, persona_id: Uuid) -> Result<usize, EngramError> {
        let persona = self.persona(persona_id).await?;
        let now = self.clock.now_ms();

        let snapshot: Vec<(Uuid, f32, i64)> = {
            let state = self.state.read().expect("engine state lock poisoned");
            state
                .store
                .iter()
                .filter(|(_, meta)| meta.persona() == persona_id)
                .map(|(id, meta)| (id, meta.importance, meta.timestamp_ms))
                .collect()
        };

        let max = persona.config.max_memory_size;
        if snapshot.len() <= max {
            return Ok(0);
        }

        let mut scored: Vec<(f32, Uuid)> = snapshot
            .into_iter()
            .map(|(id, importance, timestamp)| {
                let age_days = ((now - timestamp).max(0) as f32) / MS_PER_DAY;
                let recency =
                    (1.0 - age_days / EVICTION_RECENCY_HORIZON_DAYS).clamp(0.0, 1.0);
                (importance + EVICTION_RECENCY_WEIGHT * recency, id)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let surplus = scored.len() - max;
        let mut evicted = 0;
        for (_, id) in scored.into_iter().take(surplus) {
            match self.remove_memory(persona_id, id).await {
                Ok(()) => evicted += 1,
                // A concurrent delete got there first; the goal state holds.
                Err(EngramError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if evicted > 0 {
            log::debug!("evicted {evicted} memories for persona {persona_id} (capacity {max})");
        }
        Ok(evicted)
    }

    /// Deletes memories older than each persona's decay window, then
    /// sweeps orphaned graph entities. Personas are processed
    /// sequentially to bound peak memory. Returns the number of
    /// memories removed.
    ///
    /// # Errors
    ///
    /// Propagates cascade failures.
    pub async fn cleanup_expired_memories(&self) -> Result<usize, EngramError> {
        let personas: Vec<PersonaRecord> = {
            let cache = self.personas.read().expect("persona cache lock poisoned");
            cache.values().filter(|p| p.active).cloned().collect()
        };
        let now = self.clock.now_ms();

        let mut removed = 0;
        for persona in personas {
            let cutoff = now - persona.config.memory_decay_ms;
            let expired: Vec<Uuid> = {
                let state = self.state.read().expect("engine state lock poisoned");
                state
                    .store
                    .iter()
                    .filter(|(_, meta)| {
                        meta.persona() == persona.id && meta.timestamp_ms < cutoff
                    })
                    .map(|(id, _)| id)
                    .collect()
            };
            for id in expired {
                match self.remove_memory(persona.id, id).await {
                    Ok(()) => removed += 1,
                    Err(EngramError::NotFound { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
            let orphans = {
                let mut state = self.state.write().expect("engine state lock poisoned");
                state.graph.cleanup_orphaned_entities(persona.id)
            };
            if orphans > 0 {
                log::debug!("swept {orphans} orphaned entities for persona {}", persona.id);
            }
        }
        Ok(removed)
    }

    // =========================================================================
    // Cold start
    // =========================================================================

    /// Rebuilds the vector index from the metadata store.
    ///
    /// Iterates records in batches of 50, re-embeds the stored original
    /// content, and replays the vector adds (the index threshold applies
    /// as on live ingestion). Personas referenced by records are primed
    /// into the cache. Returns the number of vectors restored.
    ///
    /// # Errors
    ///
    /// `ProviderFailure`, `StorageFailure`, or `Cancelled`.
    pub async fn reload_memories_from_database(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, EngramError> {
        let mut offset = 0;
        let mut restored = 0;
        loop {
            check_cancelled(cancel)?;
            let batch = self
                .metadata
                .search_vector_metadata(&MetadataQuery {
                    persona_id: None,
                    limit: Some(RELOAD_BATCH),
                    offset,
                })
                .await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();

            let texts: Vec<String> = batch
                .iter()
                .map(|r| r.custom_metadata.original_content.clone())
                .collect();
            let embeddings = self
                .embedder
                .embed_batch(&texts, &EmbedOptions::default())
                .await?;

            {
                let mut state = self.state.write().expect("engine state lock poisoned");
                for (record, embedding) in batch.iter().zip(embeddings) {
                    let Some(meta) = record.slot_meta() else {
                        log::warn!("metadata record {} has no persona; skipped", record.id);
                        continue;
                    };
                    if state.store.contains(record.id) {
                        continue;
                    }
                    match state.store.add(record.id, &embedding.vector, meta) {
                        Ok(()) => restored += 1,
                        Err(err) => log::warn!("reload of memory {} failed: {err}", record.id),
                    }
                }
            }

            for persona_id in batch.iter().filter_map(|r| r.persona_id) {
                let cached = self
                    .personas
                    .read()
                    .expect("persona cache lock poisoned")
                    .contains_key(&persona_id);
                if !cached {
                    if let Some(record) = self.metadata.get_persona(persona_id).await? {
                        self.cache_persona(record);
                    }
                }
            }
        }
        log::debug!("reloaded {restored} memories from the metadata store");
        Ok(restored)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Adds a user/assistant exchange as two conversation memories.
    ///
    /// Returns the conversation ID, generated when absent. The assistant
    /// turn is stamped one millisecond after the user turn so history
    /// ordering is stable.
    ///
    /// # Errors
    ///
    /// As [`MemoryManager::add_memory`].
    pub async fn add_conversation_exchange(
        &self,
        persona_id: Uuid,
        user_message: &str,
        assistant_message: &str,
        conversation_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Uuid, EngramError> {
        let conversation = conversation_id.unwrap_or_else(Uuid::new_v4);
        let now = self.clock.now_ms();

        let mut user_ctx = MemoryContext::conversational(conversation, Speaker::User);
        user_ctx.timestamp_ms = Some(now);
        self.add_memory(
            persona_id,
            user_message,
            MemoryType::Conversation,
            user_ctx,
            cancel,
        )
        .await?;

        let mut assistant_ctx = MemoryContext::conversational(conversation, Speaker::Assistant);
        assistant_ctx.timestamp_ms = Some(now + 1);
        self.add_memory(
            persona_id,
            assistant_message,
            MemoryType::Conversation,
            assistant_ctx,
            cancel,
        )
        .await?;

        Ok(conversation)
    }

    /// Returns a conversation's turns in timestamp order.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown persona; `StorageFailure` from the
    /// metadata store.
    pub async fn get_conversation_history(
        &self,
        persona_id: Uuid,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, EngramError> {
        self.persona(persona_id).await?;
        let records = self
            .metadata
            .search_vector_metadata(&MetadataQuery {
                persona_id: Some(persona_id),
                limit: None,
                offset: 0,
            })
            .await?;

        let mut turns: Vec<VectorMetadataRecord> = records
            .into_iter()
            .filter(|r| {
                r.custom_metadata.conversation_id == Some(conversation_id)
                    && r.custom_metadata.memory_type == MemoryType::Conversation
            })
            .collect();
        turns.sort_by(|a, b| {
            a.custom_metadata
                .timestamp
                .cmp(&b.custom_metadata.timestamp)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        turns.truncate(limit);

        Ok(turns
            .into_iter()
            .map(|r| ConversationTurn {
                memory_id: r.id,
                content: r.custom_metadata.original_content,
                speaker: r.custom_metadata.speaker,
                timestamp_ms: r.custom_metadata.timestamp,
            })
            .collect())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of memories currently stored for a persona.
    #[must_use]
    pub fn memory_count(&self, persona_id: Uuid) -> usize {
        let state = self.state.read().expect("engine state lock poisoned");
        state
            .store
            .iter()
            .filter(|(_, meta)| meta.persona() == persona_id)
            .count()
    }

    /// Engine-level counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let state = self.state.read().expect("engine state lock poisoned");
        EngineStats {
            vector_count: state.store.vector_count(),
            indexed_count: state.store.indexed_count(),
            persona_count: self
                .personas
                .read()
                .expect("persona cache lock poisoned")
                .len(),
            memory_usage: state.store.memory_usage(),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), EngramError> {
    if cancel.is_cancelled() {
        Err(EngramError::Cancelled)
    } else {
        Ok(())
    }
}

/// Key used to match extracted relationship endpoints to entities within
/// one extraction result; mirrors the graph store's canonicalization.
fn normalize_entity_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
