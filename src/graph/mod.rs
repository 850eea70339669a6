//! Per-persona knowledge-graph store.
//!
//! Entities and relationships extracted from memories, indexed for
//! bounded neighborhood traversal. Adjacency is represented through
//! integer entity IDs into per-persona tables (arena + index pattern) so
//! records never hold pointers to each other.

mod traversal;

pub use traversal::{FindRelatedOptions, RelatedEntity};

use crate::metric::{CosineDistance, Metric};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Maximum canonical entity-name length.
const MAX_NAME_LEN: usize = 100;

/// Exponential-smoothing weight kept by a relationship's old strength
/// when the same triple is upserted again.
const STRENGTH_KEEP: f32 = 0.7;

/// An entity's index into its persona's tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors raised by graph-store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Input outside its documented range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The entity ID does not resolve within the persona's graph.
    #[error("entity {entity:?} not found for persona {persona_id}")]
    EntityNotFound {
        /// The persona whose graph was addressed.
        persona_id: Uuid,
        /// The missing entity.
        entity: EntityId,
    },
}

/// An entity record.
#[derive(Clone, Debug)]
pub struct EntityRecord {
    /// Index into the persona's entity table.
    pub id: EntityId,
    /// Display name as first observed.
    pub name: String,
    /// Canonicalized name (lowercased, trimmed, whitespace collapsed).
    pub canonical_name: String,
    /// Open-vocabulary type tag.
    pub entity_type: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
    /// Memories mentioning this entity, in first-mention order.
    pub mentions: Vec<Uuid>,
    /// Optional embedding for similarity-based entity search.
    pub embedding: Option<Vec<f32>>,
}

/// A directed relationship record.
#[derive(Clone, Debug)]
pub struct RelationshipRecord {
    /// Source entity.
    pub source: EntityId,
    /// Target entity.
    pub target: EntityId,
    /// Open-vocabulary relationship type.
    pub rel_type: String,
    /// Strength in `[0, 1]`.
    pub strength: f32,
    /// Memories this relationship was extracted from.
    pub provenance: Vec<Uuid>,
}

/// Directed adjacency entry; `rel` indexes the relationship table so
/// strength updates are visible without rewriting adjacency.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AdjEdge {
    pub(crate) neighbor: EntityId,
    pub(crate) rel: usize,
}

/// One persona's tables.
#[derive(Default)]
pub(crate) struct PersonaGraph {
    /// Entity slab; `None` marks a deleted entity.
    pub(crate) entities: Vec<Option<EntityRecord>>,
    /// (canonical name, type) -> entity.
    by_key: HashMap<(String, String), EntityId>,
    /// Relationship table; tombstoned entries have `deleted` set.
    pub(crate) relationships: Vec<RelationshipRecord>,
    rel_deleted: Vec<bool>,
    /// (source, target, type) -> relationship index.
    rel_by_triple: HashMap<(EntityId, EntityId, String), usize>,
    /// Both directions indexed.
    pub(crate) adjacency: HashMap<EntityId, Vec<AdjEdge>>,
    /// memory -> entities it mentions.
    mentions: HashMap<Uuid, HashSet<EntityId>>,
}

impl PersonaGraph {
    pub(crate) fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn relationship(&self, idx: usize) -> Option<&RelationshipRecord> {
        if self.rel_deleted.get(idx).copied().unwrap_or(true) {
            None
        } else {
            self.relationships.get(idx)
        }
    }
}

/// Options for entity search.
#[derive(Clone, Debug, Default)]
pub struct EntitySearchOptions {
    /// Maximum matches returned (0 = unlimited).
    pub limit: usize,
    /// Restrict to these type tags when non-empty.
    pub entity_types: Vec<String>,
    /// Minimum confidence.
    pub min_confidence: f32,
    /// Optional query embedding for similarity scoring.
    pub query_embedding: Option<Vec<f32>>,
}

/// An entity search match.
#[derive(Clone, Debug)]
pub struct EntityMatch {
    /// The matched entity.
    pub entity: EntityRecord,
    /// Match score in `[0, 1]`.
    pub score: f32,
}

/// Options for [`GraphStore::graph_context`].
#[derive(Clone, Debug)]
pub struct GraphContextOptions {
    /// Include relationships among the expanded entity set.
    pub include_relationships: bool,
    /// Cap on returned relationships.
    pub max_relationships: usize,
    /// Hops from the seed set when collecting relationships.
    pub relationship_depth: usize,
}

impl Default for GraphContextOptions {
    fn default() -> Self {
        Self {
            include_relationships: true,
            max_relationships: 50,
            relationship_depth: 1,
        }
    }
}

/// A subgraph snapshot around a set of entities.
#[derive(Clone, Debug, Default)]
pub struct GraphContext {
    /// Resolved entities, seeds first.
    pub entities: Vec<EntityRecord>,
    /// Relationships within the expanded set.
    pub relationships: Vec<RelationshipRecord>,
    /// Direct connections per seed entity.
    pub connections: HashMap<EntityId, Vec<EntityId>>,
}

/// In-memory knowledge-graph store, one isolated graph per persona.
#[derive(Default)]
pub struct GraphStore {
    personas: HashMap<Uuid, PersonaGraph>,
}

/// Collapses whitespace runs, trims, and lowercases.
fn canonicalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl GraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn persona(&self, persona_id: Uuid) -> Option<&PersonaGraph> {
        self.personas.get(&persona_id)
    }

    /// Inserts or merges an entity.
    ///
    /// Canonicalizes the name; if an entity with the same canonical name
    /// and type already exists for the persona, the call is a merge:
    /// confidence is raised to the max of both and the memory is appended
    /// to the mention list. Entity count is unchanged by a merge.
    ///
    /// # Errors
    ///
    /// `GraphError::Validation` for empty or over-long names, or
    /// confidence outside `[0, 1]`.
    pub fn upsert_entity(
        &mut self,
        persona_id: Uuid,
        name: &str,
        entity_type: &str,
        memory_id: Uuid,
        confidence: f32,
    ) -> Result<EntityId, GraphError> {
        let canonical = canonicalize(name);
        if canonical.is_empty() {
            return Err(GraphError::Validation("entity name is empty".to_string()));
        }
        if canonical.len() > MAX_NAME_LEN {
            return Err(GraphError::Validation(format!(
                "entity name exceeds {MAX_NAME_LEN} chars"
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(GraphError::Validation(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        let graph = self.personas.entry(persona_id).or_default();
        let key = (canonical.clone(), entity_type.to_string());

        let id = if let Some(&existing) = graph.by_key.get(&key) {
            let record = graph.entities[existing.index()]
                .as_mut()
                .expect("keyed entity is present");
            record.confidence = record.confidence.max(confidence);
            if !record.mentions.contains(&memory_id) {
                record.mentions.push(memory_id);
            }
            existing
        } else {
            let id = EntityId(graph.entities.len() as u32);
            graph.entities.push(Some(EntityRecord {
                id,
                name: name.trim().to_string(),
                canonical_name: canonical,
                entity_type: entity_type.to_string(),
                confidence,
                mentions: vec![memory_id],
                embedding: None,
            }));
            graph.by_key.insert(key, id);
            id
        };

        graph.mentions.entry(memory_id).or_default().insert(id);
        Ok(id)
    }

    /// Attaches an embedding to an entity for similarity search.
    ///
    /// # Errors
    ///
    /// `GraphError::EntityNotFound` when the entity does not resolve.
    pub fn set_entity_embedding(
        &mut self,
        persona_id: Uuid,
        entity: EntityId,
        embedding: Vec<f32>,
    ) -> Result<(), GraphError> {
        let record = self
            .personas
            .get_mut(&persona_id)
            .and_then(|g| g.entities.get_mut(entity.index()))
            .and_then(Option::as_mut)
            .ok_or(GraphError::EntityNotFound { persona_id, entity })?;
        record.embedding = Some(embedding);
        Ok(())
    }

    /// Inserts or updates a directed relationship.
    ///
    /// `(source, target, type)` triples are unique per persona. On a
    /// repeat upsert, strength is smoothed (`0.7 * old + 0.3 * new`) and
    /// provenance is appended.
    ///
    /// # Errors
    ///
    /// `Validation` for strength outside `[0, 1]`, a self-referential
    /// triple, or an empty type; `EntityNotFound` when either endpoint
    /// is missing.
    pub fn upsert_relationship(
        &mut self,
        persona_id: Uuid,
        source: EntityId,
        target: EntityId,
        rel_type: &str,
        strength: f32,
        memory_id: Uuid,
    ) -> Result<(), GraphError> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(GraphError::Validation(format!(
                "strength {strength} outside [0, 1]"
            )));
        }
        if rel_type.trim().is_empty() {
            return Err(GraphError::Validation(
                "relationship type is empty".to_string(),
            ));
        }
        if source == target {
            return Err(GraphError::Validation(
                "self-referential relationship".to_string(),
            ));
        }

        {
            let graph = self.personas.entry(persona_id).or_default();
            for endpoint in [source, target] {
                if graph.entity(endpoint).is_none() {
                    return Err(GraphError::EntityNotFound {
                        persona_id,
                        entity: endpoint,
                    });
                }
            }
        }

        let graph = self.personas.get_mut(&persona_id).expect("persona graph exists");
        let triple = (source, target, rel_type.to_string());
        if let Some(&idx) = graph.rel_by_triple.get(&triple) {
            let record = &mut graph.relationships[idx];
            record.strength = STRENGTH_KEEP * record.strength + (1.0 - STRENGTH_KEEP) * strength;
            if !record.provenance.contains(&memory_id) {
                record.provenance.push(memory_id);
            }
        } else {
            let idx = graph.relationships.len();
            graph.relationships.push(RelationshipRecord {
                source,
                target,
                rel_type: rel_type.to_string(),
                strength,
                provenance: vec![memory_id],
            });
            graph.rel_deleted.push(false);
            graph.rel_by_triple.insert(triple, idx);
            graph
                .adjacency
                .entry(source)
                .or_default()
                .push(AdjEdge { neighbor: target, rel: idx });
            graph
                .adjacency
                .entry(target)
                .or_default()
                .push(AdjEdge { neighbor: source, rel: idx });
        }
        Ok(())
    }

    /// Searches entities by name substring and optional embedding
    /// similarity, filtered by type and confidence.
    #[must_use]
    pub fn search_entities(
        &self,
        persona_id: Uuid,
        query: &str,
        opts: &EntitySearchOptions,
    ) -> Vec<EntityMatch> {
        let Some(graph) = self.personas.get(&persona_id) else {
            return Vec::new();
        };
        let needle = canonicalize(query);
        let mut matches = Vec::new();
        for record in graph.entities.iter().flatten() {
            if record.confidence < opts.min_confidence {
                continue;
            }
            if !opts.entity_types.is_empty()
                && !opts.entity_types.iter().any(|t| t == &record.entity_type)
            {
                continue;
            }
            let substring = !needle.is_empty() && record.canonical_name.contains(&needle);
            let embedding_score = match (&opts.query_embedding, &record.embedding) {
                (Some(q), Some(e)) if q.len() == e.len() => {
                    CosineDistance::similarity(CosineDistance::distance(q, e))
                }
                _ => 0.0,
            };
            let score = if substring { 1.0_f32 } else { embedding_score };
            if score > 0.0 {
                matches.push(EntityMatch {
                    entity: record.clone(),
                    score,
                });
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        if opts.limit > 0 {
            matches.truncate(opts.limit);
        }
        matches
    }

    /// Resolves an entity record.
    #[must_use]
    pub fn entity(&self, persona_id: Uuid, entity: EntityId) -> Option<EntityRecord> {
        self.personas
            .get(&persona_id)
            .and_then(|g| g.entity(entity))
            .cloned()
    }

    /// Entities mentioned by a memory.
    #[must_use]
    pub fn mentions_of(&self, persona_id: Uuid, memory_id: Uuid) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .personas
            .get(&persona_id)
            .and_then(|g| g.mentions.get(&memory_id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Memories mentioning an entity.
    #[must_use]
    pub fn memories_of(&self, persona_id: Uuid, entity: EntityId) -> Vec<Uuid> {
        self.personas
            .get(&persona_id)
            .and_then(|g| g.entity(entity))
            .map(|record| record.mentions.clone())
            .unwrap_or_default()
    }

    /// Builds a subgraph snapshot around `entity_ids`.
    #[must_use]
    pub fn graph_context(
        &self,
        persona_id: Uuid,
        entity_ids: &[EntityId],
        opts: &GraphContextOptions,
    ) -> GraphContext {
        let Some(graph) = self.personas.get(&persona_id) else {
            return GraphContext::default();
        };

        // Expand the seed set by up to `relationship_depth` hops.
        let mut expanded: HashSet<EntityId> = entity_ids
            .iter()
            .copied()
            .filter(|&id| graph.entity(id).is_some())
            .collect();
        let mut frontier: Vec<EntityId> = expanded.iter().copied().collect();
        for _ in 0..opts.relationship_depth {
            let mut next = Vec::new();
            for &id in &frontier {
                for edge in graph.adjacency.get(&id).map_or(&[][..], Vec::as_slice) {
                    if graph.relationship(edge.rel).is_some() && expanded.insert(edge.neighbor) {
                        next.push(edge.neighbor);
                    }
                }
            }
            frontier = next;
        }

        let mut entities: Vec<EntityRecord> = entity_ids
            .iter()
            .filter_map(|&id| graph.entity(id).cloned())
            .collect();
        let seed_set: HashSet<EntityId> = entities.iter().map(|e| e.id).collect();
        let mut extra: Vec<&EntityRecord> = expanded
            .iter()
            .filter(|id| !seed_set.contains(id))
            .filter_map(|&id| graph.entity(id))
            .collect();
        extra.sort_by_key(|e| e.id);
        entities.extend(extra.into_iter().cloned());

        let mut relationships = Vec::new();
        if opts.include_relationships {
            for (idx, record) in graph.relationships.iter().enumerate() {
                if relationships.len() >= opts.max_relationships {
                    break;
                }
                if graph.relationship(idx).is_none() {
                    continue;
                }
                if expanded.contains(&record.source) && expanded.contains(&record.target) {
                    relationships.push(record.clone());
                }
            }
        }

        let mut connections = HashMap::new();
        for &seed in &seed_set {
            let mut direct: Vec<EntityId> = graph
                .adjacency
                .get(&seed)
                .map_or(&[][..], Vec::as_slice)
                .iter()
                .filter(|edge| graph.relationship(edge.rel).is_some())
                .map(|edge| edge.neighbor)
                .filter(|n| expanded.contains(n))
                .collect();
            direct.sort();
            direct.dedup();
            connections.insert(seed, direct);
        }

        GraphContext {
            entities,
            relationships,
            connections,
        }
    }

    /// Drops a memory from the mention index and from entity mention
    /// lists. Entities left without mentions become orphans, collected by
    /// [`GraphStore::cleanup_orphaned_entities`].
    pub fn remove_memory_mentions(&mut self, persona_id: Uuid, memory_id: Uuid) {
        let Some(graph) = self.personas.get_mut(&persona_id) else {
            return;
        };
        let Some(entities) = graph.mentions.remove(&memory_id) else {
            return;
        };
        for entity in entities {
            if let Some(record) = graph.entities.get_mut(entity.index()).and_then(Option::as_mut) {
                record.mentions.retain(|&m| m != memory_id);
            }
        }
        for record in &mut graph.relationships {
            record.provenance.retain(|&m| m != memory_id);
        }
    }

    /// Deletes entities whose mention lists are empty, cascading to their
    /// incident relationships. Returns the number of entities removed.
    pub fn cleanup_orphaned_entities(&mut self, persona_id: Uuid) -> usize {
        let Some(graph) = self.personas.get_mut(&persona_id) else {
            return 0;
        };
        let orphans: Vec<EntityId> = graph
            .entities
            .iter()
            .flatten()
            .filter(|record| record.mentions.is_empty())
            .map(|record| record.id)
            .collect();

        for &orphan in &orphans {
            let record = graph.entities[orphan.index()]
                .take()
                .expect("orphan scan saw the entity");
            graph
                .by_key
                .remove(&(record.canonical_name, record.entity_type));

            // Cascade: tombstone every incident relationship.
            if let Some(edges) = graph.adjacency.remove(&orphan) {
                for edge in edges {
                    if !graph.rel_deleted[edge.rel] {
                        graph.rel_deleted[edge.rel] = true;
                        let rel = &graph.relationships[edge.rel];
                        graph.rel_by_triple.remove(&(
                            rel.source,
                            rel.target,
                            rel.rel_type.clone(),
                        ));
                    }
                    if let Some(other) = graph.adjacency.get_mut(&edge.neighbor) {
                        other.retain(|e| e.neighbor != orphan);
                    }
                }
            }
        }
        if !orphans.is_empty() {
            log::debug!(
                "removed {} orphaned entities for persona {persona_id}",
                orphans.len()
            );
        }
        orphans.len()
    }

    /// Number of live entities for a persona.
    #[must_use]
    pub fn entity_count(&self, persona_id: Uuid) -> usize {
        self.personas
            .get(&persona_id)
            .map_or(0, |g| g.entities.iter().flatten().count())
    }

    /// Number of live relationships for a persona.
    #[must_use]
    pub fn relationship_count(&self, persona_id: Uuid) -> usize {
        self.personas
            .get(&persona_id)
            .map_or(0, |g| g.rel_deleted.iter().filter(|&&d| !d).count())
    }

    /// True when the persona has no graph content.
    #[must_use]
    pub fn is_empty(&self, persona_id: Uuid) -> bool {
        self.entity_count(persona_id) == 0
    }

    /// Drops a persona's entire graph.
    pub fn clear_persona(&mut self, persona_id: Uuid) {
        self.personas.remove(&persona_id);
    }
}
