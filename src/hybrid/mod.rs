//! Hybrid search: vector similarity fused with graph expansion.
//!
//! Runs a persona-filtered vector search, optionally widens the hit set
//! through knowledge-graph neighborhoods, and re-ranks everything with a
//! single linear fusion formula. Deterministic for a fixed store and
//! graph state.

use crate::arena::SlotMeta;
use crate::graph::{EntityId, FindRelatedOptions, GraphStore};
use crate::store::{SearchFilters, SearchOptions, StoreError, VectorStore};
use crate::types::MemoryType;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Weight of importance in the fusion score.
const IMPORTANCE_WEIGHT: f32 = 0.1;

/// Flat bonus for memories touched by graph expansion or boosting.
const GRAPH_BONUS: f32 = 0.05;

/// Per-entity cap on memories gathered during expansion.
const ENTITY_MEMORY_CAP: usize = 50;

/// Options for a hybrid retrieval.
#[derive(Clone, Debug)]
pub struct HybridSearchOptions {
    /// Maximum results returned.
    pub limit: usize,
    /// Minimum vector similarity for the seeding search.
    pub threshold: f32,
    /// Restrict to these memory types when set.
    pub memory_types: Option<Vec<MemoryType>>,
    /// Drop memories older than this, in milliseconds.
    pub max_age_ms: Option<i64>,
    /// Expand the hit set through the knowledge graph.
    pub use_graph_expansion: bool,
    /// Traversal depth for the expansion.
    pub graph_depth: usize,
    /// Fusion weight of the graph score, in `[0, 1]`.
    pub graph_weight: f32,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.0,
            memory_types: None,
            max_age_ms: None,
            use_graph_expansion: true,
            graph_depth: 2,
            graph_weight: 0.3,
        }
    }
}

impl HybridSearchOptions {
    /// Validates option ranges.
    ///
    /// # Errors
    ///
    /// Returns a message when `graph_weight` leaves `[0, 1]`, `limit` is
    /// zero, or `graph_depth` exceeds 5.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.graph_weight) {
            return Err(format!(
                "graph_weight {} outside [0, 1]",
                self.graph_weight
            ));
        }
        if self.limit == 0 {
            return Err("limit must be > 0".to_string());
        }
        if self.graph_depth > 5 {
            return Err(format!("graph_depth {} exceeds 5", self.graph_depth));
        }
        Ok(())
    }
}

/// A fused retrieval hit.
#[derive(Clone, Debug)]
pub struct HybridHit {
    /// Memory ID.
    pub id: Uuid,
    /// Vector similarity component (0 when reached only via the graph).
    pub vector_score: f32,
    /// Best entity score among entities mentioning this memory.
    pub graph_score: f32,
    /// Fused ranking score.
    pub final_score: f32,
    /// Reached through graph expansion only.
    pub graph_expanded: bool,
    /// Vector hit additionally supported by the graph.
    pub graph_boosted: bool,
    /// Inline slot metadata.
    pub meta: SlotMeta,
}

/// Runs the hybrid retrieval pipeline for one persona.
///
/// 1. Vector search with `limit * 2` candidates filtered to the persona.
/// 2. Seed entities from the mentions of those hits.
/// 3. Expand via bounded graph traversal at `graph_depth`.
/// 4. Pull memories of expanded entities (top 50 per entity score) and
///    estimate their similarity directly against the query vector.
/// 5. Fuse: `(1-w)*vec + w*graph + 0.1*importance + 0.05*[touched]`.
/// 6. Post-filter by memory type and age, rank, truncate.
///
/// # Errors
///
/// Propagates `StoreError` from the vector search (dimension mismatch).
pub fn hybrid_search(
    store: &VectorStore,
    graph: &GraphStore,
    persona_id: Uuid,
    query: &[f32],
    now_ms: i64,
    opts: &HybridSearchOptions,
) -> Result<Vec<HybridHit>, StoreError> {
    struct Candidate {
        vector_score: f32,
        graph_score: f32,
        graph_expanded: bool,
        graph_boosted: bool,
        meta: SlotMeta,
    }

    // Step 1: vector candidates.
    let vector_hits = store.search(
        query,
        &SearchOptions {
            limit: opts.limit * 2,
            threshold: opts.threshold,
            filters: SearchFilters::persona(persona_id),
            use_index: true,
        },
    )?;

    let mut candidates: HashMap<Uuid, Candidate> = HashMap::new();
    for hit in &vector_hits {
        candidates.insert(
            hit.id,
            Candidate {
                vector_score: hit.similarity.max(0.0),
                graph_score: 0.0,
                graph_expanded: false,
                graph_boosted: false,
                meta: hit.meta,
            },
        );
    }

    // Steps 2-4: graph expansion.
    if opts.use_graph_expansion && !graph.is_empty(persona_id) {
        let mut seeds: HashSet<EntityId> = HashSet::new();
        for hit in &vector_hits {
            seeds.extend(graph.mentions_of(persona_id, hit.id));
        }

        // Seed entities score 1.0 (depth 0); traversal supplies the rest.
        let mut entity_scores: HashMap<EntityId, f32> = seeds.iter().map(|&e| (e, 1.0)).collect();
        let mut ordered_seeds: Vec<EntityId> = seeds.iter().copied().collect();
        ordered_seeds.sort();
        for seed in ordered_seeds {
            for related in graph.find_related(
                persona_id,
                seed,
                &FindRelatedOptions {
                    max_depth: opts.graph_depth,
                    ..FindRelatedOptions::default()
                },
            ) {
                let entry = entity_scores.entry(related.id).or_insert(0.0);
                if related.score > *entry {
                    *entry = related.score;
                }
            }
        }

        let mut scored_entities: Vec<(EntityId, f32)> = entity_scores.into_iter().collect();
        scored_entities.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (entity, entity_score) in scored_entities {
            for memory_id in graph
                .memories_of(persona_id, entity)
                .into_iter()
                .take(ENTITY_MEMORY_CAP)
            {
                if let Some(existing) = candidates.get_mut(&memory_id) {
                    existing.graph_boosted = true;
                    if entity_score > existing.graph_score {
                        existing.graph_score = entity_score;
                    }
                    continue;
                }
                // Reached only via the graph: cheap similarity estimate
                // straight against the stored vector.
                let Ok((vector, meta)) = store.get(memory_id) else {
                    continue;
                };
                if meta.persona() != persona_id {
                    continue;
                }
                let kind = store.distance_kind();
                let similarity = kind.similarity(kind.distance(query, vector));
                let meta = *meta;
                candidates.insert(
                    memory_id,
                    Candidate {
                        vector_score: similarity.max(0.0),
                        graph_score: entity_score,
                        graph_expanded: true,
                        graph_boosted: false,
                        meta,
                    },
                );
            }
        }
    }

    // Steps 5-6: fuse and post-filter.
    let age_cutoff = opts.max_age_ms.map(|max_age| now_ms - max_age);
    let mut hits: Vec<HybridHit> = candidates
        .into_iter()
        .filter(|(_, c)| {
            if let Some(types) = &opts.memory_types {
                if !types.contains(&c.meta.kind()) {
                    return false;
                }
            }
            if let Some(cutoff) = age_cutoff {
                if c.meta.timestamp_ms < cutoff {
                    return false;
                }
            }
            true
        })
        .map(|(id, c)| {
            let importance = c.meta.importance.clamp(0.0, 1.0);
            let touched = c.graph_expanded || c.graph_boosted;
            let final_score = (1.0 - opts.graph_weight) * c.vector_score
                + opts.graph_weight * c.graph_score
                + IMPORTANCE_WEIGHT * importance
                + if touched { GRAPH_BONUS } else { 0.0 };
            HybridHit {
                id,
                vector_score: c.vector_score,
                graph_score: c.graph_score,
                final_score,
                graph_expanded: c.graph_expanded,
                graph_boosted: c.graph_boosted,
                meta: c.meta,
            }
        })
        .collect();

    // Step 7: deterministic ranking.
    hits.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(opts.limit);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStoreConfig;
    use crate::types::Speaker;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    fn meta(persona: Uuid, importance: f32, ts: i64) -> SlotMeta {
        SlotMeta::new(persona, None, MemoryType::Fact, None, importance, ts, ts)
    }

    fn store() -> VectorStore {
        let mut config = VectorStoreConfig::new(4);
        config.max_memory_mb = 1;
        VectorStore::new(config).unwrap()
    }

    #[test]
    fn without_graph_matches_vector_ranking() {
        let persona = Uuid::new_v4();
        let mut vs = store();
        let graph = GraphStore::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        vs.add(near, &unit(&[1.0, 0.0, 0.0, 0.0]), meta(persona, 0.5, 0)).unwrap();
        vs.add(far, &unit(&[0.0, 1.0, 0.0, 0.0]), meta(persona, 0.5, 0)).unwrap();

        let opts = HybridSearchOptions {
            use_graph_expansion: false,
            ..HybridSearchOptions::default()
        };
        let hits = hybrid_search(&vs, &graph, persona, &unit(&[1.0, 0.1, 0.0, 0.0]), 0, &opts)
            .unwrap();
        assert_eq!(hits[0].id, near);
        assert!(hits.iter().all(|h| !h.graph_expanded && !h.graph_boosted));
        assert!(hits[0].graph_score == 0.0);
    }

    #[test]
    fn expansion_pulls_in_graph_neighbors() {
        let persona = Uuid::new_v4();
        let mut vs = store();
        let mut graph = GraphStore::new();

        // Memory A mentions Alice; memory B mentions Acme; Alice works at
        // Acme. A vector query close to A should surface B via the graph.
        let mem_a = Uuid::new_v4();
        let mem_b = Uuid::new_v4();
        vs.add(mem_a, &unit(&[1.0, 0.0, 0.0, 0.0]), meta(persona, 0.5, 0)).unwrap();
        vs.add(mem_b, &unit(&[0.0, 0.0, 1.0, 0.0]), meta(persona, 0.5, 0)).unwrap();

        let alice = graph.upsert_entity(persona, "Alice", "person", mem_a, 0.9).unwrap();
        let acme = graph.upsert_entity(persona, "Acme", "organization", mem_b, 0.9).unwrap();
        graph
            .upsert_relationship(persona, alice, acme, "works_at", 0.9, mem_a)
            .unwrap();

        let hits = hybrid_search(
            &vs,
            &graph,
            persona,
            &unit(&[1.0, 0.0, 0.0, 0.0]),
            0,
            &HybridSearchOptions::default(),
        )
        .unwrap();

        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        assert!(ids.contains(&mem_a));
        assert!(ids.contains(&mem_b));
        let b = hits.iter().find(|h| h.id == mem_b).unwrap();
        assert!(b.graph_expanded);
        assert!(b.graph_score > 0.0);
        let a = hits.iter().find(|h| h.id == mem_a).unwrap();
        assert!(a.graph_boosted);
        assert!((a.graph_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn importance_breaks_near_ties() {
        let persona = Uuid::new_v4();
        let mut vs = store();
        let graph = GraphStore::new();
        let plain = Uuid::new_v4();
        let important = Uuid::new_v4();
        let v = unit(&[1.0, 0.0, 0.0, 0.0]);
        vs.add(plain, &v, meta(persona, 0.1, 0)).unwrap();
        vs.add(important, &v, meta(persona, 0.9, 0)).unwrap();

        let hits = hybrid_search(&vs, &graph, persona, &v, 0, &HybridSearchOptions::default())
            .unwrap();
        assert_eq!(hits[0].id, important);
    }

    #[test]
    fn memory_type_and_age_filters_apply() {
        let persona = Uuid::new_v4();
        let mut vs = store();
        let graph = GraphStore::new();
        let old_fact = Uuid::new_v4();
        let new_conv = Uuid::new_v4();
        let v = unit(&[1.0, 0.0, 0.0, 0.0]);
        vs.add(old_fact, &v, meta(persona, 0.5, 1_000)).unwrap();
        vs.add(
            new_conv,
            &v,
            SlotMeta::new(
                persona,
                None,
                MemoryType::Conversation,
                Some(Speaker::User),
                0.5,
                9_000,
                9_000,
            ),
        )
        .unwrap();

        let opts = HybridSearchOptions {
            memory_types: Some(vec![MemoryType::Conversation]),
            ..HybridSearchOptions::default()
        };
        let hits = hybrid_search(&vs, &graph, persona, &v, 10_000, &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, new_conv);

        let opts = HybridSearchOptions {
            max_age_ms: Some(5_000),
            ..HybridSearchOptions::default()
        };
        let hits = hybrid_search(&vs, &graph, persona, &v, 10_000, &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, new_conv);
    }

    #[test]
    fn option_validation() {
        let mut opts = HybridSearchOptions::default();
        assert!(opts.validate().is_ok());
        opts.graph_weight = 1.5;
        assert!(opts.validate().is_err());
        opts.graph_weight = 0.3;
        opts.limit = 0;
        assert!(opts.validate().is_err());
        opts.limit = 10;
        opts.graph_depth = 6;
        assert!(opts.validate().is_err());
    }
}
