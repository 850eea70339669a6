//! Bounded BFS over a persona's relationship graph.

use super::{EntityId, GraphStore};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-hop score decay.
const DEPTH_DECAY: f32 = 0.6;

/// Hard cap on traversal depth.
const MAX_DEPTH: usize = 5;

/// Expansion budget: traversal stops once this many edges have been
/// examined (visited count times average fanout).
const EXPANSION_BUDGET: usize = 10_000;

/// Options for [`GraphStore::find_related`].
#[derive(Clone, Debug)]
pub struct FindRelatedOptions {
    /// Maximum hops from the seed (clamped to 5).
    pub max_depth: usize,
    /// Edges weaker than this are not traversed.
    pub min_strength: f32,
    /// Restrict results to these entity types when non-empty.
    pub entity_types: Vec<String>,
    /// Traverse only these relationship types when non-empty.
    pub relationship_types: Vec<String>,
    /// Maximum entities returned (0 = unlimited).
    pub limit: usize,
}

impl Default for FindRelatedOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            min_strength: 0.0,
            entity_types: Vec::new(),
            relationship_types: Vec::new(),
            limit: 0,
        }
    }
}

/// An entity reached by graph traversal.
#[derive(Clone, Debug)]
pub struct RelatedEntity {
    /// The reached entity.
    pub id: EntityId,
    /// Accumulated path score: edge strengths multiplied along the best
    /// path, decayed by `0.6^depth`.
    pub score: f32,
    /// Hop count of the best-scoring path.
    pub depth: usize,
}

impl GraphStore {
    /// Finds entities reachable from `seed` within a bounded neighborhood.
    ///
    /// Breadth-first expansion from the seed. Each reached entity is
    /// scored `strength * 0.6^depth` where `strength` is the product of
    /// edge strengths along the path; when several paths reach the same
    /// entity the best score (smallest depth on ties) is kept. Expansion
    /// stops at `max_depth` or when the edge budget is exhausted.
    ///
    /// Results are ordered by score descending, then depth ascending,
    /// then entity ID. The seed itself is not returned.
    #[must_use]
    pub fn find_related(
        &self,
        persona_id: Uuid,
        seed: EntityId,
        opts: &FindRelatedOptions,
    ) -> Vec<RelatedEntity> {
        let Some(graph) = self.persona(persona_id) else {
            return Vec::new();
        };
        if graph.entity(seed).is_none() {
            return Vec::new();
        }
        let max_depth = opts.max_depth.min(MAX_DEPTH);
        if max_depth == 0 {
            return Vec::new();
        }

        // entity -> (best path strength, depth of that path)
        let mut best: HashMap<EntityId, (f32, usize)> = HashMap::new();
        let mut frontier: Vec<(EntityId, f32)> = vec![(seed, 1.0)];
        let mut expanded = 0usize;

        'bfs: for depth in 1..=max_depth {
            let mut next: Vec<(EntityId, f32)> = Vec::new();
            for &(current, path_strength) in &frontier {
                let Some(edges) = graph.adjacency.get(&current) else {
                    continue;
                };
                for edge in edges {
                    expanded += 1;
                    if expanded > EXPANSION_BUDGET {
                        log::warn!(
                            "graph traversal budget exhausted at depth {depth} for persona {persona_id}"
                        );
                        break 'bfs;
                    }
                    let Some(rel) = graph.relationship(edge.rel) else {
                        continue;
                    };
                    if rel.strength < opts.min_strength {
                        continue;
                    }
                    if !opts.relationship_types.is_empty()
                        && !opts.relationship_types.iter().any(|t| t == &rel.rel_type)
                    {
                        continue;
                    }
                    let neighbor = edge.neighbor;
                    if neighbor == seed {
                        continue;
                    }
                    let strength = path_strength * rel.strength;
                    let entry = best.entry(neighbor).or_insert((0.0, depth));
                    let score_new = strength * DEPTH_DECAY.powi(depth as i32);
                    let score_old = entry.0 * DEPTH_DECAY.powi(entry.1 as i32);
                    if score_new > score_old || (score_new == score_old && depth < entry.1) {
                        *entry = (strength, depth);
                    }
                    // Expand each node once, at its first (shallowest) visit.
                    if entry.1 == depth && !next.iter().any(|(id, _)| *id == neighbor) {
                        next.push((neighbor, strength));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut results: Vec<RelatedEntity> = best
            .into_iter()
            .filter_map(|(id, (strength, depth))| {
                let record = graph.entity(id)?;
                if !opts.entity_types.is_empty()
                    && !opts.entity_types.iter().any(|t| t == &record.entity_type)
                {
                    return None;
                }
                Some(RelatedEntity {
                    id,
                    score: strength * DEPTH_DECAY.powi(depth as i32),
                    depth,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.depth.cmp(&b.depth))
                .then_with(|| a.id.cmp(&b.id))
        });
        if opts.limit > 0 {
            results.truncate(opts.limit);
        }
        results
    }
}
