use super::graph::{HnswGraph, VectorAccess};
use super::HnswError;
use crate::arena::SlotId;
use crate::metric::{CosineDistance, DistanceKind, Euclidean, Metric};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::marker::PhantomData;

/// Bail out after exploring `ef * MAX_TRAVERSAL_MULT` candidates.
const MAX_TRAVERSAL_MULT: usize = 10;

/// A nearest-neighbor hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The slot holding the matching vector.
    pub slot: SlotId,
    /// Distance from the query.
    pub distance: f32,
}

/// A candidate node during traversal.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub(crate) distance: f32,
    pub(crate) slot: SlotId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Reusable allocation state for searches and inserts.
#[derive(Default)]
pub(crate) struct SearchContext {
    /// Nodes already evaluated this layer.
    pub(crate) visited: HashSet<SlotId>,
    /// Min-heap of candidates to explore (nearest first).
    pub(crate) candidates: BinaryHeap<Reverse<Candidate>>,
    /// Max-heap of current results (furthest first).
    pub(crate) results: BinaryHeap<Candidate>,
    /// Sorted output of the last layer search, ascending by distance.
    pub(crate) scratch: Vec<Candidate>,
    /// Output buffer for heuristic neighbor selection.
    pub(crate) selected: Vec<SlotId>,
}

impl SearchContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
        self.scratch.clear();
    }
}

/// Layer-search driver, monomorphized over the distance metric.
pub(crate) struct Searcher<'a, M, P> {
    graph: &'a HnswGraph,
    provider: &'a P,
    _metric: PhantomData<M>,
}

impl<'a, M, P> Searcher<'a, M, P>
where
    M: Metric,
    P: VectorAccess,
{
    pub(crate) fn new(graph: &'a HnswGraph, provider: &'a P) -> Self {
        Self {
            graph,
            provider,
            _metric: PhantomData,
        }
    }

    /// Beam search on one layer.
    ///
    /// Tombstoned nodes are traversed for routing but excluded from the
    /// result heap. On return, `ctx.scratch` holds up to `ef` live
    /// candidates sorted ascending by distance.
    pub(crate) fn search_layer(
        &self,
        ctx: &mut SearchContext,
        entry_points: impl IntoIterator<Item = SlotId>,
        query: &[f32],
        ef: usize,
        layer: u8,
    ) -> Result<(), HnswError> {
        ctx.clear();

        for ep in entry_points {
            let node = self.graph.node(ep)?;
            if node.max_layer() < layer {
                continue;
            }
            let dist = M::distance(query, self.provider.vector(ep));
            let candidate = Candidate { distance: dist, slot: ep };
            ctx.candidates.push(Reverse(candidate));
            if !node.tombstone {
                ctx.results.push(candidate);
            }
            ctx.visited.insert(ep);
        }

        while ctx.results.len() > ef {
            ctx.results.pop();
        }

        let traversal_limit = ef.saturating_mul(MAX_TRAVERSAL_MULT);
        let mut traversed = 0usize;

        while let Some(Reverse(candidate)) = ctx.candidates.pop() {
            traversed += 1;
            if traversed > traversal_limit {
                log::warn!(
                    "hnsw layer search exceeded traversal limit (ef={ef}, limit={traversal_limit}); stopping early"
                );
                break;
            }

            if let Some(furthest) = ctx.results.peek() {
                if candidate.distance > furthest.distance && ctx.results.len() >= ef {
                    break;
                }
            }

            // Neighbor lists are copied out cheaply (degree <= m0) to end
            // the graph borrow before the heap mutations below.
            for neighbor in self.graph.neighbors(candidate.slot, layer).to_vec() {
                if !ctx.visited.insert(neighbor) {
                    continue;
                }
                let node = self.graph.node(neighbor)?;
                let dist = M::distance(query, self.provider.vector(neighbor));

                let should_add = if ctx.results.len() < ef {
                    true
                } else {
                    ctx.results
                        .peek()
                        .is_some_and(|furthest| dist < furthest.distance)
                };

                if should_add {
                    let next = Candidate { distance: dist, slot: neighbor };
                    ctx.candidates.push(Reverse(next));
                    if !node.tombstone {
                        ctx.results.push(next);
                        if ctx.results.len() > ef {
                            ctx.results.pop();
                        }
                    }
                }
            }
        }

        while let Some(c) = ctx.results.pop() {
            ctx.scratch.push(c);
        }
        ctx.scratch.reverse();
        Ok(())
    }
}

impl HnswGraph {
    /// Searches for the `k` nearest live neighbors of `query`.
    ///
    /// The beam width at layer 0 is `max(ef, k)` where `ef` defaults to
    /// the configured `ef_search`.
    ///
    /// # Errors
    ///
    /// `HnswError::DimensionMismatch` when the query length differs from
    /// the configured dimensionality.
    pub fn search<P: VectorAccess>(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        provider: &P,
    ) -> Result<Vec<Neighbor>, HnswError> {
        if query.len() != self.config.dimensions as usize {
            return Err(HnswError::DimensionMismatch {
                expected: self.config.dimensions as usize,
                actual: query.len(),
            });
        }
        match self.config.distance {
            DistanceKind::Cosine => self.search_impl::<CosineDistance, P>(query, k, ef, provider),
            DistanceKind::Euclidean => self.search_impl::<Euclidean, P>(query, k, ef, provider),
        }
    }

    fn search_impl<M: Metric, P: VectorAccess>(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        provider: &P,
    ) -> Result<Vec<Neighbor>, HnswError> {
        let Some(entry_point) = self.entry_point() else {
            return Ok(Vec::new());
        };

        let mut ctx = SearchContext::new();
        let searcher = Searcher::<M, P>::new(self, provider);
        let mut current = entry_point;

        // Zoom down greedily to layer 1.
        for layer in (1..=self.top_layer()).rev() {
            searcher.search_layer(&mut ctx, [current], query, 1, layer)?;
            if let Some(best) = ctx.scratch.first() {
                current = best.slot;
            }
        }

        // Beam search at layer 0.
        let ef = ef.unwrap_or(self.config.ef_search as usize).max(k);
        searcher.search_layer(&mut ctx, [current], query, ef, 0)?;

        let mut results = Vec::with_capacity(k.min(ctx.scratch.len()));
        for c in &ctx.scratch {
            if results.len() >= k {
                break;
            }
            if self.is_live(c.slot) {
                results.push(Neighbor {
                    slot: c.slot,
                    distance: c.distance,
                });
            }
        }
        Ok(results)
    }
}
