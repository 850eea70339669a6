use super::graph::{HnswGraph, VectorAccess};
use super::search::{Candidate, SearchContext, Searcher};
use super::HnswError;
use crate::arena::SlotId;
use crate::metric::{CosineDistance, DistanceKind, Euclidean, Metric};

impl HnswGraph {
    /// Inserts the vector stored at `slot` into the graph.
    ///
    /// The full HNSW insertion algorithm:
    /// 1. Draw a geometric level `L` for the new node.
    /// 2. Greedy-descend from the entry point down to layer `L + 1`.
    /// 3. For layers `min(L, top)..=0`, beam-search `ef_construction`
    ///    candidates and connect to up to `m` (layer 0: `m0`) neighbors
    ///    chosen by the diversity heuristic.
    /// 4. Promote the node to entry point when `L` exceeds the top layer.
    ///
    /// If `slot` still carries a tombstoned node from a freed memory, it
    /// is detached before reuse.
    ///
    /// # Errors
    ///
    /// `HnswError::DimensionMismatch` on wrong vector length; internal
    /// node-table errors surface as `NodeOutOfBounds`.
    pub fn insert<P: VectorAccess>(
        &mut self,
        slot: SlotId,
        vector: &[f32],
        provider: &P,
    ) -> Result<(), HnswError> {
        if vector.len() != self.config.dimensions as usize {
            return Err(HnswError::DimensionMismatch {
                expected: self.config.dimensions as usize,
                actual: vector.len(),
            });
        }
        match self.config.distance {
            DistanceKind::Cosine => self.insert_impl::<CosineDistance, P>(slot, vector, provider),
            DistanceKind::Euclidean => self.insert_impl::<Euclidean, P>(slot, vector, provider),
        }
    }

    fn insert_impl<M: Metric, P: VectorAccess>(
        &mut self,
        slot: SlotId,
        vector: &[f32],
        provider: &P,
    ) -> Result<(), HnswError> {
        let level = self.random_level();
        // Reclaim the slot first: if it carried a tombstoned node, detach
        // re-promotes the entry point away from it.
        self.ensure_node(slot, level);
        let previous_top = self.top_layer();

        let Some(entry_point) = self.entry_point().filter(|&e| e != slot) else {
            self.entry_point = Some(slot);
            return Ok(());
        };

        let mut ctx = SearchContext::new();
        let mut current = entry_point;

        // Phase 1: greedy descent through the layers above L.
        for layer in (level + 1..=previous_top).rev() {
            let searcher = Searcher::<M, P>::new(self, provider);
            searcher.search_layer(&mut ctx, [current], vector, 1, layer)?;
            if let Some(best) = ctx.scratch.first() {
                current = best.slot;
            }
        }

        // Phase 2: connect on each layer from min(L, top) down to 0.
        let start_layer = level.min(previous_top);
        for layer in (0..=start_layer).rev() {
            let ef = self.config.ef_construction as usize;
            {
                let searcher = Searcher::<M, P>::new(self, provider);
                searcher.search_layer(&mut ctx, [current], vector, ef, layer)?;
            }
            let next_entry = ctx.scratch.first().map(|c| c.slot);

            let m_max = self.config.max_degree(layer);
            select_neighbors_heuristic::<M, P>(vector, &ctx.scratch, m_max, provider, &mut ctx.selected);

            let chosen = ctx.selected.clone();
            for neighbor in chosen {
                self.connect::<M, P>(slot, neighbor, layer, provider)?;
                self.connect::<M, P>(neighbor, slot, layer, provider)?;
            }

            if let Some(best) = next_entry {
                current = best;
            }
        }

        // Phase 3: promote to entry point if the node tops the graph.
        if level > previous_top {
            self.entry_point = Some(slot);
        }
        Ok(())
    }

    /// Adds `target` to `source`'s neighbor list on `layer`, re-pruning
    /// with the selection heuristic when the degree bound is exceeded.
    ///
    /// Edges dropped by the prune also have their reverse edge removed so
    /// the adjacency stays symmetric (detaching a node only needs its own
    /// lists).
    fn connect<M: Metric, P: VectorAccess>(
        &mut self,
        source: SlotId,
        target: SlotId,
        layer: u8,
        provider: &P,
    ) -> Result<(), HnswError> {
        {
            let node = self.node(source)?;
            if node.max_layer() < layer {
                return Ok(());
            }
            let list = &node.layers[layer as usize];
            if list.contains(&target) {
                return Ok(());
            }
        }

        let m_max = self.config.max_degree(layer);
        let node = &mut self.nodes[source.index()];
        node.layers[layer as usize].push(target);
        if node.layers[layer as usize].len() <= m_max {
            return Ok(());
        }

        // Degree overflow: re-select the neighbor set around `source`.
        let current: Vec<SlotId> = node.layers[layer as usize].clone();
        let source_vec = provider.vector(source);
        let mut candidates: Vec<Candidate> = current
            .iter()
            .map(|&slot| Candidate {
                distance: M::distance(source_vec, provider.vector(slot)),
                slot,
            })
            .collect();
        candidates.sort();

        let mut kept = Vec::new();
        select_neighbors_heuristic::<M, P>(source_vec, &candidates, m_max, provider, &mut kept);

        for &dropped in current.iter().filter(|s| !kept.contains(s)) {
            if let Some(other) = self.nodes.get_mut(dropped.index()) {
                if let Some(list) = other.layers.get_mut(layer as usize) {
                    list.retain(|&s| s != source);
                }
            }
        }
        self.nodes[source.index()].layers[layer as usize] = kept;
        Ok(())
    }
}

/// HNSW heuristic neighbor selection.
///
/// Walks candidates in ascending distance order and accepts one only if
/// no already-selected neighbor is closer to it than the query point is;
/// this preserves diverse connectivity instead of clustering all edges
/// on one side of the query.
fn select_neighbors_heuristic<M: Metric, P: VectorAccess>(
    _query: &[f32],
    candidates: &[Candidate],
    m: usize,
    provider: &P,
    output: &mut Vec<SlotId>,
) {
    output.clear();
    for c in candidates {
        if output.len() >= m {
            break;
        }
        let c_vec = provider.vector(c.slot);
        let closer_to_existing = output.iter().any(|&selected| {
            let dist_c_s = M::distance(c_vec, provider.vector(selected));
            dist_c_s < c.distance
        });
        if !closer_to_existing {
            output.push(c.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;

    struct FlatVectors {
        dims: usize,
        data: Vec<f32>,
    }

    impl FlatVectors {
        fn new(dims: usize) -> Self {
            Self { dims, data: Vec::new() }
        }

        fn push(&mut self, v: &[f32]) -> SlotId {
            let slot = SlotId((self.data.len() / self.dims) as u32);
            self.data.extend_from_slice(v);
            slot
        }
    }

    impl VectorAccess for FlatVectors {
        fn vector(&self, slot: SlotId) -> &[f32] {
            let start = slot.index() * self.dims;
            &self.data[start..start + self.dims]
        }
    }

    fn euclidean_graph(dims: u32) -> HnswGraph {
        let mut config = HnswConfig::new(dims);
        config.distance = DistanceKind::Euclidean;
        HnswGraph::new(config).unwrap()
    }

    #[test]
    fn first_insert_becomes_entry_point() {
        let mut graph = euclidean_graph(2);
        let mut provider = FlatVectors::new(2);
        let slot = provider.push(&[1.0, 1.0]);
        graph.insert(slot, &[1.0, 1.0], &provider).unwrap();
        assert_eq!(graph.entry_point(), Some(slot));
        assert_eq!(graph.live_count(), 1);
    }

    #[test]
    fn inserted_nodes_are_connected_at_layer_zero() {
        let mut graph = euclidean_graph(2);
        let mut provider = FlatVectors::new(2);
        for v in [[1.0, 1.0], [2.0, 2.0], [1.0, 2.0]] {
            let slot = provider.push(&v);
            graph.insert(slot, &v, &provider).unwrap();
        }
        assert_eq!(graph.live_count(), 3);
        assert!(
            !graph.neighbors(SlotId(0), 0).is_empty(),
            "first node should have gained reverse edges"
        );
    }

    #[test]
    fn degree_bound_holds_after_many_inserts() {
        let mut config = HnswConfig::new(2);
        config.distance = DistanceKind::Euclidean;
        config.m = 4;
        config.m0 = 8;
        let mut graph = HnswGraph::new(config).unwrap();
        let mut provider = FlatVectors::new(2);
        for i in 0..64 {
            let v = [(i % 8) as f32, (i / 8) as f32];
            let slot = provider.push(&v);
            graph.insert(slot, &v, &provider).unwrap();
        }
        for idx in 0..64u32 {
            let node = graph.node(SlotId(idx)).unwrap();
            for (layer, list) in node.layers.iter().enumerate() {
                let bound = graph.config().max_degree(layer as u8);
                assert!(
                    list.len() <= bound,
                    "node {idx} layer {layer} degree {} exceeds {bound}",
                    list.len()
                );
            }
        }
    }

    #[test]
    fn edges_stay_symmetric() {
        let mut config = HnswConfig::new(2);
        config.distance = DistanceKind::Euclidean;
        config.m = 4;
        config.m0 = 8;
        let mut graph = HnswGraph::new(config).unwrap();
        let mut provider = FlatVectors::new(2);
        for i in 0..40 {
            let v = [(i as f32).sin(), (i as f32).cos()];
            let slot = provider.push(&v);
            graph.insert(slot, &v, &provider).unwrap();
        }
        for idx in 0..40u32 {
            let node = graph.node(SlotId(idx)).unwrap();
            for (layer, list) in node.layers.iter().enumerate() {
                for &neighbor in list {
                    let back = graph.neighbors(neighbor, layer as u8);
                    assert!(
                        back.contains(&SlotId(idx)),
                        "edge {idx}->{} at layer {layer} missing reverse",
                        neighbor.0
                    );
                }
            }
        }
    }

    #[test]
    fn heuristic_prefers_diverse_neighbors() {
        // Candidates B and C sit on the same side; C is closer to B than
        // to the query, so it must be skipped in favor of D.
        let mut provider = FlatVectors::new(2);
        let b = provider.push(&[1.0, 0.0]);
        let c = provider.push(&[1.2, 0.0]);
        let d = provider.push(&[0.0, 1.5]);
        let query = [0.0, 0.0];

        let mut candidates: Vec<Candidate> = [b, c, d]
            .iter()
            .map(|&slot| Candidate {
                distance: Euclidean::distance(&query, provider.vector(slot)),
                slot,
            })
            .collect();
        candidates.sort();

        let mut selected = Vec::new();
        select_neighbors_heuristic::<Euclidean, _>(&query, &candidates, 2, &provider, &mut selected);
        assert_eq!(selected, vec![b, d]);
    }
}
