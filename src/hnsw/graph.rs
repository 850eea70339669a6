use super::config::HnswConfig;
use crate::arena::SlotId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Hard cap on assigned layers, independent of `m`.
const MAX_LEVEL: u8 = 16;

/// Errors raised by graph operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HnswError {
    /// Query or insert vector has the wrong dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Provided vector length.
        actual: usize,
    },

    /// A referenced node is outside the node table.
    #[error("node {0} out of bounds")]
    NodeOutOfBounds(u32),

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Per-slot node state: layer-indexed neighbor lists plus liveness flags.
///
/// `layers[l]` holds the node's neighbors at layer `l`; the node appears
/// on layers `0..=max_layer()`. Edges are kept symmetric: whenever a
/// prune drops `a -> b`, the reverse `b -> a` is dropped too, so a node
/// can be fully detached by walking only its own lists.
#[derive(Clone, Debug, Default)]
pub(crate) struct Node {
    pub(crate) layers: Vec<Vec<SlotId>>,
    pub(crate) tombstone: bool,
    pub(crate) present: bool,
}

impl Node {
    pub(crate) fn max_layer(&self) -> u8 {
        debug_assert!(!self.layers.is_empty());
        (self.layers.len() - 1) as u8
    }
}

/// Multi-layer proximity graph over arena slot IDs.
///
/// The graph holds only adjacency; vector data is read through a
/// [`VectorAccess`] provider at search and insert time.
pub struct HnswGraph {
    /// Algorithm configuration.
    pub(crate) config: HnswConfig,
    /// Node table indexed by slot ID.
    pub(crate) nodes: Vec<Node>,
    /// Entry point: the live node with the highest layer.
    pub(crate) entry_point: Option<SlotId>,
    /// Level probability multiplier, `1 / ln(m)`.
    level_mult: f32,
    /// Deterministic RNG for layer assignment.
    rng: ChaCha8Rng,
    /// Live (present, non-tombstoned) node count.
    live: usize,
}

/// Provides vector data for slot IDs during graph traversal.
pub trait VectorAccess {
    /// The vector stored at `slot`. The slot is guaranteed live for the
    /// duration of the traversal by the caller's locking discipline.
    fn vector(&self, slot: SlotId) -> &[f32];
}

impl VectorAccess for crate::arena::VectorArena {
    fn vector(&self, slot: SlotId) -> &[f32] {
        // Tombstoned ghosts are traversed after their slot is freed, so
        // this reads raw bytes; a freed slot keeps its last contents
        // until the store rewrites it under the write lock.
        self.raw_vector(slot)
    }
}

impl HnswGraph {
    /// Creates an empty graph.
    ///
    /// # Errors
    ///
    /// Returns `HnswError::InvalidConfig` for out-of-range parameters.
    pub fn new(config: HnswConfig) -> Result<Self, HnswError> {
        config.validate()?;
        let level_mult = 1.0 / (config.m as f32).ln();
        Ok(Self {
            config,
            nodes: Vec::new(),
            entry_point: None,
            level_mult,
            rng: ChaCha8Rng::seed_from_u64(42),
            live: 0,
        })
    }

    /// The configuration the graph was built with.
    #[must_use]
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Draws a geometric layer: `floor(-ln(U(0,1)) * level_mult)`.
    pub(crate) fn random_level(&mut self) -> u8 {
        let r: f32 = self.rng.gen_range(f32::EPSILON..=1.0);
        let level = (-r.ln() * self.level_mult).floor();
        if level > f32::from(MAX_LEVEL) {
            MAX_LEVEL
        } else {
            level as u8
        }
    }

    /// Number of live (searchable) nodes.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Current entry point, if any.
    #[must_use]
    pub fn entry_point(&self) -> Option<SlotId> {
        self.entry_point
    }

    /// Layer of the entry point (0 when the graph is empty).
    #[must_use]
    pub fn top_layer(&self) -> u8 {
        self.entry_point
            .and_then(|ep| self.nodes.get(ep.index()))
            .map_or(0, Node::max_layer)
    }

    /// True if the slot currently has a node that can serve results.
    #[must_use]
    pub fn is_live(&self, slot: SlotId) -> bool {
        self.nodes
            .get(slot.index())
            .is_some_and(|n| n.present && !n.tombstone)
    }

    /// True if the slot holds a tombstoned node awaiting reclamation.
    #[must_use]
    pub fn is_tombstoned(&self, slot: SlotId) -> bool {
        self.nodes
            .get(slot.index())
            .is_some_and(|n| n.present && n.tombstone)
    }

    pub(crate) fn node(&self, slot: SlotId) -> Result<&Node, HnswError> {
        self.nodes
            .get(slot.index())
            .filter(|n| n.present)
            .ok_or(HnswError::NodeOutOfBounds(slot.0))
    }

    /// Neighbor list of `slot` at `layer` (empty above the node's level).
    pub(crate) fn neighbors(&self, slot: SlotId, layer: u8) -> &[SlotId] {
        self.nodes
            .get(slot.index())
            .and_then(|n| n.layers.get(layer as usize))
            .map_or(&[], Vec::as_slice)
    }

    /// Installs an empty node for `slot` spanning layers `0..=level`.
    ///
    /// If the slot still carries a tombstoned node from a freed memory,
    /// it is detached first; tombstoned slots are reused only after their
    /// edges are cleared.
    pub(crate) fn ensure_node(&mut self, slot: SlotId, level: u8) {
        if slot.index() >= self.nodes.len() {
            self.nodes.resize_with(slot.index() + 1, Node::default);
        }
        if self.nodes[slot.index()].present {
            self.detach(slot);
        }
        let node = &mut self.nodes[slot.index()];
        node.layers = vec![Vec::new(); level as usize + 1];
        node.tombstone = false;
        node.present = true;
        self.live += 1;
    }

    /// Marks a node tombstoned.
    ///
    /// Searches keep traversing tombstoned nodes (their edges still
    /// provide connectivity) but never return them. When the entry point
    /// dies, the highest-layer surviving node takes over.
    pub fn tombstone(&mut self, slot: SlotId) -> bool {
        let Some(node) = self.nodes.get_mut(slot.index()) else {
            return false;
        };
        if !node.present || node.tombstone {
            return false;
        }
        node.tombstone = true;
        self.live -= 1;
        if self.entry_point == Some(slot) {
            self.promote_entry_point();
        }
        true
    }

    /// Picks the highest-layer live node as the new entry point.
    fn promote_entry_point(&mut self) {
        let mut best: Option<(SlotId, u8)> = None;
        for (idx, node) in self.nodes.iter().enumerate() {
            if !node.present || node.tombstone {
                continue;
            }
            let layer = node.max_layer();
            let candidate = (SlotId(idx as u32), layer);
            best = match best {
                Some((_, l)) if l >= layer => best,
                _ => Some(candidate),
            };
        }
        self.entry_point = best.map(|(slot, _)| slot);
    }

    /// Removes a node and every edge referencing it.
    ///
    /// Relies on edge symmetry: the node appears in exactly the neighbor
    /// lists its own lists point at.
    pub(crate) fn detach(&mut self, slot: SlotId) {
        let Some(node) = self.nodes.get_mut(slot.index()) else {
            return;
        };
        if !node.present {
            return;
        }
        if !node.tombstone {
            self.live -= 1;
        }
        let layers = std::mem::take(&mut node.layers);
        node.present = false;
        node.tombstone = false;
        for (layer, neighbors) in layers.iter().enumerate() {
            for &neighbor in neighbors {
                if let Some(other) = self.nodes.get_mut(neighbor.index()) {
                    if let Some(list) = other.layers.get_mut(layer) {
                        list.retain(|&s| s != slot);
                    }
                }
            }
        }
        if self.entry_point == Some(slot) {
            self.promote_entry_point();
        }
    }

    /// Approximate resident bytes of the node table.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let mut bytes = self.nodes.capacity() * std::mem::size_of::<Node>();
        for node in &self.nodes {
            bytes += node.layers.capacity() * std::mem::size_of::<Vec<SlotId>>();
            for layer in &node.layers {
                bytes += layer.capacity() * std::mem::size_of::<SlotId>();
            }
        }
        bytes
    }
}
