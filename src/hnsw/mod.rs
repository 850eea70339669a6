//! HNSW approximate-nearest-neighbor index.
//!
//! A multi-layer proximity graph over arena slot IDs. Supports insert,
//! tombstone deletion, and k-NN search; vector data stays in the arena
//! and is read through the [`VectorAccess`] trait during traversal.

mod config;
mod graph;
mod insert;
mod search;

pub use config::HnswConfig;
pub use graph::{HnswError, HnswGraph, VectorAccess};
pub use search::Neighbor;
