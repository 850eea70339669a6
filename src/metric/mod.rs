//! Distance metrics.
//!
//! The search path is monomorphized over a [`Metric`] so the hot loop
//! never branches on the metric kind; the kind is only inspected once at
//! each public entry point to pick the instantiation.

mod cosine;
mod euclidean;

pub use cosine::CosineDistance;
pub use euclidean::Euclidean;

use serde::{Deserialize, Serialize};

/// A distance strategy over `f32` vectors.
///
/// Implementations must be pure and total for finite inputs. Smaller
/// distances mean closer vectors.
pub trait Metric {
    /// Distance between two vectors of equal length.
    fn distance(a: &[f32], b: &[f32]) -> f32;

    /// Maps a distance to a similarity in `[0, 1]`.
    fn similarity(distance: f32) -> f32;
}

/// Metric selected at store construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceKind {
    /// Cosine distance over unit vectors (`1 - dot`).
    #[default]
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
}

impl DistanceKind {
    /// Computes the distance for this kind without monomorphization.
    ///
    /// Used by the linear-scan path and the hybrid similarity estimate,
    /// where the per-call dispatch cost is irrelevant.
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceKind::Cosine => CosineDistance::distance(a, b),
            DistanceKind::Euclidean => Euclidean::distance(a, b),
        }
    }

    /// Maps a distance to a similarity in `[0, 1]` for this kind.
    #[must_use]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            DistanceKind::Cosine => CosineDistance::similarity(distance),
            DistanceKind::Euclidean => Euclidean::similarity(distance),
        }
    }
}
