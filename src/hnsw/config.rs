use crate::metric::DistanceKind;
use serde::{Deserialize, Serialize};

use super::HnswError;

/// HNSW algorithm parameters.
///
/// # Parameter Guidelines (from the paper)
/// - `m`: 12-48 for high recall, 4-8 for speed
/// - `ef_construction`: higher = better build quality, slower insert
/// - `ef_search`: higher = better recall, slower search
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HnswConfig {
    /// Max connections per node in layers > 0.
    pub m: u32,

    /// Max connections per node in layer 0 (typically `2 * m`).
    pub m0: u32,

    /// Construction-time beam width.
    pub ef_construction: u32,

    /// Search-time beam width.
    pub ef_search: u32,

    /// Vector dimensionality.
    pub dimensions: u32,

    /// Distance strategy, fixed at construction.
    #[serde(default)]
    pub distance: DistanceKind,
}

impl HnswConfig {
    /// Creates the default configuration for a dimensionality.
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef_search: 50,
            dimensions,
            distance: DistanceKind::Cosine,
        }
    }

    /// Maximum degree for a layer.
    #[must_use]
    pub fn max_degree(&self, layer: u8) -> usize {
        if layer == 0 {
            self.m0 as usize
        } else {
            self.m as usize
        }
    }

    /// Validates parameter ranges.
    ///
    /// # Errors
    ///
    /// `HnswError::InvalidConfig` when `m <= 1`, `m0 < m`, the beam
    /// widths are zero, or the dimensionality is zero.
    pub fn validate(&self) -> Result<(), HnswError> {
        if self.m <= 1 {
            return Err(HnswError::InvalidConfig(format!(
                "m must be > 1, got {}",
                self.m
            )));
        }
        if self.m0 < self.m {
            return Err(HnswError::InvalidConfig(format!(
                "m0 must be >= m, got {} < {}",
                self.m0, self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(HnswError::InvalidConfig(
                "ef_construction and ef_search must be > 0".to_string(),
            ));
        }
        if self.dimensions == 0 {
            return Err(HnswError::InvalidConfig(
                "dimensions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
