//! Persona records and configuration.

use crate::error::EngramError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounds for `max_memory_size`.
pub const MEMORY_SIZE_RANGE: std::ops::RangeInclusive<usize> = 10..=10_000;

/// Bounds for `memory_decay_ms`: one minute to one year.
pub const DECAY_RANGE_MS: std::ops::RangeInclusive<i64> = 60_000..=31_536_000_000;

/// Maximum persona name length.
const MAX_NAME_LEN: usize = 100;

/// Caller-supplied persona configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    /// Human-readable label.
    pub name: String,
    /// Capacity bound on stored memories.
    pub max_memory_size: usize,
    /// Age past which memories expire, in milliseconds.
    pub memory_decay_ms: i64,
    /// Embedding provider identifier recorded with each memory.
    pub embedding_provider: String,
    /// Embedding model identifier recorded with each memory.
    pub embedding_model: String,
    /// Default minimum similarity for retrievals.
    pub memory_retrieval_threshold: f32,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_memory_size: 1_000,
            memory_decay_ms: 30 * 24 * 60 * 60 * 1_000,
            embedding_provider: "local".to_string(),
            embedding_model: "default".to_string(),
            memory_retrieval_threshold: 0.0,
        }
    }
}

impl PersonaConfig {
    /// Validates all documented ranges.
    ///
    /// # Errors
    ///
    /// `EngramError::Validation` with the first violated constraint.
    pub fn validate(&self) -> Result<(), EngramError> {
        if self.name.trim().is_empty() {
            return Err(EngramError::validation("persona name is empty"));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(EngramError::validation(format!(
                "persona name exceeds {MAX_NAME_LEN} chars"
            )));
        }
        if !MEMORY_SIZE_RANGE.contains(&self.max_memory_size) {
            return Err(EngramError::validation(format!(
                "max_memory_size {} outside [{}, {}]",
                self.max_memory_size,
                MEMORY_SIZE_RANGE.start(),
                MEMORY_SIZE_RANGE.end()
            )));
        }
        if !DECAY_RANGE_MS.contains(&self.memory_decay_ms) {
            return Err(EngramError::validation(format!(
                "memory_decay_ms {} outside [{}, {}]",
                self.memory_decay_ms,
                DECAY_RANGE_MS.start(),
                DECAY_RANGE_MS.end()
            )));
        }
        if !(0.0..=1.0).contains(&self.memory_retrieval_threshold) {
            return Err(EngramError::validation(format!(
                "memory_retrieval_threshold {} outside [0, 1]",
                self.memory_retrieval_threshold
            )));
        }
        Ok(())
    }
}

/// A persisted persona.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaRecord {
    /// Persona identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Configuration snapshot.
    pub config: PersonaConfig,
    /// False after a soft delete.
    pub active: bool,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: i64,
}

impl PersonaRecord {
    /// Builds a new active persona.
    #[must_use]
    pub fn new(user_id: Uuid, config: PersonaConfig, created_at_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            config,
            active: true,
            created_at_ms,
        }
    }
}
