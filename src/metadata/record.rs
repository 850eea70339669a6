//! The bit-stable metadata record.

use crate::arena::SlotMeta;
use crate::types::{MemoryType, Speaker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Engine-owned fields nested under the record's custom block.
///
/// The serialized key names are part of the persisted format and must
/// not change between releases.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCustomMetadata {
    /// The memory's original text. Content lives only here, never in
    /// the vector arena.
    pub original_content: String,
    /// Memory classification, persisted as its string tag.
    pub memory_type: MemoryType,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Conversation grouping, if any.
    pub conversation_id: Option<Uuid>,
    /// Speaker tag for conversational memories.
    pub speaker: Option<Speaker>,
    /// Event timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Provider that embedded the content.
    pub embedding_provider: String,
    /// Model that embedded the content.
    pub embedding_model: String,
    /// Free-form caller context, persisted verbatim.
    #[serde(default)]
    pub context: Value,
}

/// A persisted memory-metadata record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadataRecord {
    /// Memory ID (matches the vector store's external ID).
    pub id: Uuid,
    /// Dimensionality of the embedded vector.
    pub dimensions: usize,
    /// Owning persona.
    pub persona_id: Option<Uuid>,
    /// MIME-ish content tag, `text/plain` for memories.
    pub content_type: String,
    /// Producer of the record.
    pub source: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Record creation time, epoch milliseconds.
    pub created_at: i64,
    /// Engine-owned payload.
    pub custom_metadata: MemoryCustomMetadata,
}

impl VectorMetadataRecord {
    /// Rebuilds the inline slot metadata this record mirrors.
    ///
    /// Used by the cold-start reload path to replay vector adds with the
    /// same slot metadata the original ingestion wrote.
    #[must_use]
    pub fn slot_meta(&self) -> Option<SlotMeta> {
        let persona = self.persona_id?;
        Some(SlotMeta::new(
            persona,
            self.custom_metadata.conversation_id,
            self.custom_metadata.memory_type,
            self.custom_metadata.speaker,
            self.custom_metadata.importance,
            self.created_at,
            self.custom_metadata.timestamp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VectorMetadataRecord {
        VectorMetadataRecord {
            id: Uuid::new_v4(),
            dimensions: 64,
            persona_id: Some(Uuid::new_v4()),
            content_type: "text/plain".to_string(),
            source: "memory-manager".to_string(),
            tags: vec!["memory".to_string()],
            created_at: 1_700_000_000_000,
            custom_metadata: MemoryCustomMetadata {
                original_content: "The user's favorite color is green.".to_string(),
                memory_type: MemoryType::Preference,
                importance: 0.8,
                conversation_id: None,
                speaker: Some(Speaker::User),
                timestamp: 1_700_000_000_000,
                embedding_provider: "local".to_string(),
                embedding_model: "default".to_string(),
                context: serde_json::json!({"channel": "chat"}),
            },
        }
    }

    #[test]
    fn serialized_field_names_are_stable() {
        let json = serde_json::to_value(record()).unwrap();
        let custom = &json["customMetadata"];
        assert_eq!(custom["originalContent"], "The user's favorite color is green.");
        assert_eq!(custom["memoryType"], "preference");
        assert_eq!(custom["speaker"], "user");
        assert!(json["personaId"].is_string());
        assert!(json["createdAt"].is_i64());
        assert!(custom["embeddingProvider"].is_string());
    }

    #[test]
    fn round_trips_through_json() {
        let original = record();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: VectorMetadataRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.custom_metadata.memory_type, MemoryType::Preference);
        assert_eq!(
            parsed.custom_metadata.original_content,
            original.custom_metadata.original_content
        );
    }

    #[test]
    fn slot_meta_mirrors_record_fields() {
        let r = record();
        let meta = r.slot_meta().unwrap();
        assert_eq!(meta.persona(), r.persona_id.unwrap());
        assert_eq!(meta.kind(), MemoryType::Preference);
        assert_eq!(meta.speaker_tag(), Some(Speaker::User));
        assert_eq!(meta.timestamp_ms, r.custom_metadata.timestamp);
    }
}
