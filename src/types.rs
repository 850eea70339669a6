//! Core domain enums shared across the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Classification of a stored memory.
///
/// This is a closed set; unknown strings are rejected during
/// deserialization rather than silently mapped to a default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A conversational turn (user or assistant message).
    Conversation,
    /// A standalone fact about the user or the world.
    Fact,
    /// A stated preference.
    Preference,
    /// Ambient context (environment, task state).
    Context,
    /// System-originated content (instructions, summaries).
    System,
}

impl MemoryType {
    /// All memory types, in persistence-tag order.
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Conversation,
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Context,
        MemoryType::System,
    ];

    /// The string tag used in persisted metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Context => "context",
            MemoryType::System => "system",
        }
    }

    /// Parses a persisted tag. Returns `None` for anything outside the set.
    #[must_use]
    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "conversation" => Some(MemoryType::Conversation),
            "fact" => Some(MemoryType::Fact),
            "preference" => Some(MemoryType::Preference),
            "context" => Some(MemoryType::Context),
            "system" => Some(MemoryType::System),
            _ => None,
        }
    }

    pub(crate) fn to_code(self) -> u8 {
        match self {
            MemoryType::Conversation => 0,
            MemoryType::Fact => 1,
            MemoryType::Preference => 2,
            MemoryType::Context => 3,
            MemoryType::System => 4,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MemoryType::Conversation),
            1 => Some(MemoryType::Fact),
            2 => Some(MemoryType::Preference),
            3 => Some(MemoryType::Context),
            4 => Some(MemoryType::System),
            _ => None,
        }
    }
}

/// Who produced a conversational memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human side of the exchange.
    User,
    /// The agent side of the exchange.
    Assistant,
}

impl Speaker {
    pub(crate) fn to_code(self) -> u8 {
        match self {
            Speaker::User => 1,
            Speaker::Assistant => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Speaker::User),
            2 => Some(Speaker::Assistant),
            _ => None,
        }
    }
}

/// Caller-supplied context attached to a memory at ingestion time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Conversation this memory belongs to, if any.
    pub conversation_id: Option<Uuid>,
    /// Speaker tag for conversational memories.
    pub speaker: Option<Speaker>,
    /// Importance in `[0, 1]`; defaults to 0.5 when absent.
    pub importance: Option<f32>,
    /// Event timestamp in epoch milliseconds; defaults to ingestion time.
    pub timestamp_ms: Option<i64>,
    /// Free-form extra context, persisted verbatim.
    #[serde(default)]
    pub extra: Value,
}

impl MemoryContext {
    /// Context for one side of a conversation exchange.
    #[must_use]
    pub fn conversational(conversation_id: Uuid, speaker: Speaker) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            speaker: Some(speaker),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_tags_round_trip() {
        for ty in MemoryType::ALL {
            assert_eq!(MemoryType::from_str_tag(ty.as_str()), Some(ty));
            assert_eq!(MemoryType::from_code(ty.to_code()), Some(ty));
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(MemoryType::from_str_tag("episodic"), None);
        let parsed: Result<MemoryType, _> = serde_json::from_str("\"episodic\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn speaker_codes_round_trip() {
        assert_eq!(Speaker::from_code(Speaker::User.to_code()), Some(Speaker::User));
        assert_eq!(
            Speaker::from_code(Speaker::Assistant.to_code()),
            Some(Speaker::Assistant)
        );
        assert_eq!(Speaker::from_code(0), None);
    }
}
