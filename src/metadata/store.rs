//! In-memory reference implementation of [`MetadataStore`].

use super::{MetadataError, MetadataQuery, MetadataStore, VectorMetadataRecord};
use crate::persona::PersonaRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe in-memory metadata store.
///
/// Keeps records in `RwLock`-guarded maps. Suitable for tests and
/// single-process deployments; durable backends implement the same trait
/// over a database.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<Uuid, VectorMetadataRecord>>,
    personas: RwLock<HashMap<Uuid, PersonaRecord>>,
}

impl MemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored metadata records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_vector_metadata(
        &self,
        record: VectorMetadataRecord,
    ) -> Result<(), MetadataError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(MetadataError::Conflict(format!(
                "metadata record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get_vector_metadata(
        &self,
        id: Uuid,
    ) -> Result<Option<VectorMetadataRecord>, MetadataError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete_vector_metadata(&self, id: Uuid) -> Result<bool, MetadataError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn search_vector_metadata(
        &self,
        query: &MetadataQuery,
    ) -> Result<Vec<VectorMetadataRecord>, MetadataError> {
        let records = self.records.read().await;
        let mut matched: Vec<VectorMetadataRecord> = records
            .values()
            .filter(|r| query.persona_id.is_none() || r.persona_id == query.persona_id)
            .cloned()
            .collect();
        // Stable order so offset/limit paging sees each record once.
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let end = query
            .limit
            .map_or(matched.len(), |limit| (query.offset + limit).min(matched.len()));
        let start = query.offset.min(matched.len());
        Ok(matched[start..end.max(start)].to_vec())
    }

    async fn insert_persona(&self, record: PersonaRecord) -> Result<(), MetadataError> {
        let mut personas = self.personas.write().await;
        if personas.contains_key(&record.id) {
            return Err(MetadataError::Conflict(format!(
                "persona {} already exists",
                record.id
            )));
        }
        personas.insert(record.id, record);
        Ok(())
    }

    async fn get_persona(&self, id: Uuid) -> Result<Option<PersonaRecord>, MetadataError> {
        Ok(self.personas.read().await.get(&id).cloned())
    }

    async fn list_personas(
        &self,
        user_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<PersonaRecord>, MetadataError> {
        let personas = self.personas.read().await;
        let mut matched: Vec<PersonaRecord> = personas
            .values()
            .filter(|p| p.user_id == user_id && (include_inactive || p.active))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn update_persona(&self, record: PersonaRecord) -> Result<(), MetadataError> {
        let mut personas = self.personas.write().await;
        if !personas.contains_key(&record.id) {
            return Err(MetadataError::NotFound(record.id));
        }
        personas.insert(record.id, record);
        Ok(())
    }

    async fn delete_persona(&self, id: Uuid) -> Result<(), MetadataError> {
        let mut personas = self.personas.write().await;
        let record = personas.get_mut(&id).ok_or(MetadataError::NotFound(id))?;
        record.active = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryCustomMetadata;
    use crate::persona::PersonaConfig;
    use crate::types::MemoryType;

    fn record(persona: Uuid, created_at: i64) -> VectorMetadataRecord {
        VectorMetadataRecord {
            id: Uuid::new_v4(),
            dimensions: 8,
            persona_id: Some(persona),
            content_type: "text/plain".to_string(),
            source: "test".to_string(),
            tags: Vec::new(),
            created_at,
            custom_metadata: MemoryCustomMetadata {
                original_content: "content".to_string(),
                memory_type: MemoryType::Fact,
                importance: 0.5,
                conversation_id: None,
                speaker: None,
                timestamp: created_at,
                embedding_provider: "local".to_string(),
                embedding_model: "default".to_string(),
                context: serde_json::Value::Null,
            },
        }
    }

    #[tokio::test]
    async fn insert_get_delete_round_trip() {
        let store = MemoryMetadataStore::new();
        let r = record(Uuid::new_v4(), 1);
        let id = r.id;
        store.insert_vector_metadata(r).await.unwrap();
        assert!(store.get_vector_metadata(id).await.unwrap().is_some());
        assert!(store.delete_vector_metadata(id).await.unwrap());
        assert!(!store.delete_vector_metadata(id).await.unwrap());
        assert!(store.get_vector_metadata(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryMetadataStore::new();
        let r = record(Uuid::new_v4(), 1);
        store.insert_vector_metadata(r.clone()).await.unwrap();
        assert!(matches!(
            store.insert_vector_metadata(r).await,
            Err(MetadataError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn search_pages_in_stable_order() {
        let store = MemoryMetadataStore::new();
        let persona = Uuid::new_v4();
        for i in 0..7 {
            store
                .insert_vector_metadata(record(persona, i))
                .await
                .unwrap();
        }
        store
            .insert_vector_metadata(record(Uuid::new_v4(), 99))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = store
                .search_vector_metadata(&MetadataQuery {
                    persona_id: Some(persona),
                    limit: Some(3),
                    offset,
                })
                .await
                .unwrap();
            if page.is_empty() {
                break;
            }
            offset += page.len();
            seen.extend(page.into_iter().map(|r| r.id));
        }
        assert_eq!(seen.len(), 7);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 7);
    }

    #[tokio::test]
    async fn persona_soft_delete_and_listing() {
        let store = MemoryMetadataStore::new();
        let user = Uuid::new_v4();
        let p1 = PersonaRecord::new(user, PersonaConfig::default(), 1);
        let p2 = PersonaRecord::new(user, PersonaConfig::default(), 2);
        let id1 = p1.id;
        store.insert_persona(p1).await.unwrap();
        store.insert_persona(p2).await.unwrap();

        store.delete_persona(id1).await.unwrap();
        let active = store.list_personas(user, false).await.unwrap();
        assert_eq!(active.len(), 1);
        let all = store.list_personas(user, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(!store.get_persona(id1).await.unwrap().unwrap().active);

        assert!(matches!(
            store.delete_persona(Uuid::new_v4()).await,
            Err(MetadataError::NotFound(_))
        ));
    }
}
