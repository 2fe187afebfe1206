//! Repository trait for knowledge graph persistence

use async_trait::async_trait;

use crate::error::Result;

use super::entity::KnowledgeEntity;
use super::relationship::KnowledgeRelationship;

/// Storage for entities and relationships
#[async_trait]
pub trait KnowledgeGraphRepository: Send + Sync {
    // ========== Entity Operations ==========

    /// Insert or update an entity
    async fn save_entity(&self, entity: &KnowledgeEntity) -> Result<()>;

    async fn get_entity(&self, id: &str) -> Result<Option<KnowledgeEntity>>;

    /// All entities ordered by creation time
    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>>;

    /// Delete an entity and, through the foreign keys, its relationships
    async fn delete_entity(&self, id: &str) -> Result<bool>;

    async fn count_entities(&self) -> Result<u64>;

    // ========== Relationship Operations ==========

    /// Insert or update a relationship
    async fn save_relationship(&self, relationship: &KnowledgeRelationship) -> Result<()>;

    async fn get_relationship(&self, id: &str) -> Result<Option<KnowledgeRelationship>>;

    /// All relationships ordered by creation time
    async fn list_relationships(&self) -> Result<Vec<KnowledgeRelationship>>;

    /// Relationships with the entity as source or target
    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<KnowledgeRelationship>>;

    async fn delete_relationship(&self, id: &str) -> Result<bool>;

    async fn count_relationships(&self) -> Result<u64>;
}
