//! Knowledge graph service
//!
//! Mutations go through here so every persisted change is followed by a
//! [`KnowledgeEvent`] on a broadcast channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::entity::KnowledgeEntity;
use super::event::KnowledgeEvent;
use super::relationship::KnowledgeRelationship;
use super::repository::KnowledgeGraphRepository;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct KnowledgeGraphService<R: KnowledgeGraphRepository + ?Sized> {
    repository: Arc<R>,
    events: broadcast::Sender<KnowledgeEvent>,
}

impl<R: KnowledgeGraphRepository + ?Sized> KnowledgeGraphService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { repository, events }
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<KnowledgeEvent> {
        self.events.subscribe()
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub async fn create_entity(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<KnowledgeEntity> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(Error::InvalidInput("Entity title cannot be empty".to_string()));
        }

        let entity = KnowledgeEntity::new(title).with_content(content);
        self.repository.save_entity(&entity).await?;

        info!(entity_id = %entity.id, title = %entity.title, "Entity created");
        self.publish(KnowledgeEvent::entity_created(&entity.id, &entity.title));
        Ok(entity)
    }

    /// Change the title and/or body of an existing entity
    pub async fn update_entity(
        &self,
        id: &str,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<KnowledgeEntity> {
        let mut entity = self
            .repository
            .get_entity(id)
            .await?
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))?;

        if let Some(title) = title {
            entity.rename(title);
        }
        if let Some(content) = content {
            entity.set_content(content);
        }

        self.repository.save_entity(&entity).await?;
        self.publish(KnowledgeEvent::entity_updated(&entity.id));
        Ok(entity)
    }

    pub async fn delete_entity(&self, id: &str) -> Result<bool> {
        let deleted = self.repository.delete_entity(id).await?;
        if deleted {
            self.publish(KnowledgeEvent::entity_deleted(id));
        }
        Ok(deleted)
    }

    /// Link two existing entities
    pub async fn connect(
        &self,
        source_id: &str,
        target_id: &str,
        label: Option<String>,
        confidence: Option<f32>,
    ) -> Result<KnowledgeRelationship> {
        if source_id == target_id {
            return Err(Error::InvalidInput(
                "An entity cannot be related to itself".to_string(),
            ));
        }
        for id in [source_id, target_id] {
            if self.repository.get_entity(id).await?.is_none() {
                return Err(Error::EntityNotFound(id.to_string()));
            }
        }

        let mut relationship = KnowledgeRelationship::new(source_id, target_id);
        if let Some(label) = label {
            relationship = relationship.with_label(label);
        }
        if let Some(confidence) = confidence {
            relationship = relationship.with_confidence(confidence);
        }

        self.repository.save_relationship(&relationship).await?;

        debug!(
            relationship_id = %relationship.id,
            source = %source_id,
            target = %target_id,
            "Relationship created"
        );
        self.publish(KnowledgeEvent::relationship_created(
            &relationship.id,
            source_id,
            target_id,
        ));
        Ok(relationship)
    }

    pub async fn disconnect(&self, relationship_id: &str) -> Result<bool> {
        let deleted = self.repository.delete_relationship(relationship_id).await?;
        if deleted {
            self.publish(KnowledgeEvent::relationship_deleted(relationship_id));
        }
        Ok(deleted)
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<KnowledgeEntity>> {
        self.repository.get_entity(id).await
    }

    pub async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>> {
        self.repository.list_entities().await
    }

    pub async fn list_relationships(&self) -> Result<Vec<KnowledgeRelationship>> {
        self.repository.list_relationships().await
    }

    fn publish(&self, event: KnowledgeEvent) {
        // no subscribers is not an error
        if self.events.send(event).is_err() {
            debug!("Knowledge event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::knowledge::SqliteKnowledgeGraphRepository;
    use crate::storage::Database;

    async fn service() -> KnowledgeGraphService<SqliteKnowledgeGraphRepository> {
        let db = Database::in_memory().await.unwrap();
        KnowledgeGraphService::new(Arc::new(SqliteKnowledgeGraphRepository::new(
            db.pool().clone(),
        )))
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let service = service().await;
        let mut rx = service.subscribe();

        let a = service.create_entity("A", "alpha").await.unwrap();
        let b = service.create_entity("B", "beta").await.unwrap();
        let rel = service.connect(&a.id, &b.id, Some("cites".into()), Some(0.5)).await.unwrap();
        service.update_entity(&a.id, None, Some("alpha 2".into())).await.unwrap();
        assert!(service.disconnect(&rel.id).await.unwrap());
        assert!(service.delete_entity(&b.id).await.unwrap());

        let names: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "entity_created",
                "entity_created",
                "relationship_created",
                "entity_updated",
                "relationship_deleted",
                "entity_deleted",
            ]
        );
    }

    #[tokio::test]
    async fn test_noop_mutations_do_not_publish() {
        let service = service().await;
        let mut rx = service.subscribe();

        assert!(!service.delete_entity("missing").await.unwrap());
        assert!(!service.disconnect("missing").await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_validates_endpoints() {
        let service = service().await;
        let a = service.create_entity("A", "").await.unwrap();

        assert!(matches!(
            service.connect(&a.id, &a.id, None, None).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.connect(&a.id, "ghost", None, None).await,
            Err(Error::EntityNotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_create_entity_requires_title() {
        let service = service().await;
        assert!(matches!(
            service.create_entity("  ", "body").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_works_without_subscribers() {
        let service = service().await;
        let entity = service.create_entity("Lonely", "").await.unwrap();
        assert_eq!(service.list_entities().await.unwrap(), vec![entity]);
    }
}
