//! SQLite implementation of the KnowledgeGraphRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::knowledge::{KnowledgeEntity, KnowledgeGraphRepository, KnowledgeRelationship};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct SqliteKnowledgeGraphRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeGraphRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeGraphRepository for SqliteKnowledgeGraphRepository {
    async fn save_entity(&self, entity: &KnowledgeEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_entities (id, title, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.title)
        .bind(&entity.content)
        .bind(entity.created_at.to_rfc3339())
        .bind(entity.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(entity_id = %entity.id, title = %entity.title, "Entity saved");
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<KnowledgeEntity>> {
        let row: Option<EntityRow> = sqlx::query_as("SELECT * FROM knowledge_entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_entity()).transpose()
    }

    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>> {
        let rows: Vec<EntityRow> =
            sqlx::query_as("SELECT * FROM knowledge_entities ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_entities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(entity_id = %id, "Entity deleted");
        }
        Ok(deleted)
    }

    async fn count_entities(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn save_relationship(&self, relationship: &KnowledgeRelationship) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_relationships (
                id, source_entity_id, target_entity_id, label, confidence, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.source_entity_id)
        .bind(&relationship.target_entity_id)
        .bind(&relationship.label)
        .bind(relationship.confidence)
        .bind(relationship.created_at.to_rfc3339())
        .bind(relationship.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            relationship_id = %relationship.id,
            source = %relationship.source_entity_id,
            target = %relationship.target_entity_id,
            "Relationship saved"
        );
        Ok(())
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<KnowledgeRelationship>> {
        let row: Option<RelationshipRow> =
            sqlx::query_as("SELECT * FROM knowledge_relationships WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_relationship()).transpose()
    }

    async fn list_relationships(&self) -> Result<Vec<KnowledgeRelationship>> {
        let rows: Vec<RelationshipRow> =
            sqlx::query_as("SELECT * FROM knowledge_relationships ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<KnowledgeRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT * FROM knowledge_relationships
            WHERE source_entity_id = ? OR target_entity_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(entity_id)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    async fn delete_relationship(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_relationships WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_relationships(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_relationships")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    title: String,
    content: String,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<KnowledgeEntity> {
        Ok(KnowledgeEntity {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            title: self.title,
            content: self.content,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    id: String,
    source_entity_id: String,
    target_entity_id: String,
    label: Option<String>,
    confidence: Option<f32>,
    created_at: String,
    updated_at: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<KnowledgeRelationship> {
        Ok(KnowledgeRelationship {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            source_entity_id: self.source_entity_id,
            target_entity_id: self.target_entity_id,
            label: self.label,
            confidence: self.confidence,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteKnowledgeGraphRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("Failed to enable foreign keys");

        run_migrations(&pool).await.expect("Failed to run migrations");

        SqliteKnowledgeGraphRepository::new(pool)
    }

    #[tokio::test]
    async fn test_save_and_get_entity() {
        let repo = setup_test_db().await;

        let entity = KnowledgeEntity::new("Tokio").with_content("Async runtime for Rust");
        repo.save_entity(&entity).await.unwrap();

        let retrieved = repo.get_entity(&entity.id).await.unwrap().unwrap();
        assert_eq!(retrieved, entity);
        assert!(repo.get_entity("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_entity_upserts() {
        let repo = setup_test_db().await;

        let mut entity = KnowledgeEntity::new("Draft");
        repo.save_entity(&entity).await.unwrap();
        entity.rename("Final");
        repo.save_entity(&entity).await.unwrap();

        assert_eq!(repo.count_entities().await.unwrap(), 1);
        assert_eq!(repo.get_entity(&entity.id).await.unwrap().unwrap().title, "Final");
    }

    #[tokio::test]
    async fn test_relationship_round_trip() {
        let repo = setup_test_db().await;
        let a = KnowledgeEntity::new("A");
        let b = KnowledgeEntity::new("B");
        repo.save_entity(&a).await.unwrap();
        repo.save_entity(&b).await.unwrap();

        let rel = KnowledgeRelationship::new(&a.id, &b.id)
            .with_label("part of")
            .with_confidence(0.75);
        repo.save_relationship(&rel).await.unwrap();

        let retrieved = repo.get_relationship(&rel.id).await.unwrap().unwrap();
        assert_eq!(retrieved.label.as_deref(), Some("part of"));
        assert_eq!(retrieved.confidence, Some(0.75));
        assert_eq!(repo.list_relationships_for_entity(&b.id).await.unwrap().len(), 1);
        assert_eq!(repo.count_relationships().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_relationship_requires_existing_entities() {
        let repo = setup_test_db().await;
        let a = KnowledgeEntity::new("A");
        repo.save_entity(&a).await.unwrap();

        let dangling = KnowledgeRelationship::new(&a.id, "nowhere");
        assert!(matches!(
            repo.save_relationship(&dangling).await,
            Err(Error::DatabaseError(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_entity_cascades() {
        let repo = setup_test_db().await;
        let a = KnowledgeEntity::new("A");
        let b = KnowledgeEntity::new("B");
        let c = KnowledgeEntity::new("C");
        for e in [&a, &b, &c] {
            repo.save_entity(e).await.unwrap();
        }
        repo.save_relationship(&KnowledgeRelationship::new(&a.id, &b.id)).await.unwrap();
        repo.save_relationship(&KnowledgeRelationship::new(&b.id, &c.id)).await.unwrap();

        assert!(repo.delete_entity(&b.id).await.unwrap());
        assert!(!repo.delete_entity(&b.id).await.unwrap());
        assert_eq!(repo.count_relationships().await.unwrap(), 0);
        assert_eq!(repo.count_entities().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_entities_keeps_insertion_order() {
        let repo = setup_test_db().await;
        let titles = ["first", "second", "third"];
        for title in titles {
            repo.save_entity(&KnowledgeEntity::new(title)).await.unwrap();
        }

        let listed: Vec<String> = repo
            .list_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(listed, titles);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2024-05-01T10:00:00+00:00").is_ok());
    }
}
