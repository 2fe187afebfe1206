//! SQLite implementation of the CommunityRepository
//!
//! Id lists and keywords are JSON text columns; embeddings are packed as
//! little-endian f32 blobs. Detection bookkeeping lives in `community_meta`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::community::{Community, CommunityRepository};
use crate::error::{Error, Result};
use crate::infrastructure::knowledge::parse_timestamp;

const CHANGE_COUNTER_KEY: &str = "change_counter";
const LAST_DETECTED_KEY: &str = "last_detected_at";

#[derive(Clone)]
pub struct SqliteCommunityRepository {
    pool: SqlitePool,
}

impl SqliteCommunityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM community_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO community_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CommunityRepository for SqliteCommunityRepository {
    async fn save_batch(&self, communities: &[Community]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for community in communities {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO communities (
                    id, level, parent_community_id, child_community_ids, member_entity_ids,
                    member_count, summary, keywords, embedding, algorithm, modularity,
                    color, stale, created_at, last_refreshed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&community.id)
            .bind(community.level as i64)
            .bind(&community.parent_community_id)
            .bind(serde_json::to_string(&community.child_community_ids)?)
            .bind(serde_json::to_string(&community.member_entity_ids)?)
            .bind(community.member_count as i64)
            .bind(&community.summary)
            .bind(serde_json::to_string(&community.keywords)?)
            .bind(community.embedding.as_deref().map(encode_embedding))
            .bind(&community.algorithm)
            .bind(community.modularity)
            .bind(&community.color)
            .bind(community.stale)
            .bind(community.created_at.to_rfc3339())
            .bind(community.last_refreshed_at.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(count = communities.len(), "Communities saved");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Community>> {
        let row: Option<CommunityRow> = sqlx::query_as("SELECT * FROM communities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_community()).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Community>> {
        let rows: Vec<CommunityRow> =
            sqlx::query_as("SELECT * FROM communities ORDER BY level, created_at, rowid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_community()).collect()
    }

    async fn get_by_level(&self, level: u32) -> Result<Vec<Community>> {
        let rows: Vec<CommunityRow> =
            sqlx::query_as("SELECT * FROM communities WHERE level = ? ORDER BY created_at, rowid")
                .bind(level as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_community()).collect()
    }

    async fn get_children(&self, id: &str) -> Result<Vec<Community>> {
        let Some(parent) = self.get(id).await? else {
            return Err(Error::CommunityNotFound(id.to_string()));
        };

        let rows: Vec<CommunityRow> =
            sqlx::query_as("SELECT * FROM communities WHERE parent_community_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        let mut children: Vec<Community> = rows
            .into_iter()
            .map(|r| r.into_community())
            .collect::<Result<_>>()?;

        let position = |child: &Community| {
            parent
                .child_community_ids
                .iter()
                .position(|c| *c == child.id)
                .unwrap_or(usize::MAX)
        };
        children.sort_by_key(position);
        Ok(children)
    }

    async fn get_roots(&self) -> Result<Vec<Community>> {
        let rows: Vec<CommunityRow> = sqlx::query_as(
            r#"
            SELECT * FROM communities
            WHERE level = (SELECT MAX(level) FROM communities)
            ORDER BY created_at, rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_community()).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM communities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM communities")
            .execute(&self.pool)
            .await?;

        debug!(deleted = result.rows_affected(), "Communities cleared");
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM communities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_stale(&self) -> Result<Vec<Community>> {
        let rows: Vec<CommunityRow> = sqlx::query_as(
            "SELECT * FROM communities WHERE stale = 1 ORDER BY level, created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_community()).collect()
    }

    async fn mark_stale(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE communities SET stale = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_stale(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE communities SET stale = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_stale(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE communities SET stale = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_summary(
        &self,
        id: &str,
        summary: &str,
        keywords: &[String],
        embedding: Option<&[f32]>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE communities
            SET summary = ?, keywords = ?, embedding = ?, last_refreshed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(summary)
        .bind(serde_json::to_string(keywords)?)
        .bind(embedding.map(encode_embedding))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(community_id = %id, keywords = keywords.len(), "Community summary updated");
        Ok(result.rows_affected() > 0)
    }

    async fn increment_change_counter(&self) -> Result<u64> {
        let (value,): (String,) = sqlx::query_as(
            r#"
            INSERT INTO community_meta (key, value) VALUES (?, '1')
            ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            RETURNING value
            "#,
        )
        .bind(CHANGE_COUNTER_KEY)
        .fetch_one(&self.pool)
        .await?;

        parse_counter(&value)
    }

    async fn get_change_counter(&self) -> Result<u64> {
        match self.get_meta(CHANGE_COUNTER_KEY).await? {
            Some(value) => parse_counter(&value),
            None => Ok(0),
        }
    }

    async fn reset_change_counter(&self) -> Result<()> {
        self.set_meta(CHANGE_COUNTER_KEY, "0").await
    }

    async fn set_last_detected_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_meta(LAST_DETECTED_KEY, &at.to_rfc3339()).await
    }

    async fn get_last_detected_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_meta(LAST_DETECTED_KEY)
            .await?
            .map(|value| parse_timestamp(&value))
            .transpose()
    }
}

fn parse_counter(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Other(format!("Invalid change counter '{}'", value)))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct CommunityRow {
    id: String,
    level: i64,
    parent_community_id: Option<String>,
    child_community_ids: String,
    member_entity_ids: String,
    member_count: i64,
    summary: Option<String>,
    keywords: String,
    embedding: Option<Vec<u8>>,
    algorithm: String,
    modularity: f64,
    color: String,
    stale: bool,
    created_at: String,
    last_refreshed_at: Option<String>,
}

impl CommunityRow {
    fn into_community(self) -> Result<Community> {
        Ok(Community {
            level: self.level as u32,
            child_community_ids: serde_json::from_str(&self.child_community_ids)?,
            member_entity_ids: serde_json::from_str(&self.member_entity_ids)?,
            member_count: self.member_count as usize,
            keywords: serde_json::from_str(&self.keywords)?,
            embedding: self.embedding.as_deref().map(decode_embedding),
            created_at: parse_timestamp(&self.created_at)?,
            last_refreshed_at: self
                .last_refreshed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            id: self.id,
            parent_community_id: self.parent_community_id,
            summary: self.summary,
            algorithm: self.algorithm,
            modularity: self.modularity,
            color: self.color,
            stale: self.stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteCommunityRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool).await.expect("Failed to run migrations");

        SqliteCommunityRepository::new(pool)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// root(e1..e3) over [left(e1, e2), right(e3)]
    fn small_forest() -> Vec<Community> {
        let mut left = Community::new(0, ids(&["e1", "e2"]), "louvain").with_modularity(0.42);
        let mut right = Community::new(0, ids(&["e3"]), "louvain");
        let mut root = Community::new(1, ids(&["e1", "e2", "e3"]), "louvain");
        root.child_community_ids = vec![right.id.clone(), left.id.clone()];
        left.parent_community_id = Some(root.id.clone());
        right.parent_community_id = Some(root.id.clone());
        left.embedding = Some(vec![0.25, -1.5, 3.0]);
        left.keywords = ids(&["rust", "async"]);
        vec![left, right, root]
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let repo = setup_test_db().await;
        let communities = small_forest();
        repo.save_batch(&communities).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 3);
        let left = repo.get(&communities[0].id).await.unwrap().unwrap();
        assert_eq!(left, communities[0]);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_levels_roots_and_children() {
        let repo = setup_test_db().await;
        let communities = small_forest();
        repo.save_batch(&communities).await.unwrap();

        assert_eq!(repo.get_by_level(0).await.unwrap().len(), 2);

        let roots = repo.get_roots().await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, communities[2].id);

        // stored child order, not insertion order
        let children = repo.get_children(&communities[2].id).await.unwrap();
        let child_ids: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(child_ids, vec![communities[1].id.as_str(), communities[0].id.as_str()]);

        assert!(matches!(
            repo.get_children("ghost").await,
            Err(Error::CommunityNotFound(_))
        ));

        let hierarchy = repo.get_hierarchy().await.unwrap();
        assert_eq!(hierarchy.total_communities(), 3);
        assert!(hierarchy.validate().is_ok());
    }

    #[tokio::test]
    async fn test_staleness() {
        let repo = setup_test_db().await;
        let communities = small_forest();
        repo.save_batch(&communities).await.unwrap();

        assert!(repo.get_stale().await.unwrap().is_empty());
        assert!(repo.mark_stale(&communities[1].id).await.unwrap());
        assert_eq!(repo.get_stale().await.unwrap().len(), 1);

        assert_eq!(repo.mark_all_stale().await.unwrap(), 3);
        assert_eq!(repo.get_stale().await.unwrap().len(), 3);

        assert!(repo.clear_stale(&communities[0].id).await.unwrap());
        assert_eq!(repo.get_stale().await.unwrap().len(), 2);
        assert!(!repo.mark_stale("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_summary() {
        let repo = setup_test_db().await;
        let communities = small_forest();
        repo.save_batch(&communities).await.unwrap();
        let id = &communities[1].id;

        let updated = repo
            .update_summary(id, "Tooling notes.", &ids(&["cargo"]), Some(&[1.0f32, 0.0][..]))
            .await
            .unwrap();
        assert!(updated);

        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.summary.as_deref(), Some("Tooling notes."));
        assert_eq!(stored.keywords, ids(&["cargo"]));
        assert_eq!(stored.embedding, Some(vec![1.0, 0.0]));
        assert!(stored.last_refreshed_at.is_some());

        repo.update_summary(id, "Again.", &[], None).await.unwrap();
        assert!(repo.get(id).await.unwrap().unwrap().embedding.is_none());
        assert!(!repo.update_summary("ghost", "x", &[], None).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = setup_test_db().await;
        let communities = small_forest();
        repo.save_batch(&communities).await.unwrap();

        assert!(repo.delete(&communities[0].id).await.unwrap());
        assert!(!repo.delete(&communities[0].id).await.unwrap());
        assert_eq!(repo.delete_all().await.unwrap(), 2);
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(repo.get_roots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_counter() {
        let repo = setup_test_db().await;

        assert_eq!(repo.get_change_counter().await.unwrap(), 0);
        assert_eq!(repo.increment_change_counter().await.unwrap(), 1);
        assert_eq!(repo.increment_change_counter().await.unwrap(), 2);
        assert_eq!(repo.get_change_counter().await.unwrap(), 2);

        repo.reset_change_counter().await.unwrap();
        assert_eq!(repo.get_change_counter().await.unwrap(), 0);
        assert_eq!(repo.increment_change_counter().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_detected_at() {
        let repo = setup_test_db().await;
        assert!(repo.get_last_detected_at().await.unwrap().is_none());

        let now = Utc::now();
        repo.set_last_detected_at(now).await.unwrap();
        assert_eq!(repo.get_last_detected_at().await.unwrap(), Some(now));
    }

    #[test]
    fn test_embedding_encoding() {
        let values = vec![0.1f32, -2.0, f32::MAX];
        let bytes = encode_embedding(&values);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes), values);
    }
}
