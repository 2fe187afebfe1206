//! Repository trait for community persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::entity::{Community, CommunityHierarchy};

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    // ========== Structure ==========

    /// Insert or replace every community in one write
    async fn save_batch(&self, communities: &[Community]) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Community>>;

    /// Every community, ordered by level then creation
    async fn list_all(&self) -> Result<Vec<Community>>;

    async fn get_by_level(&self, level: u32) -> Result<Vec<Community>>;

    /// Children of a community in stored child order
    async fn get_children(&self, id: &str) -> Result<Vec<Community>>;

    /// Communities at the highest level present
    async fn get_roots(&self) -> Result<Vec<Community>>;

    async fn get_hierarchy(&self) -> Result<CommunityHierarchy> {
        Ok(CommunityHierarchy::from_communities(self.list_all().await?))
    }

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn delete_all(&self) -> Result<u64>;

    async fn count(&self) -> Result<u64>;

    // ========== Staleness & summaries ==========

    async fn get_stale(&self) -> Result<Vec<Community>>;

    async fn mark_stale(&self, id: &str) -> Result<bool>;

    async fn mark_all_stale(&self) -> Result<u64>;

    async fn clear_stale(&self, id: &str) -> Result<bool>;

    /// Replace summary, keywords and embedding and stamp `last_refreshed_at`
    async fn update_summary(
        &self,
        id: &str,
        summary: &str,
        keywords: &[String],
        embedding: Option<&[f32]>,
    ) -> Result<bool>;

    // ========== Detection bookkeeping ==========

    /// Returns the new value
    async fn increment_change_counter(&self) -> Result<u64>;

    async fn get_change_counter(&self) -> Result<u64>;

    async fn reset_change_counter(&self) -> Result<()>;

    async fn set_last_detected_at(&self, at: DateTime<Utc>) -> Result<()>;

    async fn get_last_detected_at(&self) -> Result<Option<DateTime<Utc>>>;
}
