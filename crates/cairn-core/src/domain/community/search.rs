//! Semantic search over leaf community summaries

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::entity::Community;
use super::repository::CommunityRepository;
use crate::domain::knowledge::KnowledgeGraphRepository;
use crate::domain::similarity::cosine_similarity;
use crate::error::{Error, Result};
use crate::llm::Embedder;

/// Members attached to each hit
pub const MAX_MEMBER_PREVIEWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberPreview {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunitySearchHit {
    pub community: Community,
    pub score: f32,
    pub members: Vec<MemberPreview>,
}

pub struct CommunitySearchService {
    embedder: Arc<dyn Embedder>,
    communities: Arc<dyn CommunityRepository>,
    entities: Arc<dyn KnowledgeGraphRepository>,
}

impl CommunitySearchService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        communities: Arc<dyn CommunityRepository>,
        entities: Arc<dyn KnowledgeGraphRepository>,
    ) -> Self {
        Self {
            embedder,
            communities,
            entities,
        }
    }

    /// Level-0 communities ranked by similarity between the query and
    /// their summary embedding
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<CommunitySearchHit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding.into_vec(),
            Err(Error::EmbeddingFailed(message)) => return Err(Error::EmbeddingFailed(message)),
            Err(e) => return Err(Error::EmbeddingFailed(e.to_string())),
        };

        let mut scored: Vec<(f32, Community)> = self
            .communities
            .get_by_level(0)
            .await?
            .into_iter()
            .filter(|c| c.has_summary() && c.has_embedding())
            .map(|c| {
                let score = cosine_similarity(&query_embedding, c.embedding.as_deref().unwrap_or_default());
                (score, c)
            })
            .collect();

        let candidates = scored.len();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (score, community) in scored {
            let mut members = Vec::new();
            for id in &community.member_entity_ids {
                if members.len() == MAX_MEMBER_PREVIEWS {
                    break;
                }
                if let Some(entity) = self.entities.get_entity(id).await? {
                    members.push(MemberPreview {
                        id: entity.id,
                        title: entity.title,
                    });
                }
            }
            hits.push(CommunitySearchHit {
                community,
                score,
                members,
            });
        }

        debug!(candidates, hits = hits.len(), "Community search");
        Ok(hits)
    }
}
