//! Community records and the hierarchy projection over them
//!
//! Communities form an arena of flat records keyed by id. Parent and child
//! links are ids, never pointers, so a hierarchy can be persisted, loaded
//! partially, and checked for consistency independently.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::color::FALLBACK_COLOR;

/// A cluster of knowledge entities at one level of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    /// 0 for leaf communities built directly from entities
    pub level: u32,
    pub parent_community_id: Option<String>,
    pub child_community_ids: Vec<String>,
    pub member_entity_ids: Vec<String>,
    pub member_count: usize,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    /// Tag of the clustering strategy that produced this community
    pub algorithm: String,
    /// 0.0 when the grouping was repaired by size constraints
    pub modularity: f64,
    /// `#rrggbb`
    pub color: String,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl Community {
    /// Create a community over the given members, dropping duplicate ids
    pub fn new(level: u32, members: Vec<String>, algorithm: impl Into<String>) -> Self {
        let mut seen = HashSet::with_capacity(members.len());
        let member_entity_ids: Vec<String> = members
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            level,
            parent_community_id: None,
            child_community_ids: Vec::new(),
            member_count: member_entity_ids.len(),
            member_entity_ids,
            summary: None,
            keywords: Vec::new(),
            embedding: None,
            algorithm: algorithm.into(),
            modularity: 0.0,
            color: FALLBACK_COLOR.to_string(),
            stale: false,
            created_at: Utc::now(),
            last_refreshed_at: None,
        }
    }

    pub fn with_modularity(mut self, modularity: f64) -> Self {
        self.modularity = modularity;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_community_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn contains_entity(&self, entity_id: &str) -> bool {
        self.member_entity_ids.iter().any(|id| id == entity_id)
    }
}

/// A read-only view over a full community set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommunityHierarchy {
    /// Communities at the highest level present
    pub roots: Vec<Community>,
    pub levels: BTreeMap<u32, Vec<Community>>,
    /// Entity id to the ids of every community containing it, finest first
    pub entity_to_communities: HashMap<String, Vec<String>>,
}

impl CommunityHierarchy {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_communities(communities: Vec<Community>) -> Self {
        let mut levels: BTreeMap<u32, Vec<Community>> = BTreeMap::new();
        for community in communities {
            levels.entry(community.level).or_default().push(community);
        }

        let mut entity_to_communities: HashMap<String, Vec<String>> = HashMap::new();
        for community in levels.values().flatten() {
            for entity_id in &community.member_entity_ids {
                entity_to_communities
                    .entry(entity_id.clone())
                    .or_default()
                    .push(community.id.clone());
            }
        }

        let roots = levels
            .last_key_value()
            .map(|(_, communities)| communities.clone())
            .unwrap_or_default();

        Self {
            roots,
            levels,
            entity_to_communities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn max_level(&self) -> Option<u32> {
        self.levels.keys().next_back().copied()
    }

    pub fn level(&self, level: u32) -> &[Community] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_communities(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Community> {
        self.levels.values().flatten()
    }

    pub fn get(&self, id: &str) -> Option<&Community> {
        self.iter().find(|c| c.id == id)
    }

    /// Children of a community in their stored order
    pub fn children_of(&self, id: &str) -> Vec<&Community> {
        let Some(parent) = self.get(id) else {
            return Vec::new();
        };
        parent
            .child_community_ids
            .iter()
            .filter_map(|child_id| self.get(child_id))
            .collect()
    }

    /// Check member unions and parent/child links
    pub fn validate(&self) -> Result<(), HierarchyViolation> {
        let by_id: HashMap<&str, &Community> = self.iter().map(|c| (c.id.as_str(), c)).collect();

        for community in self.iter() {
            if let Some(parent_id) = &community.parent_community_id {
                let parent = by_id.get(parent_id.as_str()).ok_or_else(|| {
                    HierarchyViolation::MissingParent {
                        community_id: community.id.clone(),
                        parent_id: parent_id.clone(),
                    }
                })?;
                if !parent.child_community_ids.contains(&community.id) {
                    return Err(HierarchyViolation::UnlinkedChild {
                        community_id: community.id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }

            for child_id in &community.child_community_ids {
                let child = by_id.get(child_id.as_str()).ok_or_else(|| {
                    HierarchyViolation::MissingChild {
                        community_id: community.id.clone(),
                        child_id: child_id.clone(),
                    }
                })?;
                if child.parent_community_id.as_deref() != Some(community.id.as_str()) {
                    return Err(HierarchyViolation::UnlinkedChild {
                        community_id: child_id.clone(),
                        parent_id: community.id.clone(),
                    });
                }
            }

            if !community.child_community_ids.is_empty() {
                let expected: HashSet<&str> = community
                    .child_community_ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()))
                    .flat_map(|child| child.member_entity_ids.iter().map(String::as_str))
                    .collect();
                let actual: HashSet<&str> =
                    community.member_entity_ids.iter().map(String::as_str).collect();
                if expected != actual {
                    return Err(HierarchyViolation::MemberMismatch {
                        community_id: community.id.clone(),
                    });
                }
            }

            // following parents must terminate
            let mut seen = HashSet::new();
            let mut cursor = Some(community);
            while let Some(current) = cursor {
                if !seen.insert(current.id.as_str()) {
                    return Err(HierarchyViolation::Cycle {
                        community_id: community.id.clone(),
                    });
                }
                cursor = current
                    .parent_community_id
                    .as_deref()
                    .and_then(|id| by_id.get(id).copied());
            }
        }

        Ok(())
    }
}

/// First inconsistency found by [`CommunityHierarchy::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyViolation {
    #[error("community {community_id} points to missing parent {parent_id}")]
    MissingParent { community_id: String, parent_id: String },

    #[error("community {community_id} lists missing child {child_id}")]
    MissingChild { community_id: String, child_id: String },

    #[error("community {community_id} and parent {parent_id} disagree about their link")]
    UnlinkedChild { community_id: String, parent_id: String },

    #[error("community {community_id} members differ from the union of its children")]
    MemberMismatch { community_id: String },

    #[error("parent chain of community {community_id} loops")]
    Cycle { community_id: String },
}

/// Aggregate numbers over the persisted community set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommunityStats {
    pub total_communities: usize,
    pub levels: usize,
    pub largest_community: usize,
    pub smallest_community: usize,
    pub average_community_size: f64,
    pub stale_count: usize,
    pub changes_since_detection: u64,
    pub last_detected_at: Option<DateTime<Utc>>,
}

impl CommunityStats {
    pub fn from_communities(
        communities: &[Community],
        changes_since_detection: u64,
        last_detected_at: Option<DateTime<Utc>>,
    ) -> Self {
        let sizes: Vec<usize> = communities.iter().map(|c| c.member_count).collect();
        let levels: HashSet<u32> = communities.iter().map(|c| c.level).collect();

        let average_community_size = if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
        };

        Self {
            total_communities: communities.len(),
            levels: levels.len(),
            largest_community: sizes.iter().copied().max().unwrap_or(0),
            smallest_community: sizes.iter().copied().min().unwrap_or(0),
            average_community_size,
            stale_count: communities.iter().filter(|c| c.stale).count(),
            changes_since_detection,
            last_detected_at,
        }
    }
}
