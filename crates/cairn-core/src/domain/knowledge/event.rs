//! Mutation events for the knowledge graph
//!
//! Every write made through `KnowledgeGraphService` publishes one of these.
//! Community detection listens for them to mark its hierarchy stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum KnowledgeEvent {
    EntityCreated {
        entity_id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },
    EntityUpdated {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    EntityDeleted {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    RelationshipCreated {
        relationship_id: String,
        source_entity_id: String,
        target_entity_id: String,
        timestamp: DateTime<Utc>,
    },
    RelationshipDeleted {
        relationship_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl KnowledgeEvent {
    pub fn entity_created(entity_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::EntityCreated {
            entity_id: entity_id.into(),
            title: title.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn entity_updated(entity_id: impl Into<String>) -> Self {
        Self::EntityUpdated {
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn entity_deleted(entity_id: impl Into<String>) -> Self {
        Self::EntityDeleted {
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn relationship_created(
        relationship_id: impl Into<String>,
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
    ) -> Self {
        Self::RelationshipCreated {
            relationship_id: relationship_id.into(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn relationship_deleted(relationship_id: impl Into<String>) -> Self {
        Self::RelationshipDeleted {
            relationship_id: relationship_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntityCreated { timestamp, .. }
            | Self::EntityUpdated { timestamp, .. }
            | Self::EntityDeleted { timestamp, .. }
            | Self::RelationshipCreated { timestamp, .. }
            | Self::RelationshipDeleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity_created",
            Self::EntityUpdated { .. } => "entity_updated",
            Self::EntityDeleted { .. } => "entity_deleted",
            Self::RelationshipCreated { .. } => "relationship_created",
            Self::RelationshipDeleted { .. } => "relationship_deleted",
        }
    }

    /// Invalidation reason recorded by community detection
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } | Self::EntityUpdated { .. } | Self::EntityDeleted { .. } => {
                "entity_change"
            }
            Self::RelationshipCreated { .. } | Self::RelationshipDeleted { .. } => {
                "connection_change"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(KnowledgeEvent::entity_created("e1", "Note").reason(), "entity_change");
        assert_eq!(KnowledgeEvent::entity_deleted("e1").reason(), "entity_change");
        assert_eq!(
            KnowledgeEvent::relationship_created("r1", "a", "b").reason(),
            "connection_change"
        );
        assert_eq!(KnowledgeEvent::relationship_deleted("r1").reason(), "connection_change");
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = KnowledgeEvent::entity_updated("e1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"entity_updated\""));

        let parsed: KnowledgeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.event_type_name(), "entity_updated");
    }
}
