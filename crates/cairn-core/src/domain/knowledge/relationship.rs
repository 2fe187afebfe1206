//! Knowledge relationships (graph edges)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A link between two knowledge entities
///
/// Stored with a direction, but community detection treats every
/// relationship as undirected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRelationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    /// Free-form label such as "cites" or "part of"
    pub label: Option<String>,
    /// Strength of the link in 0.0..=1.0
    pub confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeRelationship {
    pub fn new(source_entity_id: impl Into<String>, target_entity_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            label: None,
            confidence: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Edge weight used by clustering: the confidence, or 1.0 when unset
    pub fn weight(&self) -> f64 {
        self.confidence.map(f64::from).unwrap_or(1.0)
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_entity_id == self.target_entity_id
    }

    /// Whether this relationship touches the given entity on either end
    pub fn involves(&self, entity_id: &str) -> bool {
        self.source_entity_id == entity_id || self.target_entity_id == entity_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_defaults_to_one() {
        let rel = KnowledgeRelationship::new("a", "b");
        assert_eq!(rel.weight(), 1.0);
        assert!(!rel.is_self_loop());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(KnowledgeRelationship::new("a", "b").with_confidence(1.7).confidence, Some(1.0));
        assert_eq!(KnowledgeRelationship::new("a", "b").with_confidence(-0.2).weight(), 0.0);
        let rel = KnowledgeRelationship::new("a", "b").with_confidence(0.25);
        assert!((rel.weight() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_involves() {
        let rel = KnowledgeRelationship::new("a", "b").with_label("cites");
        assert!(rel.involves("a"));
        assert!(rel.involves("b"));
        assert!(!rel.involves("c"));
        assert!(KnowledgeRelationship::new("x", "x").is_self_loop());
    }
}
