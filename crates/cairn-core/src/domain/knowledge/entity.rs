//! Knowledge entities (graph nodes)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A note or concept in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub id: String,
    pub title: String,
    /// Markdown body
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntity {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Replace the body and bump `updated_at`
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.updated_at = Utc::now();
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.updated_at = Utc::now();
    }

    /// First `max_chars` characters of the body, whitespace-collapsed, with
    /// an ellipsis when truncated
    pub fn preview(&self, max_chars: usize) -> String {
        let collapsed = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= max_chars {
            return collapsed;
        }
        let mut preview: String = collapsed.chars().take(max_chars).collect();
        preview.push('…');
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity() {
        let entity = KnowledgeEntity::new("Rust ownership").with_content("Borrowing rules");
        assert_eq!(entity.title, "Rust ownership");
        assert_eq!(entity.content, "Borrowing rules");
        assert!(Uuid::parse_str(&entity.id).is_ok());
        assert_eq!(entity.created_at, entity.updated_at);
    }

    #[test]
    fn test_preview_short_content_untouched() {
        let entity = KnowledgeEntity::new("a").with_content("line one\n\nline   two");
        assert_eq!(entity.preview(200), "line one line two");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let entity = KnowledgeEntity::new("a").with_content("héllo wörld ✓✓✓");
        let preview = entity.preview(7);
        assert_eq!(preview, "héllo w…");
        assert_eq!(entity.preview(0), "…");
    }

    #[test]
    fn test_set_content_bumps_updated_at() {
        let mut entity = KnowledgeEntity::new("a");
        let before = entity.updated_at;
        entity.set_content("new body");
        assert!(entity.updated_at >= before);
        assert_eq!(entity.content, "new body");
    }
}
