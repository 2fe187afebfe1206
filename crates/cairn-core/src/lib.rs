//! Cairn Core Library
//!
//! This crate provides the core functionality for Cairn, including:
//! - Knowledge graph of entities and relationships with mutation events
//! - Hierarchical community detection (Louvain / Leiden) with size constraints
//! - LLM summaries, keywords and embeddings per community
//! - Semantic community search and map-reduce answers to corpus-wide questions
//! - Storage (SQLite with versioned migrations)
//! - LLM integration (OpenRouter API)

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CommunityConfig, Config};
    pub use crate::domain::community::{
        Community, CommunityDetectionService, CommunityHierarchy, CommunityRepository,
        CommunitySearchService, CommunityStats, GlobalQueryService,
    };
    pub use crate::domain::knowledge::{
        KnowledgeEntity, KnowledgeEvent, KnowledgeGraphRepository, KnowledgeGraphService,
        KnowledgeRelationship,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::community::SqliteCommunityRepository;
    pub use crate::infrastructure::knowledge::SqliteKnowledgeGraphRepository;
    pub use crate::llm::{Embedder, LlmClient, TextGenerator};
    pub use crate::storage::Database;
}
