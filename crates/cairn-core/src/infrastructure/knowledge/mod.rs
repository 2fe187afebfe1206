//! SQLite implementation of the knowledge graph repository

mod repository;

pub(crate) use repository::parse_timestamp;
pub use repository::SqliteKnowledgeGraphRepository;
