//! Knowledge graph domain
//!
//! Entities (notes, concepts) connected by relationships. This is the
//! graph that community detection clusters; every mutation made through
//! [`KnowledgeGraphService`] is announced as a [`KnowledgeEvent`].

mod entity;
mod event;
mod relationship;
mod repository;
mod service;

pub use entity::KnowledgeEntity;
pub use event::KnowledgeEvent;
pub use relationship::KnowledgeRelationship;
pub use repository::KnowledgeGraphRepository;
pub use service::KnowledgeGraphService;
