//! Domain layer
//!
//! The knowledge graph and the community engine built on top of it.

pub mod community;
pub mod knowledge;
pub mod similarity;
