//! Hierarchical community detection
//!
//! Clusters the knowledge graph into communities, stacks them into a
//! hierarchy, summarizes each community with the LLM and answers questions
//! about the corpus as a whole from those summaries.
//!
//! - [`CommunityDetectionService`] runs the pipeline and tracks staleness
//! - [`CommunitySearchService`] ranks leaf communities against a query
//! - [`GlobalQueryService`] answers corpus-wide questions by map-reduce

pub mod algorithm;
pub mod color;
pub mod constraints;
pub mod entity;
pub mod global_query;
pub mod graph;
pub mod hierarchy;
pub mod repository;
pub mod search;
pub mod service;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod test_support;

pub use algorithm::{
    AlgorithmRegistry, ClusteringAlgorithm, ClusteringParams, Leiden, Louvain, Partition,
    modularity,
};
pub use color::{FALLBACK_COLOR, assign_colors, hsl_to_hex};
pub use constraints::{ConstrainedGroup, SizeConstraintEnforcer};
pub use entity::{Community, CommunityHierarchy, CommunityStats, HierarchyViolation};
pub use global_query::{GlobalQueryService, NOT_RELEVANT};
pub use graph::{CommunityGraph, ConvertedGraph, GraphConverter, GraphNode};
pub use hierarchy::{HierarchyBuilder, build_meta_graph};
pub use repository::CommunityRepository;
pub use search::{CommunitySearchHit, CommunitySearchService, MemberPreview};
pub use service::{CommunityDetectionService, DetectionState, RefreshReport};
pub use summarizer::{CommunitySummarizer, CommunitySummary, SummarizationReport, SummaryError};
