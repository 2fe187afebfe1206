//! Graph Converter
//!
//! Turns the persisted entity/relationship set into an undirected, weighted
//! petgraph graph ready for clustering.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::domain::knowledge::{KnowledgeEntity, KnowledgeGraphRepository, KnowledgeRelationship};
use crate::error::Result;

/// Node payload: the entity (or community) id and a display title
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
}

/// Undirected weighted graph keyed by string ids
///
/// Holds at most one edge per unordered pair and never a self-loop.
#[derive(Debug, Clone, Default)]
pub struct CommunityGraph {
    graph: UnGraph<GraphNode, f64>,
    index: HashMap<String, NodeIndex>,
}

impl CommunityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning the existing index when the id is known
    pub fn add_node(&mut self, id: impl Into<String>, title: impl Into<String>) -> NodeIndex {
        let id = id.into();
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.clone(),
            title: title.into(),
        });
        self.index.insert(id, idx);
        idx
    }

    /// Add an undirected edge; returns false for unknown endpoints,
    /// self-loops, and pairs that are already connected
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64) -> bool {
        let (Some(&ia), Some(&ib)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        if ia == ib || self.graph.find_edge(ia, ib).is_some() {
            return false;
        }
        self.graph.add_edge(ia, ib, weight);
        true
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    pub fn title(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(|&idx| self.graph[idx].title.as_str())
    }

    /// Neighbor ids with edge weights
    pub fn neighbors(&self, id: &str) -> Vec<(String, f64)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges(idx)
            .map(|edge| {
                let other = if edge.source() == idx {
                    edge.target()
                } else {
                    edge.source()
                };
                (self.graph[other].id.clone(), *edge.weight())
            })
            .collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.edges(idx).count())
            .unwrap_or(0)
    }

    /// Every edge as `(a, b, weight)` in insertion order
    pub fn edges(&self) -> Vec<(String, String, f64)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].id.clone(),
                    self.graph[edge.target()].id.clone(),
                    *edge.weight(),
                )
            })
            .collect()
    }

    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let (&ia, &ib) = (self.index.get(a)?, self.index.get(b)?);
        let edge = self.graph.find_edge(ia, ib)?;
        self.graph.edge_weight(edge).copied()
    }

    pub fn total_weight(&self) -> f64 {
        self.graph.edge_weights().sum()
    }

    /// The subgraph over `ids` (in the given order) with every edge whose
    /// endpoints are both inside
    pub fn induced_subgraph(&self, ids: &[String]) -> CommunityGraph {
        let mut sub = CommunityGraph::new();
        for id in ids {
            if let Some(&idx) = self.index.get(id) {
                sub.add_node(id.clone(), self.graph[idx].title.clone());
            }
        }
        for (a, b, weight) in self.edges() {
            if sub.contains(&a) && sub.contains(&b) {
                sub.add_edge(&a, &b, weight);
            }
        }
        sub
    }

    pub fn inner(&self) -> &UnGraph<GraphNode, f64> {
        &self.graph
    }
}

/// Output of [`GraphConverter::build_graph`]
#[derive(Debug, Clone)]
pub struct ConvertedGraph {
    /// Every entity with at least one edge
    pub graph: CommunityGraph,
    /// Entities without any usable relationship, in entity order
    pub orphan_ids: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
}

impl ConvertedGraph {
    /// Build from already-loaded entities and relationships
    ///
    /// Relationships with an unknown endpoint, self-relationships, and any
    /// second relationship between the same pair are ignored. Weight is the
    /// relationship confidence, or 1.0.
    pub fn from_parts(
        entities: &[KnowledgeEntity],
        relationships: &[KnowledgeRelationship],
    ) -> Self {
        let mut full = CommunityGraph::new();
        for entity in entities {
            full.add_node(entity.id.clone(), entity.title.clone());
        }
        for relationship in relationships {
            full.add_edge(
                &relationship.source_entity_id,
                &relationship.target_entity_id,
                relationship.weight(),
            );
        }

        let (connected, orphan_ids): (Vec<String>, Vec<String>) = full
            .node_ids()
            .into_iter()
            .partition(|id| full.degree(id) > 0);

        let graph = full.induced_subgraph(&connected);
        Self {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            graph,
            orphan_ids,
        }
    }
}

/// Loads the knowledge graph for clustering; never writes
pub struct GraphConverter {
    repository: Arc<dyn KnowledgeGraphRepository>,
}

impl GraphConverter {
    pub fn new(repository: Arc<dyn KnowledgeGraphRepository>) -> Self {
        Self { repository }
    }

    pub async fn build_graph(&self) -> Result<ConvertedGraph> {
        let entities = self.repository.list_entities().await?;
        let relationships = self.repository.list_relationships().await?;

        let converted = ConvertedGraph::from_parts(&entities, &relationships);
        debug!(
            entities = entities.len(),
            relationships = relationships.len(),
            nodes = converted.node_count,
            edges = converted.edge_count,
            orphans = converted.orphan_ids.len(),
            "Knowledge graph converted"
        );
        Ok(converted)
    }
}
