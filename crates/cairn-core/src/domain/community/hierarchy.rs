//! Hierarchy construction
//!
//! Level 0 clusters the entity graph directly. Every further level clusters a
//! meta-graph whose nodes are the previous level's communities, at a
//! resolution scaled down by `level_resolution_factor` per level.
//!
//! Size constraints are enforced on every level before the next one is built
//! from it. Above level 0 a group's size is its number of child communities.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use super::algorithm::{ClusteringAlgorithm, ClusteringParams};
use super::constraints::SizeConstraintEnforcer;
use super::entity::Community;
use super::graph::CommunityGraph;
use crate::config::CommunityConfig;
use crate::error::Result;

pub struct HierarchyBuilder {
    config: CommunityConfig,
    algorithm: Arc<dyn ClusteringAlgorithm>,
    params: ClusteringParams,
}

impl HierarchyBuilder {
    pub fn new(config: &CommunityConfig, algorithm: Arc<dyn ClusteringAlgorithm>) -> Self {
        Self {
            config: config.clone(),
            algorithm,
            params: ClusteringParams {
                resolution: config.resolution,
                ..ClusteringParams::default()
            },
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.params.seed = seed;
        self
    }

    /// All communities of every level, level 0 first
    pub fn build(&self, graph: &CommunityGraph) -> Result<Vec<Community>> {
        if graph.is_empty() {
            return Ok(Vec::new());
        }

        let tag = self.algorithm.name().to_string();
        let enforcer = SizeConstraintEnforcer::from_config(&self.config);
        let partition = self.algorithm.detect(graph, &self.params)?;
        let groups = enforcer.enforce(
            graph,
            partition.groups(),
            self.algorithm.as_ref(),
            &self.params,
        )?;

        let leaves: Vec<Community> = groups
            .into_iter()
            .map(|group| {
                let modularity = if group.repaired { 0.0 } else { partition.modularity };
                Community::new(0, group.members, tag.clone()).with_modularity(modularity)
            })
            .collect();
        info!(
            level = 0,
            communities = leaves.len(),
            modularity = partition.modularity,
            "Leaf communities built"
        );

        let mut levels = vec![leaves];
        let mut resolution = self.params.resolution;

        while (levels.len() as u32) < self.config.hierarchical_levels {
            let level = levels.len() as u32;
            let Some(previous) = levels.last_mut() else {
                break;
            };
            if previous.len() <= 1 {
                break;
            }

            let meta = build_meta_graph(graph, previous);
            if meta.node_count() < 2 {
                break;
            }

            resolution *= self.config.level_resolution_factor;
            let level_params = self.params.with_resolution(resolution);
            let partition = self.algorithm.detect(&meta, &level_params)?;
            let groups =
                enforcer.enforce(&meta, partition.groups(), self.algorithm.as_ref(), &level_params)?;
            if groups.len() >= previous.len() {
                debug!(
                    level,
                    communities = previous.len(),
                    "Meta-graph did not coarsen, stopping"
                );
                break;
            }

            let position: HashMap<String, usize> = previous
                .iter()
                .enumerate()
                .map(|(i, c)| (c.id.clone(), i))
                .collect();

            let mut parents = Vec::with_capacity(groups.len());
            for group in groups {
                let modularity = if group.repaired { 0.0 } else { partition.modularity };
                let child_ids = group.members;
                let members: Vec<String> = child_ids
                    .iter()
                    .filter_map(|id| position.get(id))
                    .flat_map(|&i| previous[i].member_entity_ids.iter().cloned())
                    .collect();

                let mut parent =
                    Community::new(level, members, tag.clone()).with_modularity(modularity);
                for child_id in &child_ids {
                    if let Some(&i) = position.get(child_id) {
                        previous[i].parent_community_id = Some(parent.id.clone());
                    }
                }
                parent.child_community_ids = child_ids;
                parents.push(parent);
            }

            info!(
                level,
                communities = parents.len(),
                resolution,
                modularity = partition.modularity,
                "Parent communities built"
            );
            levels.push(parents);
        }

        Ok(levels.into_iter().flatten().collect())
    }
}

/// Collapse each community into one node
///
/// Edge weights are the summed weights of original edges crossing between
/// two communities; edges inside a community are dropped.
pub fn build_meta_graph(graph: &CommunityGraph, communities: &[Community]) -> CommunityGraph {
    let mut owner: HashMap<&str, usize> = HashMap::new();
    let mut meta = CommunityGraph::new();
    for (i, community) in communities.iter().enumerate() {
        meta.add_node(community.id.clone(), format!("level {} community", community.level));
        for member in &community.member_entity_ids {
            owner.insert(member.as_str(), i);
        }
    }

    let mut crossing: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (a, b, weight) in graph.edges() {
        let (Some(&ca), Some(&cb)) = (owner.get(a.as_str()), owner.get(b.as_str())) else {
            continue;
        };
        if ca != cb {
            *crossing.entry((ca.min(cb), ca.max(cb))).or_default() += weight;
        }
    }

    for ((i, j), weight) in crossing {
        meta.add_edge(&communities[i].id, &communities[j].id, weight);
    }
    meta
}
