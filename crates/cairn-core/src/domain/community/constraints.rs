//! Size-constraint enforcement for each level's grouping
//!
//! Oversized groups are re-clustered at a higher resolution; undersized
//! groups are folded into the neighbor they share the most edges with.
//! Bounds are a goal: an undersized group with no neighbor stays.

use std::collections::HashMap;

use tracing::debug;

use super::algorithm::{ClusteringAlgorithm, ClusteringParams};
use super::graph::CommunityGraph;
use crate::config::CommunityConfig;
use crate::error::Result;

/// How many times an oversized group may be re-split
pub const DEFAULT_MAX_SPLIT_DEPTH: u32 = 4;

/// A group after enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstrainedGroup {
    pub members: Vec<String>,
    /// Produced by a split or merge rather than taken from the partition
    pub repaired: bool,
}

impl ConstrainedGroup {
    fn original(members: Vec<String>) -> Self {
        Self {
            members,
            repaired: false,
        }
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone)]
pub struct SizeConstraintEnforcer {
    max_cluster_size: usize,
    min_cluster_size: usize,
    split_resolution_factor: f64,
    max_split_depth: u32,
}

impl SizeConstraintEnforcer {
    pub fn new(max_cluster_size: usize, min_cluster_size: usize, split_resolution_factor: f64) -> Self {
        Self {
            max_cluster_size,
            min_cluster_size,
            split_resolution_factor,
            max_split_depth: DEFAULT_MAX_SPLIT_DEPTH,
        }
    }

    pub fn from_config(config: &CommunityConfig) -> Self {
        Self::new(
            config.max_cluster_size,
            config.min_cluster_size,
            config.split_resolution_factor,
        )
    }

    pub fn with_max_split_depth(mut self, depth: u32) -> Self {
        self.max_split_depth = depth;
        self
    }

    /// Split oversized groups, then merge undersized ones
    pub fn enforce(
        &self,
        graph: &CommunityGraph,
        groups: Vec<Vec<String>>,
        algorithm: &dyn ClusteringAlgorithm,
        params: &ClusteringParams,
    ) -> Result<Vec<ConstrainedGroup>> {
        let mut constrained = Vec::with_capacity(groups.len());
        for members in groups {
            self.split(
                graph,
                ConstrainedGroup::original(members),
                algorithm,
                params,
                1,
                &mut constrained,
            )?;
        }

        self.merge(graph, &mut constrained);
        Ok(constrained)
    }

    fn split(
        &self,
        graph: &CommunityGraph,
        group: ConstrainedGroup,
        algorithm: &dyn ClusteringAlgorithm,
        params: &ClusteringParams,
        depth: u32,
        out: &mut Vec<ConstrainedGroup>,
    ) -> Result<()> {
        if group.len() <= self.max_cluster_size || depth > self.max_split_depth {
            out.push(group);
            return Ok(());
        }

        let subgraph = graph.induced_subgraph(&group.members);
        if subgraph.node_count() < 2 {
            out.push(group);
            return Ok(());
        }

        let resolution = params.resolution * self.split_resolution_factor.powi(depth as i32);
        let parts = algorithm
            .detect(&subgraph, &params.with_resolution(resolution))?
            .groups();
        if parts.len() < 2 {
            out.push(group);
            return Ok(());
        }

        debug!(
            size = group.len(),
            parts = parts.len(),
            resolution,
            depth,
            "Split oversized group"
        );

        for members in parts {
            let part = ConstrainedGroup {
                members,
                repaired: true,
            };
            self.split(graph, part, algorithm, params, depth + 1, out)?;
        }
        Ok(())
    }

    fn merge(&self, graph: &CommunityGraph, groups: &mut Vec<ConstrainedGroup>) {
        while let Some((source, target)) = (0..groups.len())
            .filter(|&i| groups[i].len() < self.min_cluster_size)
            .find_map(|i| self.merge_target(graph, groups, i).map(|t| (i, t)))
        {
            let absorbed = groups.remove(source);
            let target = if target > source { target - 1 } else { target };

            debug!(
                size = absorbed.len(),
                into = groups[target].len(),
                "Merged undersized group"
            );
            groups[target].members.extend(absorbed.members);
            groups[target].repaired = true;
        }
    }

    /// Group sharing the most original edges with `source`; ties go to the
    /// lowest index
    fn merge_target(
        &self,
        graph: &CommunityGraph,
        groups: &[ConstrainedGroup],
        source: usize,
    ) -> Option<usize> {
        let owner: HashMap<&str, usize> = groups
            .iter()
            .enumerate()
            .flat_map(|(i, g)| g.members.iter().map(move |m| (m.as_str(), i)))
            .collect();

        let mut shared = vec![0usize; groups.len()];
        for member in &groups[source].members {
            for (neighbor, _) in graph.neighbors(member) {
                if let Some(&other) = owner.get(neighbor.as_str()) {
                    if other != source {
                        shared[other] += 1;
                    }
                }
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (i, &count) in shared.iter().enumerate() {
            if count == 0 {
                continue;
            }
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((i, count));
            }
        }
        best.map(|(i, _)| i)
    }
}
