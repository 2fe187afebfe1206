//! Clustering strategies
//!
//! A [`ClusteringAlgorithm`] partitions a [`CommunityGraph`] into groups of
//! node ids. Strategies are looked up by tag through [`AlgorithmRegistry`],
//! and the tag is stored on every community they produce.
//!
//! Both built-in strategies optimize modularity
//!
//! ```text
//! Q = Σ_c [ L_c / m  -  γ · (d_c / 2m)² ]
//! ```
//!
//! where `L_c` is the edge weight inside community `c`, `d_c` the summed
//! degree of its nodes, `m` the total edge weight and `γ` the resolution.
//! `louvain` alternates greedy local moving with aggregation; `leiden`
//! additionally splits every community into its connected components before
//! aggregating, so no community it returns is internally disconnected.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::graph::CommunityGraph;
use crate::error::{Error, Result};

pub const DEFAULT_ALGORITHM: &str = "louvain";

/// Gains below this are treated as no improvement
const MIN_GAIN: f64 = 1e-10;

/// Parameters for a single clustering run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringParams {
    /// Higher values give more, smaller communities
    pub resolution: f64,
    /// Cap on local-moving passes per aggregation level
    pub max_iterations: usize,
    /// Shuffles the node visit order; `None` visits nodes in graph order
    pub seed: Option<u64>,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 50,
            seed: None,
        }
    }
}

impl ClusteringParams {
    pub fn with_resolution(&self, resolution: f64) -> Self {
        Self {
            resolution,
            ..self.clone()
        }
    }
}

/// Community index per node
///
/// Indices are opaque grouping keys with no meaning across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Node ids in graph order
    pub node_ids: Vec<String>,
    pub assignments: HashMap<String, usize>,
    pub modularity: f64,
}

impl Partition {
    pub fn community_of(&self, node_id: &str) -> Option<usize> {
        self.assignments.get(node_id).copied()
    }

    pub fn community_count(&self) -> usize {
        let mut seen: Vec<usize> = self.assignments.values().copied().collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    /// Node ids grouped by community, groups ordered by first appearance
    pub fn groups(&self) -> Vec<Vec<String>> {
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();
        for id in &self.node_ids {
            let Some(&community) = self.assignments.get(id) else {
                continue;
            };
            let slot = *position.entry(community).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(id.clone());
        }
        groups
    }
}

pub trait ClusteringAlgorithm: Send + Sync {
    /// Tag stored on produced communities
    fn name(&self) -> &str;

    fn detect(&self, graph: &CommunityGraph, params: &ClusteringParams) -> Result<Partition>;
}

/// Modularity-optimizing local moving with aggregation
#[derive(Debug, Clone, Copy, Default)]
pub struct Louvain;

impl ClusteringAlgorithm for Louvain {
    fn name(&self) -> &str {
        "louvain"
    }

    fn detect(&self, graph: &CommunityGraph, params: &ClusteringParams) -> Result<Partition> {
        run(graph, params, false)
    }
}

/// Louvain plus a connectivity refinement before each aggregation
#[derive(Debug, Clone, Copy, Default)]
pub struct Leiden;

impl ClusteringAlgorithm for Leiden {
    fn name(&self) -> &str {
        "leiden"
    }

    fn detect(&self, graph: &CommunityGraph, params: &ClusteringParams) -> Result<Partition> {
        run(graph, params, true)
    }
}

/// Strategies keyed by tag
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: BTreeMap<String, Arc<dyn ClusteringAlgorithm>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `louvain` and `leiden`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Louvain));
        registry.register(Arc::new(Leiden));
        registry
    }

    /// Register a strategy under its own name, replacing any previous one
    pub fn register(&mut self, algorithm: Arc<dyn ClusteringAlgorithm>) {
        self.algorithms
            .insert(algorithm.name().to_string(), algorithm);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ClusteringAlgorithm>> {
        self.algorithms
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_string(), self.names().join("|")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.algorithms.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("algorithms", &self.names())
            .finish()
    }
}

/// Modularity of an assignment over `graph` at the given resolution
///
/// Nodes missing from `assignments` are skipped. Returns 0.0 for a graph
/// without edges.
pub fn modularity(
    graph: &CommunityGraph,
    assignments: &HashMap<String, usize>,
    resolution: f64,
) -> f64 {
    let m = graph.total_weight();
    if m <= 0.0 {
        return 0.0;
    }

    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut degree: HashMap<usize, f64> = HashMap::new();
    for (a, b, weight) in graph.edges() {
        let (Some(&ca), Some(&cb)) = (assignments.get(&a), assignments.get(&b)) else {
            continue;
        };
        *degree.entry(ca).or_default() += weight;
        *degree.entry(cb).or_default() += weight;
        if ca == cb {
            *internal.entry(ca).or_default() += weight;
        }
    }

    degree
        .iter()
        .map(|(community, &d)| {
            let l = internal.get(community).copied().unwrap_or(0.0);
            l / m - resolution * (d / (2.0 * m)).powi(2)
        })
        .sum()
}

fn run(graph: &CommunityGraph, params: &ClusteringParams, refine: bool) -> Result<Partition> {
    if !(params.resolution > 0.0) {
        return Err(Error::ClusteringFailed(format!(
            "resolution must be positive, got {}",
            params.resolution
        )));
    }

    let node_ids = graph.node_ids();
    let mut level_graph = WeightedGraph::from_graph(graph, &node_ids);
    let mut membership: Vec<usize> = (0..node_ids.len()).collect();
    let mut rng = params.seed.map(StdRng::seed_from_u64);

    // every aggregation strictly shrinks the graph, so this terminates
    while level_graph.len() > 1 {
        let mut order: Vec<usize> = (0..level_graph.len()).collect();
        if let Some(rng) = rng.as_mut() {
            order.shuffle(rng);
        }

        let mut communities =
            level_graph.local_moving(params.resolution, &order, params.max_iterations.max(1));
        if refine {
            communities = level_graph.connected_within(&communities);
        }
        let (communities, count) = renumber(&communities);

        if count == level_graph.len() {
            break;
        }
        for slot in membership.iter_mut() {
            *slot = communities[*slot];
        }
        level_graph = level_graph.aggregate(&communities, count);
    }

    let (membership, _) = renumber(&membership);
    let assignments: HashMap<String, usize> = node_ids
        .iter()
        .cloned()
        .zip(membership)
        .collect();
    let modularity = modularity(graph, &assignments, params.resolution);

    Ok(Partition {
        node_ids,
        assignments,
        modularity,
    })
}

/// Relabel communities 0..k in order of first appearance
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let relabeled = labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect();
    (relabeled, mapping.len())
}

/// Dense adjacency used while optimizing; self-loops carry the weight
/// folded inside aggregated nodes
#[derive(Debug, Clone)]
struct WeightedGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl WeightedGraph {
    fn from_graph(graph: &CommunityGraph, node_ids: &[String]) -> Self {
        let position: HashMap<&str, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut adjacency = vec![Vec::new(); node_ids.len()];
        for (a, b, weight) in graph.edges() {
            if let (Some(&i), Some(&j)) = (position.get(a.as_str()), position.get(b.as_str())) {
                adjacency[i].push((j, weight));
                adjacency[j].push((i, weight));
            }
        }

        Self {
            adjacency,
            self_loops: vec![0.0; node_ids.len()],
        }
    }

    fn len(&self) -> usize {
        self.adjacency.len()
    }

    fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }

    fn local_moving(&self, resolution: f64, order: &[usize], max_passes: usize) -> Vec<usize> {
        let n = self.len();
        let mut community: Vec<usize> = (0..n).collect();
        let degrees: Vec<f64> = (0..n).map(|i| self.degree(i)).collect();
        let two_m: f64 = degrees.iter().sum();
        if two_m <= 0.0 {
            return community;
        }

        let mut totals = degrees.clone();

        for _ in 0..max_passes {
            let mut moved = false;

            for &node in order {
                let current = community[node];
                let k = degrees[node];

                // weights to neighboring communities, first-seen order
                let mut links: Vec<(usize, f64)> = Vec::new();
                for &(neighbor, weight) in &self.adjacency[node] {
                    let c = community[neighbor];
                    match links.iter_mut().find(|(lc, _)| *lc == c) {
                        Some((_, w)) => *w += weight,
                        None => links.push((c, weight)),
                    }
                }

                totals[current] -= k;

                let link_to = |c: usize| {
                    links
                        .iter()
                        .find(|(lc, _)| *lc == c)
                        .map(|(_, w)| *w)
                        .unwrap_or(0.0)
                };
                let gain = |c: usize, totals: &[f64]| link_to(c) - resolution * totals[c] * k / two_m;

                let mut best = current;
                let mut best_gain = gain(current, &totals);
                for &(c, _) in &links {
                    let g = gain(c, &totals);
                    if g > best_gain + MIN_GAIN {
                        best = c;
                        best_gain = g;
                    }
                }

                totals[best] += k;
                if best != current {
                    community[node] = best;
                    moved = true;
                }
            }

            if !moved {
                break;
            }
        }

        community
    }

    /// Split every community into its connected components
    fn connected_within(&self, community: &[usize]) -> Vec<usize> {
        let n = self.len();
        let mut label = vec![usize::MAX; n];
        let mut next = 0;

        for start in 0..n {
            if label[start] != usize::MAX {
                continue;
            }
            label[start] = next;
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &(neighbor, _) in &self.adjacency[node] {
                    if label[neighbor] == usize::MAX && community[neighbor] == community[start] {
                        label[neighbor] = next;
                        queue.push_back(neighbor);
                    }
                }
            }
            next += 1;
        }

        label
    }

    /// Collapse each community into one node
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut self_loops = vec![0.0; count];
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];

        for node in 0..self.len() {
            let c = community[node];
            self_loops[c] += self.self_loops[node];
            for &(neighbor, weight) in &self.adjacency[node] {
                // each undirected edge appears twice in the adjacency
                if neighbor < node {
                    continue;
                }
                let d = community[neighbor];
                if c == d {
                    self_loops[c] += weight;
                } else {
                    *links[c].entry(d).or_default() += weight;
                    *links[d].entry(c).or_default() += weight;
                }
            }
        }

        Self {
            adjacency: links.into_iter().map(|m| m.into_iter().collect()).collect(),
            self_loops,
        }
    }
}
