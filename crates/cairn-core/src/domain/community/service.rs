//! Community detection orchestration
//!
//! Runs the full pipeline (graph conversion, hierarchical clustering,
//! coloring, persistence, summarization) and keeps the persisted hierarchy
//! honest about staleness as the knowledge graph changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::algorithm::AlgorithmRegistry;
use super::color::assign_colors;
use super::entity::{CommunityHierarchy, CommunityStats};
use super::graph::GraphConverter;
use super::hierarchy::HierarchyBuilder;
use super::repository::CommunityRepository;
use super::summarizer::CommunitySummarizer;
use crate::config::CommunityConfig;
use crate::domain::knowledge::{KnowledgeEvent, KnowledgeGraphRepository};
use crate::error::{Error, Result};
use crate::llm::{Embedder, TextGenerator};

/// Graphs with fewer clusterable nodes produce an empty hierarchy
pub const MIN_CLUSTERABLE_NODES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl DetectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
        }
    }
}

/// Outcome of [`CommunityDetectionService::refresh_stale_summaries`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Releases the single-flight flag when dropped
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CommunityDetectionService {
    config: CommunityConfig,
    knowledge: Arc<dyn KnowledgeGraphRepository>,
    communities: Arc<dyn CommunityRepository>,
    summarizer: CommunitySummarizer,
    registry: AlgorithmRegistry,
    seed: Option<u64>,
    running: AtomicBool,
    state: AtomicU8,
}

impl CommunityDetectionService {
    pub fn new(
        config: CommunityConfig,
        knowledge: Arc<dyn KnowledgeGraphRepository>,
        communities: Arc<dyn CommunityRepository>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let summarizer =
            CommunitySummarizer::new(generator, embedder, knowledge.clone(), communities.clone())
                .with_concurrency(config.summary_concurrency);

        Self {
            config,
            knowledge,
            communities,
            summarizer,
            registry: AlgorithmRegistry::with_defaults(),
            seed: None,
            running: AtomicBool::new(false),
            state: AtomicU8::new(DetectionState::Idle.as_u8()),
        }
    }

    /// Replace the set of available clustering strategies
    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Fix the node visit order for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &CommunityConfig {
        &self.config
    }

    pub fn state(&self) -> DetectionState {
        DetectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DetectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Rebuild the whole hierarchy from the current knowledge graph
    ///
    /// Existing communities are deleted first. A concurrent call fails with
    /// [`Error::DetectionInProgress`].
    pub async fn detect_communities(&self) -> Result<CommunityHierarchy> {
        if !self.config.enabled {
            return Err(Error::CommunitiesDisabled);
        }
        let _guard = RunGuard::acquire(&self.running).ok_or(Error::DetectionInProgress)?;

        self.set_state(DetectionState::Running);
        let result = self.run_detection().await;
        self.set_state(if result.is_ok() {
            DetectionState::Succeeded
        } else {
            DetectionState::Failed
        });
        result
    }

    async fn run_detection(&self) -> Result<CommunityHierarchy> {
        let started = Instant::now();
        let algorithm = self.registry.get(&self.config.algorithm)?;

        let deleted = self.communities.delete_all().await?;
        debug!(deleted, "Previous communities removed");

        let converted = GraphConverter::new(self.knowledge.clone()).build_graph().await?;
        info!(
            nodes = converted.node_count,
            edges = converted.edge_count,
            orphans = converted.orphan_ids.len(),
            algorithm = algorithm.name(),
            "Detecting communities"
        );

        if converted.node_count < MIN_CLUSTERABLE_NODES {
            info!(nodes = converted.node_count, "Too few connected entities to cluster");
            self.finish_detection().await?;
            return Ok(CommunityHierarchy::empty());
        }

        let mut communities = HierarchyBuilder::new(&self.config, algorithm)
            .with_seed(self.seed)
            .build(&converted.graph)?;
        assign_colors(&mut communities);
        self.communities.save_batch(&communities).await?;

        let report = self.summarizer.summarize_all(communities).await;
        self.finish_detection().await?;

        let hierarchy = self.communities.get_hierarchy().await?;
        info!(
            communities = hierarchy.total_communities(),
            levels = hierarchy.levels.len(),
            summarized = report.summarized,
            summary_failures = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Community detection complete"
        );
        Ok(hierarchy)
    }

    async fn finish_detection(&self) -> Result<()> {
        self.communities.reset_change_counter().await?;
        self.communities.set_last_detected_at(Utc::now()).await
    }

    /// Mark every community stale after a graph change
    ///
    /// Returns false without touching the store when auto-invalidation is
    /// off or detection has never run.
    pub async fn invalidate(&self, reason: &str) -> Result<bool> {
        if !self.config.enabled || !self.config.auto_invalidate {
            return Ok(false);
        }
        if self.communities.get_last_detected_at().await?.is_none() {
            debug!(reason, "No detection yet, nothing to invalidate");
            return Ok(false);
        }

        let marked = self.communities.mark_all_stale().await?;
        let changes = self.communities.increment_change_counter().await?;
        debug!(reason, marked, changes, "Communities invalidated");
        Ok(true)
    }

    /// Re-summarize stale communities in level order without reclustering
    ///
    /// Each community is handled on its own; a failure leaves it stale.
    pub async fn refresh_stale_summaries(&self) -> Result<RefreshReport> {
        let stale = self.communities.get_stale().await?;
        let mut report = RefreshReport::default();

        for community in &stale {
            match self.summarizer.summarize_one(community).await {
                Ok(summary) => {
                    let stored = match self
                        .communities
                        .update_summary(
                            &community.id,
                            &summary.summary,
                            &summary.keywords,
                            summary.embedding.as_deref(),
                        )
                        .await
                    {
                        Ok(_) => self.communities.clear_stale(&community.id).await,
                        Err(e) => Err(e),
                    };
                    match stored {
                        Ok(_) => {
                            report.refreshed += 1;
                        }
                        Err(e) => {
                            warn!(community_id = %community.id, error = %e, "Refreshed summary not saved");
                            report.failed += 1;
                        }
                    }
                }
                Err(e) if e.is_skip() => {
                    debug!(community_id = %community.id, reason = %e, "Stale community skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(community_id = %community.id, error = %e, "Stale community refresh failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            stale = stale.len(),
            refreshed = report.refreshed,
            failed = report.failed,
            "Stale summaries refreshed"
        );
        Ok(report)
    }

    pub async fn get_hierarchy(&self) -> Result<CommunityHierarchy> {
        self.communities.get_hierarchy().await
    }

    pub async fn get_stats(&self) -> Result<CommunityStats> {
        let communities = self.communities.list_all().await?;
        let changes = self.communities.get_change_counter().await?;
        let last_detected_at = self.communities.get_last_detected_at().await?;
        Ok(CommunityStats::from_communities(&communities, changes, last_detected_at))
    }

    /// Invalidate on every knowledge graph mutation
    ///
    /// A lagged receiver invalidates once for everything it missed; the task
    /// ends when the sender side is dropped.
    pub fn spawn_invalidation_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<KnowledgeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let reason = match events.recv().await {
                    Ok(event) => event.reason(),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Invalidation listener lagged");
                        "lagged"
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Err(e) = self.invalidate(reason).await {
                    warn!(error = %e, reason, "Invalidation failed");
                }
            }
            debug!("Invalidation listener stopped");
        })
    }
}
