//! Community Summarizer
//!
//! Produces a short theme summary, keywords and an embedding for every
//! community, bottom-up. Leaf prompts describe member entities; parent
//! prompts synthesize the summaries of their children, so a level is only
//! started once the level below has been persisted.
//!
//! Every degraded outcome is a [`SummaryError`]; nothing here aborts the
//! detection pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::entity::Community;
use super::repository::CommunityRepository;
use crate::domain::knowledge::{KnowledgeEntity, KnowledgeGraphRepository};
use crate::llm::{Embedder, GenerationOptions, TextGenerator};

/// Characters of entity content shown per member
pub const MAX_PREVIEW_CHARS: usize = 200;

/// Members listed in a leaf prompt
pub const MAX_PROMPT_MEMBERS: usize = 40;

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: usize = 300;

/// Community id paired with how its summary went
type SummaryOutcome = (String, Result<CommunitySummary, SummaryError>);

/// Why a community ended up without a new summary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("text generation failed: {0}")]
    GenerationFailed(String),

    #[error("malformed summary response: {0}")]
    MalformedResponse(String),

    #[error("none of the community's members could be loaded")]
    NoMembers,

    #[error("no child community has a summary yet")]
    NoChildSummaries,

    #[error("store unavailable: {0}")]
    Store(String),
}

impl SummaryError {
    /// Nothing to summarize, as opposed to a failed attempt
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoMembers | Self::NoChildSummaries)
    }
}

/// Summary, keywords and (when embedding succeeded) the summary embedding
#[derive(Debug, Clone, PartialEq)]
pub struct CommunitySummary {
    pub summary: String,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummarizationReport {
    pub summarized: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SummarizationReport {
    fn record(&mut self, outcome: &Result<CommunitySummary, SummaryError>) {
        match outcome {
            Ok(_) => self.summarized += 1,
            Err(e) if e.is_skip() => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// What a parent prompt needs from each child
#[derive(Debug, Clone)]
struct ChildTheme {
    summary: String,
    keywords: Vec<String>,
}

pub struct CommunitySummarizer {
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    entities: Arc<dyn KnowledgeGraphRepository>,
    communities: Arc<dyn CommunityRepository>,
    concurrency: usize,
}

impl CommunitySummarizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        entities: Arc<dyn KnowledgeGraphRepository>,
        communities: Arc<dyn CommunityRepository>,
    ) -> Self {
        Self {
            generator,
            embedder,
            entities,
            communities,
            concurrency: 4,
        }
    }

    /// Communities summarized at once within a level (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Summarize and persist every community, lowest level first
    pub async fn summarize_all(&self, communities: Vec<Community>) -> SummarizationReport {
        let mut report = SummarizationReport::default();
        if communities.is_empty() {
            return report;
        }

        let entities: Option<HashMap<String, KnowledgeEntity>> =
            match self.entities.list_entities().await {
                Ok(list) => Some(list.into_iter().map(|e| (e.id.clone(), e)).collect()),
                Err(e) => {
                    warn!(error = %e, "Could not load entities for leaf summaries");
                    None
                }
            };

        let mut themes: HashMap<String, ChildTheme> = communities
            .iter()
            .filter(|c| c.has_summary())
            .map(|c| {
                let theme = ChildTheme {
                    summary: c.summary.clone().unwrap_or_default(),
                    keywords: c.keywords.clone(),
                };
                (c.id.clone(), theme)
            })
            .collect();

        let mut by_level: BTreeMap<u32, Vec<Community>> = BTreeMap::new();
        for community in communities {
            by_level.entry(community.level).or_default().push(community);
        }

        for (level, group) in by_level {
            let pending: Vec<BoxFuture<'_, SummaryOutcome>> = group
                .iter()
                .map(|community| {
                    self.summarize_and_store(community, entities.as_ref(), &themes)
                        .map(move |outcome| (community.id.clone(), outcome))
                        .boxed()
                })
                .collect();
            let outcomes: Vec<SummaryOutcome> = stream::iter(pending)
                .buffered(self.concurrency)
                .collect()
                .await;

            let before = report;
            for (community_id, outcome) in outcomes {
                report.record(&outcome);
                match outcome {
                    Ok(summary) => {
                        themes.insert(
                            community_id,
                            ChildTheme {
                                summary: summary.summary,
                                keywords: summary.keywords,
                            },
                        );
                    }
                    Err(e) if e.is_skip() => {
                        debug!(community_id = %community_id, level, reason = %e, "Community not summarized");
                    }
                    Err(e) => {
                        warn!(community_id = %community_id, level, error = %e, "Community summary failed");
                    }
                }
            }

            info!(
                level,
                summarized = report.summarized - before.summarized,
                skipped = report.skipped - before.skipped,
                failed = report.failed - before.failed,
                "Level summarized"
            );
        }

        report
    }

    /// Summarize one community against the current store without persisting
    ///
    /// Parents read their children's summaries from the store.
    pub async fn summarize_one(&self, community: &Community) -> Result<CommunitySummary, SummaryError> {
        let prompt = if community.is_leaf() {
            let mut members = Vec::new();
            for id in community.member_entity_ids.iter().take(MAX_PROMPT_MEMBERS) {
                let entity = self
                    .entities
                    .get_entity(id)
                    .await
                    .map_err(|e| SummaryError::Store(e.to_string()))?;
                members.extend(entity);
            }
            leaf_prompt(&members, community.member_count)?
        } else {
            let children = self
                .communities
                .get_children(&community.id)
                .await
                .map_err(|e| SummaryError::Store(e.to_string()))?;
            let themes: Vec<ChildTheme> = children
                .into_iter()
                .filter(|c| c.has_summary())
                .map(|c| ChildTheme {
                    summary: c.summary.unwrap_or_default(),
                    keywords: c.keywords,
                })
                .collect();
            parent_prompt(&themes)?
        };

        self.generate_summary(&community.id, &prompt).await
    }

    async fn summarize_and_store(
        &self,
        community: &Community,
        entities: Option<&HashMap<String, KnowledgeEntity>>,
        themes: &HashMap<String, ChildTheme>,
    ) -> Result<CommunitySummary, SummaryError> {
        let prompt = if community.is_leaf() {
            let entities =
                entities.ok_or_else(|| SummaryError::Store("entities unavailable".to_string()))?;
            let members: Vec<KnowledgeEntity> = community
                .member_entity_ids
                .iter()
                .take(MAX_PROMPT_MEMBERS)
                .filter_map(|id| entities.get(id).cloned())
                .collect();
            leaf_prompt(&members, community.member_count)?
        } else {
            let children: Vec<ChildTheme> = community
                .child_community_ids
                .iter()
                .filter_map(|id| themes.get(id).cloned())
                .collect();
            parent_prompt(&children)?
        };

        let summary = self.generate_summary(&community.id, &prompt).await?;

        self.communities
            .update_summary(
                &community.id,
                &summary.summary,
                &summary.keywords,
                summary.embedding.as_deref(),
            )
            .await
            .map_err(|e| SummaryError::Store(e.to_string()))?;

        Ok(summary)
    }

    async fn generate_summary(
        &self,
        community_id: &str,
        prompt: &str,
    ) -> Result<CommunitySummary, SummaryError> {
        let options = GenerationOptions::new()
            .with_temperature(SUMMARY_TEMPERATURE)
            .with_max_tokens(SUMMARY_MAX_TOKENS);

        let generation = self
            .generator
            .generate(prompt, &options)
            .await
            .map_err(|e| SummaryError::GenerationFailed(e.to_string()))?;
        let (summary, keywords) = parse_summary_response(&generation.text)?;

        let embedding = match self.embedder.embed(&summary).await {
            Ok(vector) if vector.dimensions() > 0 => Some(vector.into_vec()),
            Ok(_) => None,
            Err(e) => {
                warn!(community_id = %community_id, error = %e, "Summary embedding failed");
                None
            }
        };

        debug!(
            community_id = %community_id,
            keywords = keywords.len(),
            embedded = embedding.is_some(),
            "Community summarized"
        );
        Ok(CommunitySummary {
            summary,
            keywords,
            embedding,
        })
    }
}

fn leaf_prompt(members: &[KnowledgeEntity], member_count: usize) -> Result<String, SummaryError> {
    if members.is_empty() {
        return Err(SummaryError::NoMembers);
    }

    let mut prompt = String::from(
        "You are analyzing a cluster of related notes from a personal knowledge base.\n\nNotes in this cluster:\n",
    );
    for member in members {
        let preview = member.preview(MAX_PREVIEW_CHARS);
        if preview.is_empty() {
            prompt.push_str(&format!("- {}\n", member.title));
        } else {
            prompt.push_str(&format!("- {}: {}\n", member.title, preview));
        }
    }
    if member_count > members.len() {
        prompt.push_str(&format!("(and {} more notes)\n", member_count - members.len()));
    }
    prompt.push_str(RESPONSE_INSTRUCTIONS_LEAF);
    Ok(prompt)
}

fn parent_prompt(children: &[ChildTheme]) -> Result<String, SummaryError> {
    if children.is_empty() {
        return Err(SummaryError::NoChildSummaries);
    }

    let mut prompt = String::from(
        "You are analyzing a group of related topic clusters from a personal knowledge base.\n\nSub-themes:\n",
    );
    for child in children {
        if child.keywords.is_empty() {
            prompt.push_str(&format!("- {}\n", child.summary));
        } else {
            prompt.push_str(&format!(
                "- {} (keywords: {})\n",
                child.summary,
                child.keywords.join(", ")
            ));
        }
    }
    prompt.push_str(RESPONSE_INSTRUCTIONS_PARENT);
    Ok(prompt)
}

const RESPONSE_INSTRUCTIONS_LEAF: &str = "\nDescribe the shared theme of these notes in 2-3 sentences and list 3-5 keywords.\n\
Respond with JSON only: {\"summary\": \"...\", \"keywords\": [\"...\"]}";

const RESPONSE_INSTRUCTIONS_PARENT: &str = "\nSynthesize the overarching theme of these sub-themes in 2-3 sentences and list 3-5 keywords.\n\
Respond with JSON only: {\"summary\": \"...\", \"keywords\": [\"...\"]}";

/// Parse `{summary, keywords}`, tolerating a surrounding markdown fence
pub fn parse_summary_response(text: &str) -> Result<(String, Vec<String>), SummaryError> {
    let body = strip_code_fence(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| SummaryError::MalformedResponse(e.to_string()))?;

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SummaryError::MalformedResponse("missing summary".to_string()))?;

    Ok((summary.to_string(), normalize_keywords(value.get("keywords"))))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (```json)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Keywords as trimmed, non-empty, unique strings
///
/// Numbers are stringified; objects, arrays, booleans and nulls are dropped.
/// A single comma-separated string is split.
pub fn normalize_keywords(value: Option<&Value>) -> Vec<String> {
    let candidates: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut keywords: Vec<String> = Vec::new();
    for candidate in candidates {
        let keyword = candidate.trim();
        if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}
