//! Global Query Service
//!
//! Answers corpus-wide questions by map-reduce over the root communities:
//! every summarized root answers from its own theme, then one extra call
//! merges the relevant partial answers.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::entity::Community;
use super::repository::CommunityRepository;
use crate::config::GlobalQueryConfig;
use crate::error::Result;
use crate::llm::{GenerationOptions, TextGenerator};

/// Exact reply a root gives when its theme does not apply
pub const NOT_RELEVANT: &str = "NOT_RELEVANT";

/// Joins partial answers when the reduce call fails
pub const ANSWER_SEPARATOR: &str = "\n\n---\n\n";

const MAP_MAX_TOKENS: usize = 400;
const REDUCE_MAX_TOKENS: usize = 800;

pub struct GlobalQueryService {
    generator: Arc<dyn TextGenerator>,
    communities: Arc<dyn CommunityRepository>,
    config: GlobalQueryConfig,
}

impl GlobalQueryService {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        communities: Arc<dyn CommunityRepository>,
        config: GlobalQueryConfig,
    ) -> Self {
        Self {
            generator,
            communities,
            config,
        }
    }

    /// Whether a question is about the corpus as a whole
    ///
    /// A keyword heuristic: the feature must be enabled and the lowercased
    /// query must contain one of the configured signal words.
    pub fn is_global_query(&self, query: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let query = query.to_lowercase();
        self.config
            .signal_words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .any(|word| !word.is_empty() && query.contains(&word))
    }

    /// `None` when no root community has anything to say
    pub async fn answer(&self, query: &str) -> Result<Option<String>> {
        let roots = self.communities.get_roots().await?;
        let summarized: Vec<&Community> = roots.iter().filter(|c| c.has_summary()).collect();
        if summarized.is_empty() {
            debug!(roots = roots.len(), "No summarized root communities");
            return Ok(None);
        }

        let partials: Vec<String> = join_all(summarized.iter().map(|c| self.map_one(query, c)))
            .await
            .into_iter()
            .flatten()
            .collect();

        info!(
            roots = summarized.len(),
            relevant = partials.len(),
            "Global query mapped"
        );

        match partials.len() {
            0 => Ok(None),
            1 => Ok(partials.into_iter().next()),
            _ => Ok(Some(self.reduce(query, &partials).await)),
        }
    }

    async fn map_one(&self, query: &str, community: &Community) -> Option<String> {
        let prompt = map_prompt(query, community);
        let options = GenerationOptions::new()
            .with_temperature(0.2)
            .with_max_tokens(MAP_MAX_TOKENS);

        match self.generator.generate(&prompt, &options).await {
            Ok(generation) => {
                let text = generation.text.trim();
                if text.is_empty() || text.starts_with(NOT_RELEVANT) {
                    debug!(community_id = %community.id, "Root community not relevant");
                    None
                } else {
                    Some(generation.text)
                }
            }
            Err(e) => {
                warn!(community_id = %community.id, error = %e, "Map call failed");
                None
            }
        }
    }

    async fn reduce(&self, query: &str, partials: &[String]) -> String {
        let prompt = reduce_prompt(query, partials);
        let options = GenerationOptions::new()
            .with_temperature(0.3)
            .with_max_tokens(REDUCE_MAX_TOKENS);

        match self.generator.generate(&prompt, &options).await {
            Ok(generation) if !generation.text.trim().is_empty() => generation.text,
            Ok(_) => {
                warn!("Reduce call returned nothing, joining partial answers");
                partials.join(ANSWER_SEPARATOR)
            }
            Err(e) => {
                warn!(error = %e, "Reduce call failed, joining partial answers");
                partials.join(ANSWER_SEPARATOR)
            }
        }
    }
}

fn map_prompt(query: &str, community: &Community) -> String {
    let mut prompt = format!(
        "You are answering a question about a personal knowledge base using one of its themes.\n\n\
         Theme: {}\n",
        community.summary.as_deref().unwrap_or_default()
    );
    if !community.keywords.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", community.keywords.join(", ")));
    }
    prompt.push_str(&format!(
        "\nQuestion: {query}\n\n\
         Answer using only this theme. If the theme does not help answer the question, \
         reply with exactly {NOT_RELEVANT} and nothing else."
    ));
    prompt
}

fn reduce_prompt(query: &str, partials: &[String]) -> String {
    let mut prompt = format!(
        "Several themes of a personal knowledge base answered the same question.\n\n\
         Question: {query}\n\nPartial answers:\n"
    );
    for (i, partial) in partials.iter().enumerate() {
        prompt.push_str(&format!("\n[{}] {}\n", i + 1, partial.trim()));
    }
    prompt.push_str("\nCombine them into one coherent answer without repeating yourself.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::community::test_support::ScriptedGenerator;
    use crate::error::Error;
    use crate::infrastructure::community::SqliteCommunityRepository;
    use crate::storage::Database;

    async fn store_with_roots(summaries: &[Option<&str>]) -> Arc<SqliteCommunityRepository> {
        let db = Database::in_memory().await.unwrap();
        let repo = Arc::new(SqliteCommunityRepository::new(db.pool().clone()));

        let roots: Vec<Community> = summaries
            .iter()
            .enumerate()
            .map(|(i, summary)| {
                let mut c = Community::new(0, vec![format!("e{i}")], "louvain");
                c.summary = summary.map(str::to_string);
                c
            })
            .collect();
        repo.save_batch(&roots).await.unwrap();
        repo
    }

    fn service(generator: Arc<ScriptedGenerator>, repo: Arc<SqliteCommunityRepository>) -> GlobalQueryService {
        GlobalQueryService::new(generator, repo, GlobalQueryConfig::default())
    }

    #[tokio::test]
    async fn test_signal_words() {
        let repo = store_with_roots(&[]).await;
        let svc = service(Arc::new(ScriptedGenerator::failing()), repo.clone());

        assert!(svc.is_global_query("What are the main THEMES in my notes?"));
        assert!(svc.is_global_query("give me the big picture"));
        assert!(!svc.is_global_query("What did I write about tokio?"));

        let disabled = GlobalQueryService::new(
            Arc::new(ScriptedGenerator::failing()),
            repo,
            GlobalQueryConfig {
                enabled: false,
                ..GlobalQueryConfig::default()
            },
        );
        assert!(!disabled.is_global_query("overall themes"));
    }

    #[tokio::test]
    async fn test_no_roots_means_no_answer() {
        let generator = Arc::new(ScriptedGenerator::always("anything"));
        let svc = service(generator.clone(), store_with_roots(&[]).await);

        assert_eq!(svc.answer("overall?").await.unwrap(), None);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsummarized_roots_are_not_asked() {
        let generator = Arc::new(ScriptedGenerator::always("anything"));
        let svc = service(generator.clone(), store_with_roots(&[None, None]).await);

        assert_eq!(svc.answer("overall?").await.unwrap(), None);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_relevant_root_is_returned_verbatim() {
        let generator = Arc::new(ScriptedGenerator::new(|prompt| {
            if prompt.contains("Theme: Cooking") {
                Ok("  Mostly pasta.\n".to_string())
            } else {
                Ok(NOT_RELEVANT.to_string())
            }
        }));
        let svc = service(
            generator.clone(),
            store_with_roots(&[Some("Cooking notes."), Some("Rust notes.")]).await,
        );

        let answer = svc.answer("What do I cook overall?").await.unwrap();
        assert_eq!(answer.as_deref(), Some("  Mostly pasta.\n"));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_relevant_roots_trigger_one_reduce_call() {
        let generator = Arc::new(ScriptedGenerator::new(|prompt| {
            if prompt.contains("Partial answers") {
                Ok("Combined.".to_string())
            } else if prompt.contains("Theme: Cooking") {
                Ok("Pasta.".to_string())
            } else {
                Ok("Rust.".to_string())
            }
        }));
        let svc = service(
            generator.clone(),
            store_with_roots(&[Some("Cooking notes."), Some("Rust notes.")]).await,
        );

        let answer = svc.answer("summarize everything").await.unwrap();
        assert_eq!(answer.as_deref(), Some("Combined."));
        assert_eq!(generator.calls(), 3);

        let reduce = generator
            .prompts()
            .into_iter()
            .find(|p| p.contains("Partial answers"))
            .unwrap();
        assert!(reduce.contains("Pasta.") && reduce.contains("Rust."));
    }

    #[tokio::test]
    async fn test_reduce_failure_falls_back_to_joined_partials() {
        let generator = Arc::new(ScriptedGenerator::new(|prompt| {
            if prompt.contains("Partial answers") {
                Err(Error::LLMError("quota".to_string()))
            } else if prompt.contains("Theme: Cooking") {
                Ok("Pasta.".to_string())
            } else {
                Ok("Rust.".to_string())
            }
        }));
        let svc = service(
            generator,
            store_with_roots(&[Some("Cooking notes."), Some("Rust notes.")]).await,
        );

        let answer = svc.answer("overall").await.unwrap().unwrap();
        assert_eq!(answer, format!("Pasta.{ANSWER_SEPARATOR}Rust."));
    }

    #[tokio::test]
    async fn test_failed_and_blank_map_calls_drop_out() {
        let generator = Arc::new(ScriptedGenerator::new(|prompt| {
            if prompt.contains("Theme: Cooking") {
                Err(Error::LLMError("timeout".to_string()))
            } else if prompt.contains("Theme: Travel") {
                Ok("   ".to_string())
            } else {
                Ok("Rust.".to_string())
            }
        }));
        let svc = service(
            generator.clone(),
            store_with_roots(&[Some("Cooking notes."), Some("Travel notes."), Some("Rust notes.")]).await,
        );

        assert_eq!(svc.answer("overall").await.unwrap().as_deref(), Some("Rust."));
        assert_eq!(generator.calls(), 3);
    }
}
