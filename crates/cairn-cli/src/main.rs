//! Cairn CLI - topic communities over a local knowledge graph

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::config::Config;
use cairn_core::domain::community::{
    Community, CommunityDetectionService, CommunityHierarchy, CommunitySearchService,
    GlobalQueryService,
};
use cairn_core::domain::knowledge::{
    KnowledgeEntity, KnowledgeEvent, KnowledgeGraphRepository, KnowledgeGraphService,
};
use cairn_core::infrastructure::community::SqliteCommunityRepository;
use cairn_core::infrastructure::knowledge::SqliteKnowledgeGraphRepository;
use cairn_core::llm::{
    Embedder, EmbeddingVector, Generation, GenerationOptions, LlmClient, TextGenerator,
};
use cairn_core::storage::{Database, DatabaseConfig, default_database_path};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about = "Topic communities for a local knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage knowledge entities
    Entity {
        #[command(subcommand)]
        action: EntityAction,
    },

    /// Manage relationships between entities
    Relation {
        #[command(subcommand)]
        action: RelationAction,
    },

    /// Detect, browse and query topic communities
    Communities {
        #[command(subcommand)]
        action: CommunityAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check configuration, API key and database health
    Doctor,
}

#[derive(Subcommand)]
enum EntityAction {
    /// Add an entity
    Add {
        /// Entity title
        title: String,
        /// Entity body
        #[arg(short, long, default_value = "")]
        content: String,
    },
    /// List all entities
    List,
    /// Remove an entity and its relationships
    Remove {
        /// Entity ID or exact title
        entity: String,
    },
}

#[derive(Subcommand)]
enum RelationAction {
    /// Connect two entities
    Add {
        /// Source entity ID or exact title
        source: String,
        /// Target entity ID or exact title
        target: String,
        /// Relationship label
        #[arg(short, long)]
        label: Option<String>,
        /// Confidence in [0, 1], used as the edge weight
        #[arg(long)]
        confidence: Option<f32>,
    },
    /// List all relationships
    List,
    /// Remove a relationship
    Remove {
        /// Relationship ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CommunityAction {
    /// Rebuild the community hierarchy from the current graph
    Detect,
    /// Show community statistics
    Stats,
    /// Print the community hierarchy
    Hierarchy {
        /// Check the structural invariants instead of printing the tree
        #[arg(long)]
        check: bool,
    },
    /// Find leaf communities related to a query
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Answer a question about the knowledge base as a whole
    Ask {
        /// Question
        question: String,
        /// Answer even if the question does not look corpus-wide
        #[arg(long)]
        force: bool,
    },
    /// Mark every community stale
    Invalidate {
        /// Reason recorded in the logs
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Re-summarize stale communities without reclustering
    Refresh,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration
    List,
    /// Reset configuration to defaults
    Reset,
    /// Print the configuration file path
    Path,
}

/// Stand-in for the LLM when no API key is configured
///
/// Detection still clusters and persists; every summary is reported failed.
struct Unconfigured(String);

#[async_trait]
impl TextGenerator for Unconfigured {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> cairn_core::Result<Generation> {
        Err(cairn_core::Error::LLMError(self.0.clone()))
    }
}

#[async_trait]
impl Embedder for Unconfigured {
    async fn embed(&self, _text: &str) -> cairn_core::Result<EmbeddingVector> {
        Err(cairn_core::Error::EmbeddingFailed(self.0.clone()))
    }
}

/// Everything a command needs, opened once per invocation
struct Context {
    config: Config,
    knowledge: Arc<SqliteKnowledgeGraphRepository>,
    communities: Arc<SqliteCommunityRepository>,
    format: OutputFormat,
    quiet: bool,
}

impl Context {
    async fn open(format: OutputFormat, quiet: bool) -> anyhow::Result<Self> {
        let config = Config::load()?;
        let db = open_database(&config).await?;

        Ok(Self {
            knowledge: Arc::new(SqliteKnowledgeGraphRepository::new(db.pool().clone())),
            communities: Arc::new(SqliteCommunityRepository::new(db.pool().clone())),
            config,
            format,
            quiet,
        })
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// A configured client, or the offline stand-in when `required` is false
    fn llm(&self, required: bool) -> anyhow::Result<(Arc<dyn TextGenerator>, Arc<dyn Embedder>)> {
        match LlmClient::from_config(&self.config) {
            Ok(client) => {
                let client = Arc::new(client);
                let generator: Arc<dyn TextGenerator> = client.clone();
                let embedder: Arc<dyn Embedder> = client;
                Ok((generator, embedder))
            }
            Err(e) if !required => {
                debug!(error = %e, "LLM unavailable, using offline stand-in");
                let offline = Arc::new(Unconfigured(e.to_string()));
                let generator: Arc<dyn TextGenerator> = offline.clone();
                let embedder: Arc<dyn Embedder> = offline;
                Ok((generator, embedder))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn detection(&self, require_llm: bool) -> anyhow::Result<CommunityDetectionService> {
        let (generator, embedder) = self.llm(require_llm)?;
        Ok(CommunityDetectionService::new(
            self.config.communities.clone(),
            self.knowledge.clone(),
            self.communities.clone(),
            generator,
            embedder,
        ))
    }

    fn print<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cairn=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Doctor => cmd_doctor(cli.quiet).await,
        Commands::Entity { action } => {
            let ctx = Context::open(cli.format, cli.quiet).await?;
            cmd_entity(&ctx, action).await
        }
        Commands::Relation { action } => {
            let ctx = Context::open(cli.format, cli.quiet).await?;
            cmd_relation(&ctx, action).await
        }
        Commands::Communities { action } => {
            let ctx = Context::open(cli.format, cli.quiet).await?;
            cmd_communities(&ctx, action).await
        }
    }
}

async fn cmd_entity(ctx: &Context, action: EntityAction) -> anyhow::Result<()> {
    let service = KnowledgeGraphService::new(ctx.knowledge.clone());
    let mut events = service.subscribe();

    match action {
        EntityAction::Add { title, content } => {
            let entity = service.create_entity(title, content).await?;
            invalidate_after(ctx, &mut events).await?;
            if ctx.json() {
                ctx.print(&entity)?;
            } else if ctx.quiet {
                println!("{}", entity.id);
            } else {
                println!("Entity added: {} ({})", entity.title, entity.id);
            }
        }
        EntityAction::List => {
            let entities = service.list_entities().await?;
            if ctx.json() {
                ctx.print(&entities)?;
            } else if entities.is_empty() {
                if !ctx.quiet {
                    println!("No entities found.");
                    println!("\nAdd one with: cairn entity add <title>");
                }
            } else {
                for e in entities {
                    println!("  {} - {}", short_id(&e.id), e.title);
                }
            }
        }
        EntityAction::Remove { entity } => {
            let entity = resolve_entity(ctx.knowledge.as_ref(), &entity).await?;
            service.delete_entity(&entity.id).await?;
            invalidate_after(ctx, &mut events).await?;
            if !ctx.quiet {
                println!("Entity '{}' removed.", entity.title);
            }
        }
    }
    Ok(())
}

async fn cmd_relation(ctx: &Context, action: RelationAction) -> anyhow::Result<()> {
    let service = KnowledgeGraphService::new(ctx.knowledge.clone());
    let mut events = service.subscribe();

    match action {
        RelationAction::Add {
            source,
            target,
            label,
            confidence,
        } => {
            let source = resolve_entity(ctx.knowledge.as_ref(), &source).await?;
            let target = resolve_entity(ctx.knowledge.as_ref(), &target).await?;
            let relationship = service
                .connect(&source.id, &target.id, label, confidence)
                .await?;
            invalidate_after(ctx, &mut events).await?;
            if ctx.json() {
                ctx.print(&relationship)?;
            } else if ctx.quiet {
                println!("{}", relationship.id);
            } else {
                println!(
                    "Connected '{}' -> '{}' ({})",
                    source.title, target.title, relationship.id
                );
            }
        }
        RelationAction::List => {
            let relationships = service.list_relationships().await?;
            if ctx.json() {
                ctx.print(&relationships)?;
            } else if relationships.is_empty() {
                if !ctx.quiet {
                    println!("No relationships found.");
                }
            } else {
                for r in relationships {
                    let label = r.label.as_deref().unwrap_or("related");
                    println!(
                        "  {} - {} -[{}]-> {}",
                        short_id(&r.id),
                        short_id(&r.source_entity_id),
                        label,
                        short_id(&r.target_entity_id)
                    );
                }
            }
        }
        RelationAction::Remove { id } => {
            if !service.disconnect(&id).await? {
                return Err(anyhow::anyhow!(
                    "Relationship '{}' not found. Run `cairn relation list` to see all relationships.",
                    id
                ));
            }
            invalidate_after(ctx, &mut events).await?;
            if !ctx.quiet {
                println!("Relationship '{}' removed.", id);
            }
        }
    }
    Ok(())
}

/// Feed the mutation events of this invocation to the invalidation path
async fn invalidate_after(
    ctx: &Context,
    events: &mut broadcast::Receiver<KnowledgeEvent>,
) -> anyhow::Result<()> {
    let detection = ctx.detection(false)?;
    while let Ok(event) = events.try_recv() {
        if detection.invalidate(event.reason()).await? {
            debug!(event = event.event_type_name(), "Communities marked stale");
        }
    }
    Ok(())
}

async fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = config
        .database
        .path
        .clone()
        .unwrap_or_else(default_database_path);
    let db = Database::new(DatabaseConfig::with_path(&path)).await?;
    debug!(path = %path.display(), "Database ready");
    Ok(db)
}

/// Look an entity up by id, falling back to an exact title match
async fn resolve_entity(
    repository: &SqliteKnowledgeGraphRepository,
    key: &str,
) -> anyhow::Result<KnowledgeEntity> {
    if let Some(entity) = repository.get_entity(key).await? {
        return Ok(entity);
    }
    repository
        .list_entities()
        .await?
        .into_iter()
        .find(|e| e.title == key)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Entity '{}' not found. Run `cairn entity list` to see all entities.",
                key
            )
        })
}

async fn cmd_communities(ctx: &Context, action: CommunityAction) -> anyhow::Result<()> {
    match action {
        CommunityAction::Detect => {
            if ctx.config.llm.resolved_api_key()?.is_none() {
                warn!("No API key set, communities will not be summarized");
            }
            let detection = ctx.detection(false)?;
            let hierarchy = detection.detect_communities().await?;
            if ctx.json() {
                ctx.print(&hierarchy)?;
            } else if !ctx.quiet {
                if hierarchy.is_empty() {
                    println!("Not enough connected entities to form communities.");
                } else {
                    println!(
                        "Detected {} communities across {} levels.",
                        hierarchy.total_communities(),
                        hierarchy.levels.len()
                    );
                    for (level, communities) in &hierarchy.levels {
                        let summarized = communities.iter().filter(|c| c.has_summary()).count();
                        println!(
                            "  Level {}: {} communities ({} summarized)",
                            level,
                            communities.len(),
                            summarized
                        );
                    }
                }
            }
        }

        CommunityAction::Stats => {
            let stats = ctx.detection(false)?.get_stats().await?;
            if ctx.json() {
                ctx.print(&stats)?;
            } else {
                println!("Communities: {}", stats.total_communities);
                println!("  Levels: {}", stats.levels);
                println!(
                    "  Size: min {} / avg {:.1} / max {}",
                    stats.smallest_community,
                    stats.average_community_size,
                    stats.largest_community
                );
                println!("  Stale: {}", stats.stale_count);
                println!("  Changes since detection: {}", stats.changes_since_detection);
                match stats.last_detected_at {
                    Some(at) => println!("  Last detected: {}", at.format("%Y-%m-%d %H:%M:%S")),
                    None => println!("  Last detected: never"),
                }
            }
        }

        CommunityAction::Hierarchy { check } => {
            let hierarchy = ctx.detection(false)?.get_hierarchy().await?;
            if check {
                hierarchy
                    .validate()
                    .map_err(|violation| anyhow::anyhow!("Hierarchy is inconsistent: {}", violation))?;
                if !ctx.quiet {
                    println!(
                        "Hierarchy OK ({} communities).",
                        hierarchy.total_communities()
                    );
                }
            } else if ctx.json() {
                ctx.print(&hierarchy)?;
            } else if hierarchy.is_empty() {
                if !ctx.quiet {
                    println!("No communities yet.");
                    println!("\nBuild them with: cairn communities detect");
                }
            } else {
                print_tree(&hierarchy);
            }
        }

        CommunityAction::Search { query, limit } => {
            let (_, embedder) = ctx.llm(true)?;
            let search = CommunitySearchService::new(
                embedder,
                ctx.communities.clone(),
                ctx.knowledge.clone(),
            );
            let hits = search.search(&query, limit).await?;
            if ctx.json() {
                ctx.print(&hits)?;
            } else if hits.is_empty() {
                if !ctx.quiet {
                    println!("No matching communities.");
                }
            } else {
                for hit in hits {
                    println!(
                        "{:.3}  {}  {}",
                        hit.score,
                        short_id(&hit.community.id),
                        first_line(hit.community.summary.as_deref().unwrap_or_default())
                    );
                    let titles: Vec<&str> = hit.members.iter().map(|m| m.title.as_str()).collect();
                    if !titles.is_empty() {
                        println!("       members: {}", titles.join(", "));
                    }
                }
            }
        }

        CommunityAction::Ask { question, force } => {
            let global_query = |generator: Arc<dyn TextGenerator>| {
                GlobalQueryService::new(
                    generator,
                    ctx.communities.clone(),
                    ctx.config.communities.global_query.clone(),
                )
            };
            let global = global_query(ctx.llm(false)?.0).is_global_query(&question);
            if !global && !force {
                if ctx.json() {
                    ctx.print(&serde_json::json!({ "global": false, "answer": null }))?;
                } else if !ctx.quiet {
                    println!("This does not look like a question about the knowledge base as a whole.");
                    println!("\nAsk anyway with: cairn communities ask --force \"{}\"", question);
                }
                return Ok(());
            }

            let (generator, _) = ctx.llm(true)?;
            let answer = global_query(generator).answer(&question).await?;
            if ctx.json() {
                ctx.print(&serde_json::json!({ "global": global, "answer": answer }))?;
            } else {
                match answer {
                    Some(text) => println!("{}", text.trim()),
                    None => {
                        if !ctx.quiet {
                            println!("No community had anything relevant to say.");
                        }
                    }
                }
            }
        }

        CommunityAction::Invalidate { reason } => {
            let marked = ctx.detection(false)?.invalidate(&reason).await?;
            if ctx.json() {
                ctx.print(&serde_json::json!({ "invalidated": marked }))?;
            } else if !ctx.quiet {
                if marked {
                    println!("Communities marked stale.");
                } else {
                    println!("Nothing to invalidate.");
                }
            }
        }

        CommunityAction::Refresh => {
            let report = ctx.detection(true)?.refresh_stale_summaries().await?;
            if ctx.json() {
                ctx.print(&report)?;
            } else if !ctx.quiet {
                println!(
                    "Refreshed {} communities ({} skipped, {} failed).",
                    report.refreshed, report.skipped, report.failed
                );
            }
        }
    }
    Ok(())
}

fn print_tree(hierarchy: &CommunityHierarchy) {
    let mut seen = HashSet::new();
    let mut stack: Vec<(&Community, usize)> =
        hierarchy.roots.iter().rev().map(|c| (c, 0)).collect();

    while let Some((community, depth)) = stack.pop() {
        if !seen.insert(community.id.as_str()) {
            continue;
        }
        let stale = if community.stale { " [stale]" } else { "" };
        println!(
            "{}- L{} {} ({} members){}  {}",
            "  ".repeat(depth),
            community.level,
            short_id(&community.id),
            community.member_count,
            stale,
            first_line(community.summary.as_deref().unwrap_or("(no summary)"))
        );
        for child in hierarchy.children_of(&community.id).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Cairn Health Check");
        println!("==================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            return Err(anyhow::anyhow!("Health check failed"));
        }
    };

    match config.llm.redacted_api_key() {
        Ok(Some(redacted)) => {
            if !quiet {
                println!("[OK] API Key: Configured ({})", redacted);
            }
        }
        Ok(None) => {
            all_ok = false;
            if !quiet {
                println!("[!!] API Key: Not configured");
                println!("     Set CAIRN_API_KEY or OPENROUTER_API_KEY environment variable");
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] API Key: Error - {}", e);
            }
        }
    }

    match open_database(&config).await {
        Ok(db) => {
            let healthy = db.health_check().await;
            let status = db.migration_status().await;
            match (healthy, status) {
                (Ok(()), Ok(status)) if !status.needs_migration => {
                    if !quiet {
                        println!(
                            "[OK] Database: {} (schema v{})",
                            db.path().display(),
                            status.current_version
                        );
                    }
                }
                (Ok(()), Ok(status)) => {
                    all_ok = false;
                    if !quiet {
                        println!(
                            "[!!] Database: schema v{} behind v{}",
                            status.current_version, status.target_version
                        );
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Error - {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Error - {}", e);
            }
        }
    }

    if !quiet {
        let c = &config.communities;
        let state = if c.enabled { "enabled" } else { "disabled" };
        println!(
            "[--] Communities: {} ({}, max {} levels)",
            state, c.algorithm, c.hierarchical_levels
        );
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks need attention.");
        }
    }
    Ok(())
}
