//! InKCre CLI - personal knowledge graph

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use clap::{Parser, Subcommand};
use inkcre_core::config::Config;
use inkcre_core::domain::graph::{
    Block, BlockId, EntityKind, GraphRepository, NewBlock, Relation, RelationId, ResolverKind,
    Storage, StorageKind,
};
use inkcre_core::domain::resolver::ResolverRegistry;
use inkcre_core::domain::{GraphContext, GraphService, SearchOutcome, SearchState, ServiceSettings};
use inkcre_core::infrastructure::{
    FollowUpWorker, HttpContentResolver, QueueScheduler, SqliteGraphRepository, VisionAnalyzer,
    WorkerReport,
};
use inkcre_core::llm::LlmClient;
use inkcre_core::storage::{Database, DatabaseConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "inkcre")]
#[command(author, version, about = "Personal knowledge graph of blocks and relations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file, overriding `database.path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a block
    Add {
        /// Resolver kind (text, image, ...)
        kind: ResolverKind,
        /// Literal content, or a reference when --storage is set
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        content: Option<String>,
        /// Read content from a file; images are base64-encoded
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Storage that dereferences the content
        #[arg(short, long)]
        storage: Option<String>,
        /// Organize the block right away
        #[arg(long)]
        organize: bool,
    },

    /// Show a block and its relations
    Show { id: BlockId },

    /// Render a block as text
    Describe { id: BlockId },

    /// List recently updated blocks
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Relate two blocks: `to` is the `label` of `from`
    Relate {
        from: BlockId,
        to: BlockId,
        label: String,
    },

    /// Decompose a block into a subgraph
    Organize { id: BlockId },

    /// List blocks reachable from a block
    Traverse {
        id: BlockId,
        /// Levels to expand beyond the start (0 = direct successors)
        #[arg(short, long)]
        depth: Option<usize>,
        /// Report the start block when a cycle reaches it
        #[arg(long)]
        include_start: bool,
    },

    /// Find entities closest to a block by embedding
    Nearest {
        id: BlockId,
        /// Entity kind to search (block or relation)
        #[arg(long, default_value = "block", value_parser = parse_entity_kind)]
        kind: EntityKind,
        #[arg(short)]
        k: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },

    /// Let the agent explore the graph for blocks matching a requirement
    Search {
        id: BlockId,
        requirement: String,
        /// Treat the block as a query and start at its nearest neighbor
        #[arg(long)]
        from_query: bool,
    },

    /// Let the model pick blocks matching requirements
    Pick {
        /// Candidate block ids, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        blocks: Vec<BlockId>,
        /// Relation ids giving context, comma separated
        #[arg(short, long, value_delimiter = ',')]
        relations: Vec<RelationId>,
        #[arg(required = true)]
        requirements: Vec<String>,
    },

    /// Recompute a text block's embedding
    Embed { id: BlockId },

    /// Manage storages
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Show graph statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum StorageAction {
    /// Register or update a storage
    Add {
        name: String,
        #[arg(short, long)]
        nickname: Option<String>,
        /// Storage type
        #[arg(long = "type", default_value = "url", value_parser = parse_storage_kind)]
        kind: StorageKind,
    },
    /// Show a storage
    Show { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

fn parse_entity_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::parse(s).ok_or_else(|| format!("unknown entity kind '{}' (block, relation)", s))
}

fn parse_storage_kind(s: &str) -> Result<StorageKind, String> {
    StorageKind::parse(s).ok_or_else(|| format!("unknown storage type '{}' (url)", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("inkcre=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = &result
        && let Some(suggestion) = e
            .downcast_ref::<inkcre_core::Error>()
            .and_then(|e| e.suggestion())
    {
        eprintln!("hint: {}", suggestion);
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => return cmd_config(action, &out),
        Commands::Doctor => return cmd_doctor(cli.db, &out).await,
        _ => {}
    }

    let mut app = App::open(cli.db).await?;
    let result = app.dispatch(cli.command, &out).await;
    app.db.close().await;
    result
}

// ============================================================================
// Output
// ============================================================================

struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    /// Print `value` as json, or run `text` in text mode
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text if !self.quiet => text(),
            OutputFormat::Text => {}
        }
        Ok(())
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 72;
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > MAX || line.len() < content.trim_end().len() {
        let cut: String = line.chars().take(MAX).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

fn print_block(block: &Block) {
    let location = block
        .storage
        .as_deref()
        .map(|s| format!(" @{}", s))
        .unwrap_or_default();
    println!(
        "  [{}] {}{}: {}",
        block.id,
        block.kind,
        location,
        preview(&block.content)
    );
}

fn print_relation(relation: &Relation) {
    println!(
        "  <{}> {} --{}--> {}",
        relation.id, relation.from, relation.content, relation.to
    );
}

fn print_report(report: &WorkerReport) {
    if report.organized + report.skipped + report.failed > 0 {
        println!(
            "Follow-ups: {} organized, {} skipped, {} failed",
            report.organized, report.skipped, report.failed
        );
    }
}

// ============================================================================
// Wiring
// ============================================================================

struct App {
    db: Database,
    service: Arc<GraphService>,
    worker: FollowUpWorker,
    cancel: CancellationToken,
}

impl App {
    async fn open(db_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = Config::load()?;
        config.validate()?;

        let db_config = match db_path {
            Some(path) => DatabaseConfig::with_path(path)
                .max_connections(config.database.max_connections),
            None => DatabaseConfig::from_settings(&config.database)?,
        };
        let db = Database::new(db_config).await?;

        let repository = Arc::new(SqliteGraphRepository::new(db.pool().clone()));
        let (scheduler, rx) = QueueScheduler::channel();
        let mut ctx = GraphContext::new(repository)
            .with_content_resolver(Arc::new(HttpContentResolver::new()?))
            .with_scheduler(Arc::new(scheduler));

        match config.llm.resolved_api_key()? {
            Some(api_key) => {
                let client = LlmClient::builder()
                    .config(config.llm.clone())
                    .embedding(config.embedding.clone())
                    .api_key(api_key)
                    .build()?;
                ctx = ctx
                    .with_chat(Arc::new(client.clone()))
                    .with_embedder(Arc::new(client.clone()))
                    .with_vision(Arc::new(VisionAnalyzer::new(client)));
            }
            None => debug!("No API key configured, model-backed operations are unavailable"),
        }

        let service = Arc::new(GraphService::with_settings(
            ctx,
            ResolverRegistry::with_builtins(),
            ServiceSettings::from(&config),
        ));
        let worker = FollowUpWorker::new(rx, service.clone())
            .with_delay(Duration::from_secs(config.organize.follow_up_delay_secs));

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            db,
            service,
            worker,
            cancel,
        })
    }

    /// Run follow-ups queued by the last command
    async fn drain(&mut self) -> WorkerReport {
        self.worker.run_until_idle(&self.cancel).await
    }

    async fn dispatch(&mut self, command: Commands, out: &Output) -> anyhow::Result<()> {
        match command {
            Commands::Add {
                kind,
                content,
                file,
                storage,
                organize,
            } => self.cmd_add(kind, content, file, storage, organize, out).await,
            Commands::Show { id } => self.cmd_show(id, out).await,
            Commands::Describe { id } => {
                let text = self.service.describe(id).await?;
                out.emit(&serde_json::json!({ "id": id, "text": text }), || {
                    println!("{}", text)
                })
            }
            Commands::Recent { limit } => {
                let blocks = self.service.recent_blocks(limit).await?;
                out.emit(&blocks, || {
                    if blocks.is_empty() {
                        println!("No blocks yet.");
                        println!("\nAdd one with: inkcre add text \"...\"");
                    }
                    for block in &blocks {
                        print_block(block);
                    }
                })
            }
            Commands::Relate { from, to, label } => {
                let relation = self.service.create_relation(from, to, &label).await?;
                out.emit(&relation, || {
                    println!("Relation created:");
                    print_relation(&relation);
                })
            }
            Commands::Organize { id } => self.cmd_organize(id, out).await,
            Commands::Traverse {
                id,
                depth,
                include_start,
            } => {
                let reachable = self.service.traverse(id, depth, !include_start).await?;
                let mut blocks = Vec::with_capacity(reachable.blocks.len());
                for block_id in &reachable.blocks {
                    blocks.push(self.service.get_block(*block_id).await?);
                }
                out.emit(&reachable, || {
                    println!(
                        "{} blocks, {} relations reachable from {}",
                        reachable.blocks.len(),
                        reachable.relations.len(),
                        id
                    );
                    for block in &blocks {
                        print_block(block);
                    }
                })
            }
            Commands::Nearest {
                id,
                kind,
                k,
                min_similarity,
            } => {
                let results = self.service.nearest(id, kind, k, min_similarity).await?;
                out.emit(&results, || {
                    if results.is_empty() {
                        println!("No {}s above the similarity threshold.", kind);
                    }
                    for scored in &results {
                        println!(
                            "  {:.3}  {} {}: {}",
                            scored.similarity,
                            scored.entity.kind(),
                            scored.entity.id(),
                            preview(scored.entity.content())
                        );
                    }
                })
            }
            Commands::Search {
                id,
                requirement,
                from_query,
            } => self.cmd_search(id, &requirement, from_query, out).await,
            Commands::Pick {
                blocks,
                relations,
                requirements,
            } => {
                let picked = self
                    .service
                    .pick_blocks(&blocks, &relations, &requirements)
                    .await?;
                out.emit(&picked, || {
                    if picked.is_empty() {
                        println!("No blocks matched.");
                    }
                    for id in &picked {
                        println!("  {}", id);
                    }
                })
            }
            Commands::Embed { id } => {
                let embedding = self.service.refresh_embedding(id).await?;
                out.emit(
                    &serde_json::json!({ "id": id, "dimension": embedding.len() }),
                    || println!("Embedding refreshed for block {} ({} dims)", id, embedding.len()),
                )
            }
            Commands::Storage { action } => self.cmd_storage(action, out).await,
            Commands::Stats => {
                let stats = self.service.stats().await?;
                out.emit(&stats, || {
                    println!("Graph Statistics:");
                    println!("  Blocks: {}", stats.total_blocks);
                    println!("  Relations: {}", stats.total_relations);
                    println!("  Embedded blocks: {}", stats.blocks_with_embeddings);
                    println!("  Embedded relations: {}", stats.relations_with_embeddings);
                    if !stats.blocks_by_kind.is_empty() {
                        println!("  By kind:");
                        for (kind, count) in &stats.blocks_by_kind {
                            println!("    {}: {}", kind, count);
                        }
                    }
                })
            }
            Commands::Config { .. } | Commands::Doctor => Ok(()),
        }
    }

    // ========================================================================
    // Command Implementations
    // ========================================================================

    async fn cmd_add(
        &mut self,
        kind: ResolverKind,
        content: Option<String>,
        file: Option<PathBuf>,
        storage: Option<String>,
        organize: bool,
        out: &Output,
    ) -> anyhow::Result<()> {
        let content = match (content, file) {
            (Some(content), _) => content,
            (None, Some(path)) => read_content(&kind, &path)?,
            (None, None) => return Err(anyhow!("Either content or --file is required")),
        };

        let mut draft = NewBlock::new(kind, content);
        if let Some(storage) = storage {
            draft = draft.with_storage(storage);
        }

        let block = self.service.create_block(draft, organize).await?;
        let report = self.drain().await;

        out.emit(
            &serde_json::json!({ "block": block, "follow_ups": report }),
            || {
                println!("Block created:");
                print_block(&block);
                print_report(&report);
            },
        )
    }

    async fn cmd_show(&self, id: BlockId, out: &Output) -> anyhow::Result<()> {
        let block = self.service.get_block(id).await?;
        let (outgoing, incoming) = self.service.neighbors(id).await?;

        out.emit(
            &serde_json::json!({ "block": block, "outgoing": outgoing, "incoming": incoming }),
            || {
                println!("Block {}", block.id);
                println!("  Kind: {}", block.kind);
                if let Some(storage) = &block.storage {
                    println!("  Storage: {}", storage);
                }
                println!("  Content: {}", preview(&block.content));
                println!(
                    "  Embedding: {}",
                    block
                        .embedding
                        .as_ref()
                        .map(|e| format!("{} dims", e.len()))
                        .unwrap_or_else(|| "none".to_string())
                );
                println!("  Created: {}", block.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Updated: {}", block.updated_at.format("%Y-%m-%d %H:%M:%S"));
                if !outgoing.is_empty() {
                    println!("Outgoing:");
                    outgoing.iter().for_each(print_relation);
                }
                if !incoming.is_empty() {
                    println!("Incoming:");
                    incoming.iter().for_each(print_relation);
                }
            },
        )
    }

    async fn cmd_organize(&mut self, id: BlockId, out: &Output) -> anyhow::Result<()> {
        let outcome = self.service.organize(id, &self.cancel).await?;
        let report = self.drain().await;

        out.emit(
            &serde_json::json!({ "outcome": outcome, "follow_ups": report }),
            || {
                println!(
                    "Organized block {}: {} blocks, {} relations",
                    outcome.source,
                    outcome.blocks.len(),
                    outcome.relations.len()
                );
                outcome.blocks.iter().for_each(print_block);
                outcome.relations.iter().for_each(print_relation);
                print_report(&report);
            },
        )
    }

    async fn cmd_search(
        &self,
        id: BlockId,
        requirement: &str,
        from_query: bool,
        out: &Output,
    ) -> anyhow::Result<()> {
        let outcome: SearchOutcome = if from_query {
            self.service
                .agentic_search_from_query(id, requirement, &self.cancel)
                .await?
        } else {
            self.service
                .agentic_search(id, requirement, &self.cancel)
                .await?
        };

        let mut found = Vec::new();
        for block_id in outcome.found().unwrap_or_default() {
            match self.service.get_block(*block_id).await {
                Ok(block) => found.push(block),
                Err(e) => warn!(block_id = %block_id, error = %e, "Agent reported a missing block"),
            }
        }

        out.emit(&outcome, || {
            let path: Vec<String> = outcome.path.iter().map(ToString::to_string).collect();
            println!("Path: {} ({} steps)", path.join(" -> "), outcome.steps);
            match &outcome.state {
                SearchState::Found(_) => {
                    println!("Found:");
                    found.iter().for_each(print_block);
                }
                SearchState::NotFound(reason) => println!("Not found: {}", reason),
                SearchState::Exploring(at) => println!("Stopped at block {}", at),
            }
        })
    }

    async fn cmd_storage(&self, action: StorageAction, out: &Output) -> anyhow::Result<()> {
        match action {
            StorageAction::Add {
                name,
                nickname,
                kind,
            } => {
                let storage = Storage {
                    name,
                    nickname,
                    kind,
                };
                self.service.register_storage(storage.clone()).await?;
                out.emit(&storage, || {
                    println!("Storage '{}' ({}) registered.", storage.name, storage.kind.as_str())
                })
            }
            StorageAction::Show { name } => {
                let storage = self
                    .service
                    .context()
                    .repository()
                    .get_storage(&name)
                    .await?
                    .ok_or_else(|| inkcre_core::Error::StorageNotFound(name.clone()))?;
                out.emit(&storage, || {
                    println!("Storage: {}", storage.name);
                    println!("  Type: {}", storage.kind.as_str());
                    if let Some(nickname) = &storage.nickname {
                        println!("  Nickname: {}", nickname);
                    }
                })
            }
        }
    }
}

/// Read block content from disk; image bytes become base64 inline content
fn read_content(kind: &ResolverKind, path: &Path) -> anyhow::Result<String> {
    if *kind == ResolverKind::IMAGE {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(BASE64_STANDARD.encode(bytes))
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn cmd_config(action: ConfigAction, out: &Output) -> anyhow::Result<()> {
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
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
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

async fn cmd_doctor(db_path: Option<PathBuf>, out: &Output) -> anyhow::Result<()> {
    let quiet = out.quiet;
    if !quiet {
        println!("InKCre Health Check");
        println!("===================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let config = match Config::load().and_then(|c| c.validate().map(|()| c)) {
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
            return Ok(());
        }
    };

    // Check API key
    match config.llm.resolved_api_key() {
        Ok(Some(_)) => {
            if !quiet {
                let redacted = config.llm.redacted_api_key()?.unwrap_or_default();
                println!("[OK] API Key: Configured ({})", redacted);
                println!("     Chat model: {}", config.llm.chat_model);
                println!("     Vision model: {}", config.llm.vision_model);
                println!("     Embedding model: {}", config.embedding.model);
            }
        }
        Ok(None) => {
            all_ok = false;
            if !quiet {
                warn!("API Key: Not configured");
                println!("[!!] API Key: Not configured");
                println!("     Set INKCRE_API_KEY or OPENAI_API_KEY environment variable");
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] API Key: Error - {}", e);
            }
        }
    }

    // Check config file location
    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    // Check database
    let db_config = match db_path {
        Some(path) => Ok(DatabaseConfig::with_path(path)),
        None => DatabaseConfig::from_settings(&config.database),
    };
    match db_config {
        Ok(db_config) => match Database::new(db_config).await {
            Ok(db) => {
                match db.health_check().await {
                    Ok(()) => {
                        if !quiet {
                            println!("[OK] Database: Connected");
                            println!("     Path: {}", db.path().display());
                        }
                        match db.migration_status().await {
                            Ok(status) if status.needs_migration => {
                                all_ok = false;
                                if !quiet {
                                    println!(
                                        "[!!] Database: Migrations pending (v{} -> v{})",
                                        status.current_version, status.target_version
                                    );
                                }
                            }
                            Ok(status) => {
                                if !quiet {
                                    println!("[OK] Database: Schema v{}", status.current_version);
                                }
                            }
                            Err(e) => {
                                all_ok = false;
                                if !quiet {
                                    println!("[!!] Database: Migration check failed - {}", e);
                                }
                            }
                        }

                        let repository = SqliteGraphRepository::new(db.pool().clone());
                        if let Ok(stats) = repository.get_stats().await
                            && !quiet
                        {
                            println!(
                                "     Blocks: {}, Relations: {}",
                                stats.total_blocks, stats.total_relations
                            );
                        }
                    }
                    Err(e) => {
                        all_ok = false;
                        if !quiet {
                            println!("[!!] Database: Health check failed - {}", e);
                        }
                    }
                }
                db.close().await;
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Database: Failed to initialize - {}", e);
                }
            }
        },
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: {}", e);
            }
        }
    }

    // Summary
    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}
