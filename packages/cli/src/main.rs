//! ThreadGraph migration runner
//!
//! Loads a migration definition (built-in name or JSON file) and a JSON-lines
//! source feed, runs the engine against an in-memory store and prints the run
//! report as JSON on stdout. Logs go to stderr; `RUST_LOG` controls verbosity.
//!
//! Exit status: `0` when the run is `Done`, `2` when it finished with record
//! failures, `1` when a stage was aborted or the run was cancelled.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use threadgraph_core::db::{GraphStore, MemoryStore};
use threadgraph_core::services::migrations;
use threadgraph_core::{
    DefinitionRegistry, EngineConfig, MentionRewriter, MigrationDefinition, MigrationEngine,
    Reaction, ReactionRetargeter, RunOutcome, SourceRecord,
};

#[derive(Parser, Debug)]
#[command(
    name = "threadgraph-migrate",
    version,
    about = "Run ThreadGraph content migrations over a JSON-lines feed"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a migration definition over a source feed
    Run(RunCmd),
    /// List the built-in migration definitions
    Definitions,
}

#[derive(Args, Debug)]
struct RunCmd {
    /// Built-in definition name (optionally `name@vN`) or path to a definition JSON file
    #[arg(value_name = "DEFINITION")]
    definition: String,

    #[arg(long, value_name = "FILE", help = "JSON-lines file of source records")]
    feed: PathBuf,

    #[arg(long, value_name = "FILE", help = "Engine configuration JSON file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        env = "THREADGRAPH_MAX_CONCURRENCY",
        help = "Maximum record tasks in flight"
    )]
    max_concurrency: Option<usize>,

    #[arg(long, env = "THREADGRAPH_BATCH_SIZE", help = "Records per sub-batch")]
    batch_size: Option<usize>,

    #[arg(
        long,
        value_name = "FILE",
        help = "JSON-lines file of reactions to retarget onto migrated nodes"
    )]
    reactions: Option<PathBuf>,

    #[arg(long, help = "Rewrite @[table:id] mentions in migrated bodies")]
    rewrite_mentions: bool,

    #[arg(long, help = "Compact closures after reconciling")]
    compact_closures: bool,

    #[arg(long, help = "Pretty-print the run report")]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(cmd) => run(cmd).await,
        Command::Definitions => list_definitions(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn builtin_registry() -> anyhow::Result<DefinitionRegistry> {
    let mut registry = DefinitionRegistry::new();
    migrations::register_definitions(&mut registry)?;
    Ok(registry)
}

fn list_definitions() -> anyhow::Result<ExitCode> {
    let registry = builtin_registry()?;
    for name in [
        migrations::comment_threads::NAME,
        migrations::media_blocks::NAME,
        migrations::game_beads::NAME,
    ] {
        for version in registry.versions(name) {
            if let Some(definition) = registry.get(name, version) {
                println!("{}\t{}", definition.run_key(), definition.description);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolve `name`, `name@vN` or a path to a definition
fn load_definition(reference: &str) -> anyhow::Result<MigrationDefinition> {
    let path = Path::new(reference);
    if path.extension().is_some_and(|ext| ext == "json") || path.is_file() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definition {}", path.display()))?;
        let definition: MigrationDefinition = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid definition JSON in {}", path.display()))?;
        return Ok(definition);
    }

    let registry = builtin_registry()?;
    let found = match reference.split_once("@v") {
        Some((name, version)) => {
            let version: u32 = version
                .parse()
                .with_context(|| format!("Invalid definition version in '{}'", reference))?;
            registry.get(name, version)
        }
        None => registry.latest(reference),
    };
    found
        .cloned()
        .ok_or_else(|| anyhow!("Unknown definition '{}'", reference))
}

fn load_config(cmd: &RunCmd) -> anyhow::Result<EngineConfig> {
    let mut config = match &cmd.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config JSON in {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if let Some(max_concurrency) = cmd.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    if let Some(batch_size) = cmd.batch_size {
        config.batch_size = batch_size;
    }
    if cmd.compact_closures {
        config.compact_closures = true;
    }

    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

/// Parse a JSON-lines file, skipping blank lines
fn read_json_lines<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), number + 1))
        })
        .collect()
}

async fn run(cmd: RunCmd) -> anyhow::Result<ExitCode> {
    let definition = load_definition(&cmd.definition)?;
    let config = load_config(&cmd)?;
    let records: Vec<SourceRecord> = read_json_lines(&cmd.feed)?;

    tracing::info!(
        "Loaded {} records for {} from {}",
        records.len(),
        definition.run_key(),
        cmd.feed.display()
    );

    let store = Arc::new(MemoryStore::new());
    let mut engine = MigrationEngine::new(store.clone(), config);

    if let Some(path) = &cmd.reactions {
        let reactions: Vec<Reaction> = read_json_lines(path)?;
        tracing::info!("Loaded {} reactions", reactions.len());
        for reaction in reactions {
            store.insert_reaction(reaction).await?;
        }
        engine = engine.with_hook(Arc::new(ReactionRetargeter::new(store.clone())));
    }
    if cmd.rewrite_mentions {
        engine = engine.with_hook(Arc::new(MentionRewriter::new(store.clone())));
    }

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling after in-flight records");
            cancel.cancel();
        }
    });

    let report = engine.run(&definition, records).await?;

    let json = if cmd.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    Ok(match report.outcome {
        RunOutcome::Done => ExitCode::SUCCESS,
        RunOutcome::Partial => ExitCode::from(2),
        RunOutcome::Aborted { .. } | RunOutcome::Cancelled { .. } => ExitCode::FAILURE,
    })
}
