//! `folio`: command-line front end for the portfolio copilot.

mod config;

use clap::{Parser, Subcommand};
use config::{FolioConfig, API_KEY_ENV};
use folio_agent::{LlmClient, SearxSearch, YahooMarketData};
use folio_core::TextGenerator;
use folio_memory::{GeneratorSummarizer, MemoryStore};
use folio_orchestrator::{Copilot, Router, Workflows};
use folio_session::{FileProfileStore, FileSessionStore, ProfileStore, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "folio", about = "Folio: conversational portfolio copilot")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one conversation turn and print the reply
    Turn {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
        /// The user's message
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Converse interactively, one turn per line of stdin
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
    },
    /// List persisted session keys
    Sessions,
    /// Force a memory compaction pass
    Compact,
    /// Print a stored user profile
    Profile {
        name: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_generator(config: &FolioConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    if config.model.api_key.is_empty() {
        warn!(
            provider = ?config.model.provider,
            "No API key configured; set {API_KEY_ENV} or model.api_key"
        );
    }
    Ok(Arc::new(LlmClient::new(config.model.clone())?))
}

fn build_workflows(
    config: &FolioConfig,
    generator: Arc<dyn TextGenerator>,
) -> anyhow::Result<Workflows> {
    let mut builder =
        Workflows::builder(generator).max_iterations(config.refinement.max_iterations);
    if let Some(url) = &config.search.base_url {
        builder = builder.search(Arc::new(SearxSearch::new(url.as_str())?));
    }
    if config.market_data.enabled {
        builder = builder.market_data(Arc::new(YahooMarketData::new(
            config.market_data.base_url.as_str(),
        )?));
    }
    Ok(builder.build())
}

async fn open_memory(
    config: &FolioConfig,
    generator: Arc<dyn TextGenerator>,
) -> anyhow::Result<Arc<MemoryStore>> {
    let memory = if config.memory.llm_summaries {
        MemoryStore::with_summarizer(
            config.memory_path(),
            Arc::new(GeneratorSummarizer::new(generator)),
        )
        .await?
    } else {
        MemoryStore::new(config.memory_path()).await?
    };
    Ok(Arc::new(memory))
}

async fn build_copilot(config: &FolioConfig) -> anyhow::Result<Copilot> {
    let generator = build_generator(config)?;
    let sessions = Arc::new(FileSessionStore::new(config.sessions_path()).await?);
    let profiles = Arc::new(FileProfileStore::new(config.profiles_path()).await?);
    let memory = open_memory(config, generator.clone()).await?;
    let workflows = build_workflows(config, generator)?;

    Ok(Copilot::new(
        config.app_name.as_str(),
        sessions,
        memory,
        Router::new(profiles, workflows),
        config.memory.compaction(),
    ))
}

async fn chat(copilot: &Copilot, user: &str, session: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type a message, or 'quit' to leave.");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }
        let reply = copilot.handle_turn(user, session, line).await?;
        println!("\n{}\n", reply.response);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = FolioConfig::load(&cli.config)
        .await?
        .with_api_key(std::env::var(API_KEY_ENV).ok());
    init_tracing(config.logging.json);
    info!(config = %cli.config.display(), data_dir = %config.data_dir.display(), "Folio starting");

    match cli.command {
        Commands::Turn {
            user,
            session,
            text,
        } => {
            let copilot = build_copilot(&config).await?;
            let reply = copilot.handle_turn(&user, &session, &text.join(" ")).await?;
            println!("{}", reply.response);
            if !reply.persisted {
                eprintln!("warning: session could not be saved; it will be retried next turn");
            }
        }
        Commands::Chat { user, session } => {
            let copilot = build_copilot(&config).await?;
            chat(&copilot, &user, &session).await?;
        }
        Commands::Sessions => {
            let sessions = FileSessionStore::new(config.sessions_path()).await?;
            let keys = sessions.list().await?;
            if keys.is_empty() {
                println!("No sessions stored in {}", config.sessions_path().display());
            } else {
                for key in &keys {
                    println!("{key}");
                }
                println!("\nTotal: {} session(s)", keys.len());
            }
        }
        Commands::Compact => {
            let generator = build_generator(&config)?;
            let memory = open_memory(&config, generator).await?;
            // Interval 0 compacts every session regardless of its turn count.
            let report = memory.compact(0, config.memory.overlap_size).await?;
            println!(
                "Compacted {} session(s), folded {} event(s)",
                report.sessions_compacted, report.events_folded
            );
        }
        Commands::Profile { name } => {
            let profiles = FileProfileStore::new(config.profiles_path()).await?;
            match profiles.get(&name).await? {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => println!("No profile stored for '{name}'"),
            }
        }
    }

    Ok(())
}
