use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use postloop::classifier::LexiconClassifier;
use postloop::config::{AirtableConfig, EmbeddingConfig, EngineConfig, LoopConfig};
use postloop::driver::{FeedbackLoopDriver, spawn_driver};
use postloop::engine::create_engine;
use postloop::gateway::{AirtableGateway, LocalGateway, PersistenceGateway, StatusOverlayGateway};
use postloop::memory::{DEFAULT_EMBED_TIMEOUT, Embedder, OpenAiEmbedder, ToneMemoryStore};
use postloop::regen::RegenerationController;
use postloop::status::{StatusState, status_routes};
use postloop::store::{Database, LibSqlBackend};

#[derive(Parser)]
#[command(name = "postloop")]
#[command(version)]
#[command(about = "Regenerates posts from client feedback until they are approved")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feedback loop until Ctrl-C (default)
    Run,

    /// Run a single cycle and print its report
    Cycle,

    /// Print tone memory statistics
    Stats,

    /// Purge old tone memory entries
    Cleanup {
        /// Entries older than this many days are removed
        #[arg(long)]
        days: Option<u32>,
    },

    /// Import approved posts from a JSON export
    Import {
        file: PathBuf,

        /// Client for items that carry no client_id
        #[arg(long)]
        client: Option<String>,
    },

    /// List remembered posts
    Show {
        #[arg(long)]
        client: Option<String>,
    },

    /// Add a generated post to the local records table
    Submit {
        #[arg(long)]
        topic: String,

        #[arg(long)]
        content: String,
    },

    /// Attach client feedback to a local record
    Feedback { id: String, text: String },
}

/// Shared wiring for every subcommand.
struct App {
    config: LoopConfig,
    memory: Arc<ToneMemoryStore>,
    gateway: Arc<dyn PersistenceGateway>,
    local: Option<Arc<LocalGateway>>,
}

impl App {
    async fn open(config: LoopConfig) -> Result<Self> {
        let db: Arc<dyn Database> = Arc::new(
            LibSqlBackend::new_local(&config.db_path)
                .await
                .with_context(|| format!("opening database at {}", config.db_path.display()))?,
        );

        let (embedder, embed_timeout) = match EmbeddingConfig::from_env()? {
            Some(c) => {
                let embedder = OpenAiEmbedder::new(c)?;
                let timeout = embedder.timeout();
                (Some(Arc::new(embedder) as Arc<dyn Embedder>), timeout)
            }
            None => (None, DEFAULT_EMBED_TIMEOUT),
        };
        let memory = Arc::new(
            ToneMemoryStore::load(db.clone(), embedder)
                .await?
                .with_embed_timeout(embed_timeout),
        );

        let mut local = None;
        let gateway: Arc<dyn PersistenceGateway> = match AirtableConfig::from_env() {
            Some(airtable) => {
                info!(base = %airtable.base_id, table = %airtable.table_name, "Using Airtable gateway");
                let has_status_column = airtable.status_field.is_some();
                let table: Arc<dyn PersistenceGateway> = Arc::new(AirtableGateway::new(airtable));
                if has_status_column {
                    table
                } else {
                    info!("No Airtable status column, keeping record status locally");
                    Arc::new(StatusOverlayGateway::new(table, db.clone()))
                }
            }
            None => {
                info!("Using local records table");
                let gateway = Arc::new(LocalGateway::new(db));
                local = Some(Arc::clone(&gateway));
                gateway
            }
        };

        Ok(Self {
            config,
            memory,
            gateway,
            local,
        })
    }

    fn local(&self) -> Result<&LocalGateway> {
        self.local.as_deref().ok_or_else(|| {
            anyhow!("this command only works with the local records table (unset AIRTABLE_* to use it)")
        })
    }

    fn driver(&self) -> Result<Arc<FeedbackLoopDriver>> {
        let engine = create_engine(&EngineConfig::from_env()?)?;
        info!(model = engine.model_name(), "Content engine ready");
        let controller = RegenerationController::new(
            self.config.clone(),
            Arc::new(LexiconClassifier::default()),
            engine,
            self.gateway.clone(),
            self.memory.clone(),
        );
        Ok(Arc::new(FeedbackLoopDriver::new(Arc::new(controller))))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LoopConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref(), cli.verbose);

    let app = App::open(config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_loop(&app).await?,
        Commands::Cycle => {
            let report = app.driver()?.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&app.memory.stats().await)?);
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(app.config.retention_days);
            let removed = app.memory.cleanup(days).await?;
            println!("Removed {removed} entries older than {days} days");
        }
        Commands::Import { file, client } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let client = client.unwrap_or_else(|| app.config.client_id.clone());
            let report = app.memory.import_json(&raw, &client).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Show { client } => {
            let entries = app.memory.entries(client.as_deref()).await;
            if entries.is_empty() {
                println!("No remembered posts");
            }
            for entry in entries {
                println!(
                    "[{}] {} ({}): {}",
                    entry.created_at.format("%Y-%m-%d"),
                    entry.topic,
                    entry.client_id,
                    preview(&entry.content, 100)
                );
            }
        }
        Commands::Submit { topic, content } => {
            let id = app.local()?.create_record(&topic, &content).await?;
            println!("{id}");
        }
        Commands::Feedback { id, text } => {
            app.local()?.set_feedback(&id, &text).await?;
            println!("Feedback recorded for {id}");
        }
    }

    Ok(())
}

async fn run_loop(app: &App) -> Result<()> {
    let driver = app.driver()?;

    if app.memory.index_available() {
        match app.memory.backfill_embeddings().await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Backfilled embeddings"),
            Err(e) => warn!(error = %e, "Embedding backfill failed, lexical ranking stays in use"),
        }
    }

    let server = match app.config.status_port {
        Some(port) => {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("binding status port {port}"))?;
            let routes = status_routes(StatusState {
                driver: Arc::clone(&driver),
            });
            info!(port, "Status server started");
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, routes).await {
                    error!(error = %e, "Status server stopped");
                }
            }))
        }
        None => None,
    };

    eprintln!("postloop v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Gateway: {}", app.gateway.name());
    eprintln!("   Client: {}", app.config.client_id);
    eprintln!("   Interval: {:?}", app.config.poll_interval);
    eprintln!("   Press Ctrl-C to stop.\n");

    let handle = spawn_driver(driver);
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, finishing current cycle");
    handle.shutdown().await;

    if let Some(server) = server {
        server.abort();
    }
    Ok(())
}

/// Stderr logging plus an optional daily-rotated file. The returned guard
/// flushes the file writer on drop.
fn init_tracing(
    log_dir: Option<&Path>,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "postloop.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
