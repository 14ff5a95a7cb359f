//! filesift binary: composition root for the pipeline and the query API.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use filesift::api::{self, ApiState};
use filesift::config::AppConfig;
use filesift::embed::{EmbeddingGenerator, FastembedModel, TextEmbedder};
use filesift::process::{Dispatcher, ProcessorContext, ProcessorRegistry};
use filesift::scan::Scanner;
use filesift::search::QueryEngine;
use filesift::store::Store;
use filesift::tasks::TaskScheduler;
use filesift::vector::VectorIndex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "filesift", about = "Semantic file indexer")]
struct Cli {
    /// Path to a configuration file (defaults to `filesift.toml` when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory from configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background pipeline and the query API (the default).
    Serve,
    /// Run a single scan pass and exit.
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.data_dir).context("creating the data directory")?;

    let _log_guard = init_tracing(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Scan => scan_once(config).await,
    }
}

/// Stderr logging plus a daily-rolling file log under the data directory.
fn init_tracing(config: &AppConfig) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(config.log_dir()).context("creating the log directory")?;
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "filesift.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("starting filesift");

    let store = Store::open(&config.sqlite_path())
        .await
        .context("opening the object store")?;

    let embedder: Arc<dyn TextEmbedder> = Arc::new(
        FastembedModel::new(&config.embed_cache_dir()).context("loading the embedding model")?,
    );

    let lancedb_dir = config.lancedb_dir();
    let connection = lancedb::connect(
        lancedb_dir
            .to_str()
            .context("lancedb directory path is not valid UTF-8")?,
    )
    .execute()
    .await
    .context("connecting to the vector index")?;
    let index = Arc::new(
        VectorIndex::open_or_create(&connection, embedder)
            .await
            .context("opening the vector index")?,
    );
    if let Err(error) = index.create_index().await {
        tracing::warn!(%error, "vector index creation deferred");
    }

    let ctx = ProcessorContext {
        store: store.clone(),
        http: reqwest::Client::new(),
        caption_endpoint: config.processors.caption_endpoint.clone(),
    };
    let registry = Arc::new(ProcessorRegistry::load(&config.processors.directory, &ctx).await);

    let scanner = Scanner::new(store.clone(), &config);
    let dispatcher = Dispatcher::new(store.clone(), registry);
    let generator = EmbeddingGenerator::new(store.clone(), index.clone());
    let scheduler = TaskScheduler::start(scanner, dispatcher, generator, &config);

    let engine = QueryEngine::new(store.clone(), index, config.query.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = api::start_http_server(
        config.bind_addr()?,
        ApiState::new(engine, store),
        shutdown_rx,
    )
    .await
    .context("starting the HTTP server")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");

    shutdown_tx.send(true).ok();
    scheduler.stop_and_wait().await;
    server.await.ok();

    tracing::info!("filesift stopped");
    Ok(())
}

async fn scan_once(config: AppConfig) -> anyhow::Result<()> {
    let store = Store::open(&config.sqlite_path())
        .await
        .context("opening the object store")?;
    let scanner = Scanner::new(store, &config);

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let summary = scanner
        .run_pass(&shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        saved = summary.saved,
        duplicates = summary.duplicates,
        ignored = summary.ignored,
        elapsed_secs = format!("{:.2}", summary.elapsed_secs),
        "scan pass complete"
    );
    Ok(())
}
