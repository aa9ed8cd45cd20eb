// crates/gem-server/src/cli/mod.rs
// Subcommand entry points for the gem binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gem_types::{BrainMode, BrainRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gem::config::EnvConfig;
use gem::db::DatabasePool;
use gem::handlers::HandlerRegistry;
use gem::registry::Registry;
use gem::router::Brain;
use gem::web::{create_router, state::AppState};
use gem::worker;

#[derive(Parser)]
#[command(name = "gem", version, about = "GEM - registry-driven tool execution platform")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Router HTTP service
    Serve,
    /// Run a worker (claim loop + reclaim sweeper)
    Work,
    /// One-shot Router run from the command line
    Run {
        /// The natural-language message to plan
        message: String,
        /// answer | plan | enqueue | enqueue_and_wait
        #[arg(long, default_value = "answer")]
        mode: String,
    },
    /// List the registered tools
    Tools,
}

async fn open_pool(config: &EnvConfig) -> Result<Arc<DatabasePool>> {
    let pool = DatabasePool::open(Path::new(&config.database_url))
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;
    Ok(Arc::new(pool))
}

/// `gem serve` - the Router HTTP process.
pub async fn run_serve() -> Result<()> {
    let config = EnvConfig::from_env()?;
    let registry = Arc::new(Registry::load()?);
    let pool = open_pool(&config).await?;

    let state = AppState::new(pool, registry, config.secrets.clone());
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "router listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// `gem work` - worker claim loop plus the reclaim sweeper.
pub async fn run_worker() -> Result<()> {
    let config = EnvConfig::from_env()?;
    let registry = Arc::new(Registry::load()?);
    let pool = open_pool(&config).await?;
    let handlers = Arc::new(HandlerRegistry::with_all_domains());

    let worker_shutdown = worker::spawn(
        pool.clone(),
        registry.clone(),
        handlers,
        config.secrets.clone(),
        Duration::from_millis(config.poll_interval_ms),
    );
    let sweeper_shutdown = worker::sweeper::spawn(
        pool,
        registry,
        Duration::from_millis(config.sweep_interval_ms),
    );

    shutdown_signal().await;
    tracing::info!("shutting down worker");
    let _ = worker_shutdown.send(true);
    let _ = sweeper_shutdown.send(true);
    // Give in-flight work a moment to seal before the process exits
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

/// `gem run <message>` - one-shot Router invocation.
pub async fn run_brain(message: String, mode: String) -> Result<()> {
    let mode = match mode.as_str() {
        "answer" => BrainMode::Answer,
        "plan" => BrainMode::Plan,
        "enqueue" => BrainMode::Enqueue,
        "enqueue_and_wait" => BrainMode::EnqueueAndWait,
        other => anyhow::bail!("unknown mode {other:?} (answer|plan|enqueue|enqueue_and_wait)"),
    };

    let config = EnvConfig::from_env()?;
    let registry = Arc::new(Registry::load()?);
    let pool = open_pool(&config).await?;

    let brain = Brain::new(pool, registry);
    let response = brain
        .run(BrainRequest {
            message,
            mode,
            context: None,
            limits: None,
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// `gem tools` - print the catalogue.
pub async fn run_tools() -> Result<()> {
    let registry = Registry::load()?;
    for tool in registry.all() {
        println!(
            "{:<24} {:>9}ms  {:?}  {}",
            tool.name,
            tool.timeout_ms,
            tool.idempotency.mode,
            tool.description
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
    }
}
