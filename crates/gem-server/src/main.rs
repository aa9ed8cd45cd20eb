// crates/gem-server/src/main.rs
// GEM - registry-driven tool execution platform

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the working directory; absence is fine
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    // Long-running services log at info; one-shot commands stay quiet
    let log_level = match &cli.command {
        Some(Commands::Serve) | Some(Commands::Work) => Level::INFO,
        Some(Commands::Run { .. }) | Some(Commands::Tools) | None => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => cli::run_serve().await?,
        Some(Commands::Work) => cli::run_worker().await?,
        Some(Commands::Run { message, mode }) => cli::run_brain(message, mode).await?,
        Some(Commands::Tools) => cli::run_tools().await?,
    }

    Ok(())
}
