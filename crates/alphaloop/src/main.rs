use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alphaloop_models::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "alphaloop", about = "LLM decision loop for a perpetual-futures account")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/alphaloop.toml")]
    config: String,

    /// Run a single decision cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: AppConfig = toml::from_str(&config_str).context("Failed to parse config")?;

    let mut engine = alphaloop::build_engine(&config).context("Failed to build engine")?;

    if cli.once {
        engine
            .orchestrator
            .run_cycle()
            .await
            .map_err(|e| anyhow::anyhow!("Cycle failed: {e}"))?;
        engine.ledger.drain().await;
        let state = engine.hub.snapshot();
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let cancel = engine.orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    engine.orchestrator.run().await;
    Ok(())
}
