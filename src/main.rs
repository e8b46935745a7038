use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use archivist::config::Config;
use archivist::cost::PricingTable;
use archivist::llm::AnthropicProvider;
use archivist::server::{build_app, AppState};
use archivist::session::{SessionRegistry, TurnOptions};
use archivist::tools::{knowledge_dispatcher, InMemoryKnowledgeBase};

#[derive(Parser)]
#[command(name = "archivist", about = "Streaming chat-agent backend", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Path to the config file.
        #[arg(long, default_value = "archivist.yaml")]
        config: PathBuf,

        /// Override the listen port.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, port } => serve(config, port).await,
    }
}

async fn serve(config_path: PathBuf, port_override: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(&config_path).await?;
    let port = port_override.unwrap_or(config.server.port);

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable is not set"))?;

    let provider = Arc::new(AnthropicProvider::new(
        reqwest::Client::new(),
        api_key,
        config.model.base_url.clone(),
    ));

    let kb = Arc::new(InMemoryKnowledgeBase::new());
    let dispatcher = Arc::new(knowledge_dispatcher(
        kb,
        Duration::from_secs(config.session.tool_timeout_seconds),
    ));

    let registry = SessionRegistry::new();
    let sweep = registry.spawn_eviction_sweep(
        chrono::Duration::minutes(config.session.idle_ttl_minutes),
        Duration::from_secs(config.session.eviction_interval_seconds),
    );

    let pricing: PricingTable = config.pricing.clone();
    let state = AppState {
        registry: registry.clone(),
        provider,
        dispatcher,
        pricing,
        turn_options: TurnOptions {
            max_tool_iterations: config.session.max_tool_iterations,
            model_idle_timeout: Duration::from_secs(config.session.model_idle_timeout_seconds),
        },
        model: config.model.name.clone(),
        system_prompt: config.model.system_prompt.clone(),
        temperature: config.model.temperature,
        max_output_tokens: config.model.max_output_tokens,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        max_connections: config.server.max_connections,
    };

    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, model = %config.model.name, "archivist listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    registry.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
}
