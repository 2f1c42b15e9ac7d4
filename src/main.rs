use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livewire::api::serve_hub;
use livewire::config::{load_config, LivewireConfig};
use livewire::hub::Hub;
use livewire::subscription::{handler, Payload, SubscribeOptions, SubscriptionRegistry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "livewire", about = "Topic-multiplexed real-time channel over WebSocket")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub (WebSocket endpoint and publish API)
    Serve,
    /// Subscribe to topics and log every message until Ctrl-C
    Watch {
        /// Topics to subscribe to
        #[arg(required = true)]
        topics: Vec<String>,
        /// Allow overlapping handler invocations
        #[arg(long)]
        concurrent: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livewire=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LivewireConfig::default(),
    }
    .with_env_overrides();

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Watch { topics, concurrent } => watch(config, topics, concurrent).await,
    }
}

async fn serve(config: LivewireConfig) -> Result<()> {
    info!("Livewire hub starting...");

    let listener = TcpListener::bind(&config.hub.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.hub.bind))?;
    let hub = Arc::new(Hub::new(config.hub.channel_capacity));

    tokio::select! {
        result = serve_hub(listener, hub, &config.hub) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

async fn watch(config: LivewireConfig, topics: Vec<String>, concurrent: bool) -> Result<()> {
    let registry = SubscriptionRegistry::connect(&config.client)?;
    info!(endpoint = %registry.connection().endpoint(), "Livewire watcher starting...");

    let options = if concurrent {
        SubscribeOptions::concurrent()
    } else {
        SubscribeOptions::default()
    };

    let handles: Vec<_> = topics
        .into_iter()
        .map(|topic| {
            let label = topic.clone();
            registry.subscribe_with(
                topic,
                handler(move |payload| {
                    let label = label.clone();
                    async move {
                        match payload {
                            Payload::Json(value) => info!(topic = %label, payload = %value, "Message"),
                            Payload::Raw(text) => info!(topic = %label, raw = %text, "Message"),
                        }
                        Ok(())
                    }
                }),
                options,
            )
        })
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    for handle in &handles {
        handle.close();
    }
    registry.shutdown().await;

    Ok(())
}
