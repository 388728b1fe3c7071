use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use recap_core::config::RecapConfig;
use recap_discord::DiscordAdapter;
use recap_engine::llm::{AnthropicProvider, CompletionProvider, MockProvider, OpenAiProvider};
use recap_engine::{LlmClient, SummaryEngine};
use recap_gateway::app::AppState;
use recap_scheduler::{Deliverer, Scheduler};
use recap_source::{DiscordSource, MemorySource, MessageSource};
use recap_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recap=info,recap_gateway=info,tower_http=warn".into()),
        )
        .init();

    // Config path: explicit RECAP_CONFIG env, else ~/.recap/recap.toml.
    let config_path = std::env::var("RECAP_CONFIG").ok();
    let config = RecapConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        RecapConfig::default()
    });

    // Components build leaves-first; shutdown tears down in reverse.
    let store = Arc::new(Store::open(&config.store.path, config.store.pool_size)?);
    info!(path = %config.store.path, "store opened");

    let provider: Box<dyn CompletionProvider> = match config.llm.provider.as_str() {
        "anthropic" => Box::new(AnthropicProvider::new(
            config.llm.api_key.clone(),
            config.llm.base_url.clone(),
        )),
        "mock" => Box::new(MockProvider::new()),
        _ => Box::new(OpenAiProvider::new(
            config.llm.api_key.clone(),
            config.llm.base_url.clone(),
        )),
    };
    let llm = Arc::new(LlmClient::new(provider, &config.llm)?);

    let discord_enabled = !config.discord.bot_token.is_empty();
    let source: Arc<dyn MessageSource> = if discord_enabled {
        let http = Arc::new(serenity::http::Http::new(&config.discord.bot_token));
        Arc::new(DiscordSource::new(http))
    } else {
        warn!("no Discord bot token configured; using the in-memory message source");
        Arc::new(MemorySource::new())
    };

    let engine = Arc::new(SummaryEngine::new(
        Arc::clone(&source),
        Arc::clone(&store),
        llm,
        &config,
    ));

    let (delivery_tx, delivery_rx) = mpsc::channel(64);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Deliverer::new(discord_enabled.then(|| delivery_tx)),
        Duration::from_secs(config.scheduler.tick_interval_secs),
        Duration::from_secs(config.scheduler.execution_timeout_secs),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    let state = Arc::new(AppState::new(
        config.clone(),
        engine,
        scheduler,
        store,
        source,
    )?);

    let discord_task = if discord_enabled {
        let adapter = DiscordAdapter::new(&config.discord, Arc::clone(&state));
        Some(tokio::spawn(adapter.run(Some(delivery_rx))))
    } else {
        None
    };

    let router = recap_gateway::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "recap gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Reverse construction order: stop the Discord surface, then the
    // scheduler; the store closes when the last Arc drops.
    if let Some(task) = discord_task {
        task.abort();
    }
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    info!("recap gateway stopped");

    Ok(())
}
