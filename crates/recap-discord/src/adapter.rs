use std::sync::Arc;
use std::time::Duration;

use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tracing::{error, info, warn};

use recap_core::config::DiscordConfig;
use recap_core::types::ChannelDelivery;

use crate::context::BotContext;
use crate::handler::RecapHandler;

/// Discord adapter.
///
/// Wraps a serenity `Client` and drives the event loop until the process
/// exits, reconnecting whenever the gateway drops.
pub struct DiscordAdapter<C: BotContext + 'static> {
    app: Arc<C>,
    config: DiscordConfig,
}

impl<C: BotContext + 'static> DiscordAdapter<C> {
    pub fn new(config: &DiscordConfig, app: Arc<C>) -> Self {
        Self {
            app,
            config: config.clone(),
        }
    }

    /// Connect to Discord and keep reconnecting whenever the gateway drops.
    ///
    /// Never returns. When `delivery_rx` is `Some`, the scheduled-delivery
    /// consumer is spawned once over the REST client, which stays valid
    /// across gateway reconnects.
    pub async fn run(self, delivery_rx: Option<tokio::sync::mpsc::Receiver<ChannelDelivery>>) {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let first_client = loop {
            match self.build_client(intents).await {
                Ok(c) => break c,
                Err(e) => {
                    error!("Discord: initial connect failed ({e}), retrying in 30s");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        };

        if let Some(rx) = delivery_rx {
            let http = Arc::clone(&first_client.http);
            tokio::spawn(crate::delivery::run_delivery(http, rx));
        }

        let mut client = first_client;
        loop {
            info!("Discord: gateway connecting");

            if let Err(e) = client.start().await {
                warn!("Discord: gateway error ({e}), reconnecting in 5s");
            } else {
                info!("Discord: gateway stopped cleanly, reconnecting in 5s");
            }

            tokio::time::sleep(Duration::from_secs(5)).await;

            client = loop {
                match self.build_client(intents).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: reconnect failed ({e}), retrying in 30s");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            };
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        let handler = RecapHandler {
            app: Arc::clone(&self.app),
            register_slash_commands: self.config.slash_commands,
        };
        Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
    }
}
