use std::sync::Arc;

use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::gateway::Ready;
use serenity::prelude::{Context, EventHandler};
use tracing::info;

use crate::commands;
use crate::context::BotContext;

/// Serenity event handler wired to the summarization backend.
pub struct RecapHandler<C: BotContext + 'static> {
    pub app: Arc<C>,
    pub register_slash_commands: bool,
}

#[async_trait]
impl<C: BotContext + 'static> EventHandler for RecapHandler<C> {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(name = %ready.user.name, "Discord bot connected");
        if self.register_slash_commands {
            commands::register_commands(&ctx, None).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            commands::handle_interaction(&self.app, &ctx, &command).await;
        }
    }
}
