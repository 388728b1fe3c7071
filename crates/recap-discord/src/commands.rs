//! Slash commands — `/summarize`, `/quick`, `/config`, `/schedule`.
//!
//! Every handler defers first so the user sees progress, then passes the
//! rate-limit and permission gates before dispatching to the engine or
//! scheduler. Summaries post publicly; errors and configuration views stay
//! ephemeral.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, EditInteractionResponse,
};
use serenity::model::application::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
};
use serenity::model::id::GuildId;
use serenity::prelude::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recap_core::types::{Destination, LengthProfile, Schedule, SinkFormat, SinkKind};
use recap_core::{RecapError, Result, SummaryRequest};
use recap_scheduler::NewTask;

use crate::context::BotContext;
use crate::embed;
use crate::errors::user_message;
use crate::permissions;
use crate::ratelimit::CommandKind;

/// Register global slash commands. Call from `ready()`.
pub async fn register_commands(ctx: &Context, guild_id: Option<GuildId>) {
    let commands = vec![
        CreateCommand::new("summarize")
            .description("Summarize recent conversation in a channel")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Channel,
                    "channel",
                    "Channel to summarize (default: here)",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "hours",
                    "How many hours back to cover (default 24)",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "start",
                    "Window start, RFC 3339 (overrides hours)",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "end",
                    "Window end, RFC 3339 (default now)",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "length",
                    "brief, detailed, or comprehensive",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Boolean,
                    "include_bots",
                    "Include bot messages",
                )
                .required(false),
            ),
        CreateCommand::new("quick")
            .description("Brief summary of the last few minutes here")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "minutes",
                    "How many minutes back",
                )
                .required(true),
            ),
        CreateCommand::new("config")
            .description("View or change summarization settings")
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "view",
                "Show the current configuration",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "channels",
                    "Enable or exclude a channel",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "action",
                        "enable, exclude, or clear",
                    )
                    .required(true),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Channel,
                        "channel",
                        "Target channel",
                    )
                    .required(false),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "defaults",
                    "Set default summary options",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "length",
                        "brief, detailed, or comprehensive",
                    )
                    .required(false),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Boolean,
                        "include_bots",
                        "Include bot messages by default",
                    )
                    .required(false),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Integer,
                        "min_messages",
                        "Minimum messages required",
                    )
                    .required(false),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "reset",
                "Reset the configuration to defaults",
            )),
        CreateCommand::new("schedule")
            .description("Manage scheduled summaries")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "create",
                    "Create a scheduled summary",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "name", "Task name")
                        .required(true),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "cadence",
                        "daily, weekly, monthly, or cron",
                    )
                    .required(true),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "time",
                        "HH:MM UTC (ignored for cron)",
                    )
                    .required(false),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Integer,
                        "day",
                        "Weekday 0-6 (weekly) or day of month (monthly)",
                    )
                    .required(false),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "cron",
                        "Cron expression (cadence = cron)",
                    )
                    .required(false),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Channel,
                        "channel",
                        "Channel to summarize (default: here)",
                    )
                    .required(false),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "list",
                "List scheduled summaries",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "pause",
                    "Pause a scheduled summary",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "id", "Task id")
                        .required(true),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "resume",
                    "Resume a paused summary",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "id", "Task id")
                        .required(true),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "delete",
                    "Delete a scheduled summary",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "id", "Task id")
                        .required(true),
                ),
            ),
    ];

    match guild_id {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => {
            match serenity::model::application::Command::set_global_commands(&ctx.http, commands)
                .await
            {
                Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }
}

/// Dispatch a slash command interaction.
pub async fn handle_interaction<C: BotContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) {
    let result = match command.data.name.as_str() {
        "summarize" => handle_summarize(app, ctx, command, None).await,
        "quick" => handle_quick(app, ctx, command).await,
        "config" => handle_config(app, ctx, command).await,
        "schedule" => handle_schedule(app, ctx, command).await,
        other => {
            warn!(command = %other, "unknown slash command");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(command = %command.data.name, error = %e, "slash command error");
    }
}

// ---------------------------------------------------------------------------
// /summarize and /quick
// ---------------------------------------------------------------------------

async fn handle_summarize<C: BotContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    quick_minutes: Option<i64>,
) -> serenity::Result<()> {
    defer_ephemeral(ctx, command).await?;

    let outcome = run_summarize(app, command, quick_minutes).await;
    match outcome {
        Ok(summary) => {
            let channel_name = app
                .source()
                .channel_name(&summary.channel_id)
                .await
                .unwrap_or_else(|_| summary.channel_id.clone());
            let message =
                CreateMessage::new().embed(embed::summary_embed(&summary, &channel_name));
            // Summaries are public; the deferred (ephemeral) reply just
            // points at the post.
            if let Err(e) = command.channel_id.send_message(&ctx.http, message).await {
                warn!(error = %e, "could not post summary publicly");
            }
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().content("Summary posted."),
                )
                .await?;
        }
        Err(e) => reply_error(ctx, command, &e).await?,
    }
    Ok(())
}

async fn handle_quick<C: BotContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> serenity::Result<()> {
    let minutes = find_int(&command.data.options, "minutes").unwrap_or(30);
    handle_summarize(app, ctx, command, Some(minutes)).await
}

/// The gated pipeline for both summarize commands.
async fn run_summarize<C: BotContext + 'static>(
    app: &Arc<C>,
    command: &CommandInteraction,
    quick_minutes: Option<i64>,
) -> Result<recap_core::types::Summary> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| RecapError::UserInput("summaries only work in servers".to_string()))?
        .to_string();
    let user_id = command.user.id.to_string();

    if let Err(retry_after_secs) = app.rate_limiter().check(&user_id, CommandKind::Summarize) {
        return Err(RecapError::RateLimited { retry_after_secs });
    }

    let options = &command.data.options;
    let channel_id = find_channel(options, "channel")
        .map(|c| c.to_string())
        .unwrap_or_else(|| command.channel_id.to_string());

    let guild_config = app.store().guild_config_or_default(&guild_id)?;
    permissions::channel_enabled(&guild_config, &channel_id)?;
    permissions::check_read(app.as_ref(), &user_id, &channel_id, &guild_config).await?;

    // Window: explicit start/end wins, then quick minutes, then hours.
    let now = Utc::now();
    let (start, end) = if let Some(start_text) = find_str(options, "start") {
        let start = parse_instant(&start_text)?;
        let end = match find_str(options, "end") {
            Some(end_text) => parse_instant(&end_text)?,
            None => now,
        };
        (start, end)
    } else if let Some(minutes) = quick_minutes {
        (now - Duration::minutes(minutes.clamp(1, 24 * 60)), now)
    } else {
        let hours = find_int(options, "hours").unwrap_or(24).clamp(1, 24 * 7);
        (now - Duration::hours(hours), now)
    };

    let mut request_options = guild_config.default_options.clone();
    if quick_minutes.is_some() {
        request_options.length = LengthProfile::Brief;
    }
    if let Some(length_text) = find_str(options, "length") {
        request_options.length = length_text
            .parse()
            .map_err(|e: String| RecapError::UserInput(e))?;
    }
    if let Some(include_bots) = find_bool(options, "include_bots") {
        request_options.include_bots = include_bots;
    }

    let request = SummaryRequest {
        channel_id,
        guild_id,
        start,
        end,
        options: request_options,
    };

    let cancel = CancellationToken::new();
    let result = tokio::time::timeout(
        app.command_timeout(),
        app.engine().summarize_adaptive(request, &cancel),
    )
    .await;
    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            cancel.cancel();
            Err(RecapError::LlmTransient(
                "the command timed out".to_string(),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// /config
// ---------------------------------------------------------------------------

async fn handle_config<C: BotContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> serenity::Result<()> {
    defer_ephemeral(ctx, command).await?;

    match run_config(app, command).await {
        Ok(text) => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
                .await?;
        }
        Err(e) => reply_error(ctx, command, &e).await?,
    }
    Ok(())
}

async fn run_config<C: BotContext + 'static>(
    app: &Arc<C>,
    command: &CommandInteraction,
) -> Result<String> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| RecapError::UserInput("configuration only works in servers".to_string()))?
        .to_string();
    let user_id = command.user.id.to_string();

    if let Err(retry_after_secs) = app.rate_limiter().check(&user_id, CommandKind::Config) {
        return Err(RecapError::RateLimited { retry_after_secs });
    }

    let (sub, sub_options) = subcommand(&command.data.options)?;
    let mut config = app.store().guild_config_or_default(&guild_id)?;

    if sub != "view" {
        permissions::check_admin(app.as_ref(), command, &config).await?;
    }

    match sub.as_str() {
        "view" => Ok(render_config(&config)),
        "channels" => {
            let action = find_str(&sub_options, "action").unwrap_or_default();
            let channel = find_channel(&sub_options, "channel").map(|c| c.to_string());
            match (action.as_str(), channel) {
                ("enable", Some(ch)) => {
                    config.excluded_channels.retain(|c| *c != ch);
                    if !config.enabled_channels.contains(&ch) {
                        config.enabled_channels.push(ch.clone());
                    }
                    app.engine().update_guild_config(&config)?;
                    Ok(format!("Channel <#{ch}> enabled for summarization."))
                }
                ("exclude", Some(ch)) => {
                    config.enabled_channels.retain(|c| *c != ch);
                    if !config.excluded_channels.contains(&ch) {
                        config.excluded_channels.push(ch.clone());
                    }
                    app.engine().update_guild_config(&config)?;
                    Ok(format!("Channel <#{ch}> excluded from summarization."))
                }
                ("clear", _) => {
                    config.enabled_channels.clear();
                    config.excluded_channels.clear();
                    app.engine().update_guild_config(&config)?;
                    Ok("Channel lists cleared; every readable channel is eligible.".to_string())
                }
                _ => Err(RecapError::UserInput(
                    "action must be enable, exclude, or clear (enable/exclude need a channel)"
                        .to_string(),
                )),
            }
        }
        "defaults" => {
            if let Some(length_text) = find_str(&sub_options, "length") {
                config.default_options.length = length_text
                    .parse()
                    .map_err(|e: String| RecapError::UserInput(e))?;
            }
            if let Some(include_bots) = find_bool(&sub_options, "include_bots") {
                config.default_options.include_bots = include_bots;
            }
            if let Some(min) = find_int(&sub_options, "min_messages") {
                config.default_options.min_messages = min.clamp(1, 1000) as usize;
            }
            app.engine().update_guild_config(&config)?;
            Ok("Defaults updated.".to_string())
        }
        "reset" => {
            let fresh = recap_core::types::GuildConfig::new(&guild_id);
            app.engine().update_guild_config(&fresh)?;
            Ok("Configuration reset to defaults.".to_string())
        }
        other => Err(RecapError::UserInput(format!(
            "unknown config subcommand: {other}"
        ))),
    }
}

fn render_config(config: &recap_core::types::GuildConfig) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items
                .iter()
                .map(|c| format!("<#{c}>"))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    format!(
        "**Summarization settings**\n\
         Enabled channels: {}\n\
         Excluded channels: {}\n\
         Default length: {}\n\
         Include bots: {}\n\
         Minimum messages: {}\n\
         Webhook delivery: {}",
        list(&config.enabled_channels),
        list(&config.excluded_channels),
        config.default_options.length,
        config.default_options.include_bots,
        config.default_options.min_messages,
        if config.webhook_enabled { "on" } else { "off" },
    )
}

// ---------------------------------------------------------------------------
// /schedule
// ---------------------------------------------------------------------------

async fn handle_schedule<C: BotContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> serenity::Result<()> {
    defer_ephemeral(ctx, command).await?;

    match run_schedule(app, command).await {
        Ok(ScheduleReply::Text(text)) => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
                .await?;
        }
        Ok(ScheduleReply::List(tasks)) => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embed::schedule_list_embed(&tasks)),
                )
                .await?;
        }
        Err(e) => reply_error(ctx, command, &e).await?,
    }
    Ok(())
}

enum ScheduleReply {
    Text(String),
    List(Vec<recap_core::types::ScheduledTask>),
}

async fn run_schedule<C: BotContext + 'static>(
    app: &Arc<C>,
    command: &CommandInteraction,
) -> Result<ScheduleReply> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| RecapError::UserInput("schedules only work in servers".to_string()))?
        .to_string();
    let user_id = command.user.id.to_string();

    if let Err(retry_after_secs) = app.rate_limiter().check(&user_id, CommandKind::Schedule) {
        return Err(RecapError::RateLimited { retry_after_secs });
    }

    let (sub, sub_options) = subcommand(&command.data.options)?;
    let config = app.store().guild_config_or_default(&guild_id)?;

    if sub != "list" {
        permissions::check_admin(app.as_ref(), command, &config).await?;
    }

    match sub.as_str() {
        "create" => {
            let name = find_str(&sub_options, "name")
                .ok_or_else(|| RecapError::UserInput("a task name is required".to_string()))?;
            let channel_id = find_channel(&sub_options, "channel")
                .map(|c| c.to_string())
                .unwrap_or_else(|| command.channel_id.to_string());
            let schedule = parse_schedule(&sub_options)?;

            let task = app.scheduler().create_task(NewTask {
                name,
                channel_id: channel_id.clone(),
                guild_id,
                schedule,
                destinations: vec![Destination {
                    sink: SinkKind::Channel,
                    target: channel_id,
                    format: SinkFormat::Embed,
                }],
                options: config.default_options.clone(),
                created_by: user_id,
            })?;
            let next = task
                .next_run
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "—".to_string());
            Ok(ScheduleReply::Text(format!(
                "Scheduled **{}** (id `{}`), first run {}.",
                task.name, task.id, next
            )))
        }
        "list" => Ok(ScheduleReply::List(
            app.store().list_tasks(Some(&guild_id))?,
        )),
        "pause" | "resume" | "delete" => {
            let id = find_str(&sub_options, "id")
                .ok_or_else(|| RecapError::UserInput("a task id is required".to_string()))?;
            // Tasks belong to the guild they were created in.
            let task = app.store().get_task(&id)?;
            if task.guild_id != guild_id {
                return Err(RecapError::NotFound {
                    entity: "scheduled task",
                    id,
                });
            }
            match sub.as_str() {
                "pause" => {
                    app.scheduler().pause_task(&id)?;
                    Ok(ScheduleReply::Text(format!("Task `{id}` paused.")))
                }
                "resume" => {
                    app.scheduler().resume_task(&id)?;
                    Ok(ScheduleReply::Text(format!("Task `{id}` resumed.")))
                }
                _ => {
                    app.scheduler().delete_task(&id)?;
                    Ok(ScheduleReply::Text(format!("Task `{id}` deleted.")))
                }
            }
        }
        other => Err(RecapError::UserInput(format!(
            "unknown schedule subcommand: {other}"
        ))),
    }
}

/// Build a [`Schedule`] from the create subcommand's options.
fn parse_schedule(options: &[CommandDataOption]) -> Result<Schedule> {
    let cadence = find_str(options, "cadence").unwrap_or_default();
    let (hour, minute) = match find_str(options, "time") {
        Some(text) => parse_hhmm(&text)?,
        None => (8, 0),
    };
    match cadence.as_str() {
        "daily" => Ok(Schedule::Daily { hour, minute }),
        "weekly" => Ok(Schedule::Weekly {
            day: find_int(options, "day").unwrap_or(0).clamp(0, 6) as u8,
            hour,
            minute,
        }),
        "monthly" => Ok(Schedule::Monthly {
            day: find_int(options, "day").unwrap_or(1).clamp(1, 31) as u8,
            hour,
            minute,
        }),
        "cron" => {
            let expression = find_str(options, "cron").ok_or_else(|| {
                RecapError::UserInput("cadence cron needs a cron expression".to_string())
            })?;
            Ok(Schedule::Cron { expression })
        }
        other => Err(RecapError::UserInput(format!(
            "cadence must be daily, weekly, monthly, or cron (got '{other}')"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Option plumbing
// ---------------------------------------------------------------------------

fn subcommand(options: &[CommandDataOption]) -> Result<(String, Vec<CommandDataOption>)> {
    options
        .iter()
        .find_map(|o| match &o.value {
            CommandDataOptionValue::SubCommand(inner) => Some((o.name.clone(), inner.clone())),
            _ => None,
        })
        .ok_or_else(|| RecapError::UserInput("a subcommand is required".to_string()))
}

fn find_str(options: &[CommandDataOption], name: &str) -> Option<String> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
        .map(String::from)
}

fn find_int(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_i64())
}

fn find_bool(options: &[CommandDataOption], name: &str) -> Option<bool> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_bool())
}

fn find_channel(
    options: &[CommandDataOption],
    name: &str,
) -> Option<serenity::model::id::ChannelId> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_channel_id())
}

fn parse_instant(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            RecapError::UserInput(format!(
                "'{text}' is not a valid RFC 3339 timestamp (e.g. 2026-08-01T09:00:00Z)"
            ))
        })
}

fn parse_hhmm(text: &str) -> Result<(u8, u8)> {
    let err = || RecapError::UserInput(format!("'{text}' is not a valid HH:MM time"));
    let (h, m) = text.split_once(':').ok_or_else(err)?;
    let hour: u8 = h.parse().map_err(|_| err())?;
    let minute: u8 = m.parse().map_err(|_| err())?;
    if hour > 23 || minute > 59 {
        return Err(err());
    }
    Ok((hour, minute))
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

async fn defer_ephemeral(ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(true),
            ),
        )
        .await
}

async fn reply_error(
    ctx: &Context,
    command: &CommandInteraction,
    error: &RecapError,
) -> serenity::Result<()> {
    let rendered = user_message(error);
    if let Some(ref correlation_id) = rendered.correlation_id {
        warn!(correlation_id = %correlation_id, error = %error, "command failed internally");
    }
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embed::error_embed(rendered.code, &rendered.text)),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("08:30").unwrap(), (8, 30));
        assert_eq!(parse_hhmm("23:59").unwrap(), (23, 59));
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("8.30").is_err());
        assert!(parse_hhmm("").is_err());
    }

    #[test]
    fn rfc3339_instants() {
        assert!(parse_instant("2026-08-01T09:00:00Z").is_ok());
        assert!(parse_instant("yesterday").is_err());
    }
}
