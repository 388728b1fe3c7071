//! Rich embed construction for summaries, schedules, and errors.

use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use recap_core::types::{Priority, ScheduledTask, Summary};

const COLOR_SUMMARY: u32 = 0x5865F2;
const COLOR_ERROR: u32 = 0xED4245;
const COLOR_CONFIG: u32 = 0x57F287;
/// Discord caps embed field values at 1024 characters.
const FIELD_MAX: usize = 1024;
/// Discord caps embed descriptions at 4096 characters.
const DESCRIPTION_MAX: usize = 4096;

pub fn summary_embed(summary: &Summary, channel_name: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("Summary of #{channel_name}"))
        .description(clip(&summary.body, DESCRIPTION_MAX))
        .colour(COLOR_SUMMARY);

    if !summary.key_points.is_empty() {
        embed = embed.field("Key points", bullet_list(&summary.key_points), false);
    }
    if !summary.action_items.is_empty() {
        let lines: Vec<String> = summary
            .action_items
            .iter()
            .map(|item| {
                let mut line = format!("{} {}", priority_marker(item.priority), item.description);
                if let Some(ref assignee) = item.assignee {
                    line.push_str(&format!(" — {assignee}"));
                }
                if let Some(ref deadline) = item.deadline {
                    line.push_str(&format!(" (by {deadline})"));
                }
                line
            })
            .collect();
        embed = embed.field("Action items", clip(&lines.join("\n"), FIELD_MAX), false);
    }
    if !summary.technical_terms.is_empty() {
        let lines: Vec<String> = summary
            .technical_terms
            .iter()
            .map(|t| format!("**{}** — {}", t.term, t.definition))
            .collect();
        embed = embed.field("Terms", clip(&lines.join("\n"), FIELD_MAX), false);
    }

    let participants: Vec<String> = summary
        .participants
        .iter()
        .map(|p| format!("{} ({})", p.name, p.message_count))
        .collect();
    let footer = format!(
        "{} messages · {} · {}",
        summary.message_count,
        participants.join(", "),
        summary.metadata.model,
    );
    embed.footer(CreateEmbedFooter::new(clip(&footer, 2048)))
}

pub fn schedule_list_embed(tasks: &[ScheduledTask]) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Scheduled summaries")
        .colour(COLOR_CONFIG);

    if tasks.is_empty() {
        return embed.description("No scheduled summaries in this server.");
    }
    for task in tasks {
        let state = if task.active { "active" } else { "paused" };
        let next = task
            .next_run
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "—".to_string());
        embed = embed.field(
            format!("{} ({state})", task.name),
            format!(
                "channel <#{}> · next run {} · id `{}`",
                task.channel_id, next, task.id
            ),
            false,
        );
    }
    embed
}

pub fn error_embed(code: &str, text: &str) -> CreateEmbed {
    CreateEmbed::new()
        .description(clip(text, DESCRIPTION_MAX))
        .colour(COLOR_ERROR)
        .footer(CreateEmbedFooter::new(code.to_string()))
}

fn bullet_list(items: &[String]) -> String {
    let joined = items
        .iter()
        .map(|p| format!("• {p}"))
        .collect::<Vec<_>>()
        .join("\n");
    clip(&joined, FIELD_MAX)
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "🔴",
        Priority::Medium => "🟡",
        Priority::Low => "🟢",
    }
}

/// Clip to `max` characters on a char boundary, with an ellipsis.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
