//! Filtering and normalization of raw platform messages.
//!
//! Rules run in a fixed order: bot authors, platform system messages,
//! effectively-empty content, excluded users, then content cleaning. The
//! surviving sequence keeps its (timestamp, id) order.

use recap_core::types::{CodeBlock, NormalizedMessage};
use recap_source::RawMessage;

/// Filtering knobs, extracted from the request options.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub include_bots: bool,
    pub excluded_users: Vec<String>,
}

/// Apply the filter rules and normalize the survivors.
pub fn filter_messages(raw: Vec<RawMessage>, opts: &FilterOptions) -> Vec<NormalizedMessage> {
    let mut out: Vec<NormalizedMessage> = raw
        .into_iter()
        .filter(|m| opts.include_bots || !m.author_is_bot)
        .filter(|m| !m.is_system)
        .filter(|m| !opts.excluded_users.contains(&m.author_id))
        .filter_map(normalize)
        .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Clean one message. Returns `None` when nothing summarizable remains.
fn normalize(msg: RawMessage) -> Option<NormalizedMessage> {
    let (stripped, code_blocks) = extract_code_blocks(&msg.content);
    let with_mentions = rewrite_mentions(&stripped, &msg.mentions);
    let content = collapse_whitespace(&with_mentions);

    // A message is empty when nothing but whitespace and standalone emoji
    // survives — unless it still carries code or attachments.
    if is_effectively_empty(&content) && code_blocks.is_empty() && msg.attachments.is_empty() {
        return None;
    }

    Some(NormalizedMessage {
        id: msg.id,
        author_id: msg.author_id,
        author_name: msg.author_name,
        author_is_bot: msg.author_is_bot,
        timestamp: msg.timestamp,
        content,
        code_blocks,
        mentions: msg.mentions.into_iter().map(|(id, _)| id).collect(),
        attachments: msg.attachments,
        thread_id: msg.thread_id,
        reply_to: msg.reply_to,
    })
}

/// Pull fenced ``` blocks out of `text`, keeping the language tag when the
/// opening fence carries one. Returns the text with the blocks removed.
fn extract_code_blocks(text: &str) -> (String, Vec<CodeBlock>) {
    let mut blocks = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        remaining.push_str(&rest[..open]);
        let after_open = &rest[open + 3..];
        let Some(close) = after_open.find("```") else {
            // Unterminated fence: keep the raw text as-is.
            remaining.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let fenced = &after_open[..close];
        let (language, code) = match fenced.split_once('\n') {
            Some((first, body)) => {
                let tag = first.trim();
                if !tag.is_empty() && tag.chars().all(|c| c.is_alphanumeric() || c == '+' || c == '#')
                {
                    (Some(tag.to_string()), body.to_string())
                } else {
                    (None, fenced.to_string())
                }
            }
            None => (None, fenced.to_string()),
        };
        let code = code.trim_matches('\n').to_string();
        if !code.is_empty() {
            blocks.push(CodeBlock { language, code });
        }
        rest = &after_open[close + 3..];
    }
    remaining.push_str(rest);
    (remaining, blocks)
}

/// Replace raw `<@id>` / `<@!id>` mention tokens with `@DisplayName`.
fn rewrite_mentions(text: &str, mentions: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (id, name) in mentions {
        out = out.replace(&format!("<@!{id}>"), &format!("@{name}"));
        out = out.replace(&format!("<@{id}>"), &format!("@{name}"));
    }
    out
}

/// Collapse runs of spaces/tabs and blank lines; keep single newlines so
/// list-ish messages stay readable.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// True when only whitespace and standalone emoji remain.
fn is_effectively_empty(text: &str) -> bool {
    text.chars().all(|c| {
        c.is_whitespace()
            || is_emoji(c)
            // Variation selectors and zero-width joiners ride along with emoji.
            || matches!(c, '\u{fe0f}' | '\u{200d}' | '\u{20e3}')
    })
}

fn is_emoji(c: char) -> bool {
    matches!(c,
        '\u{1F300}'..='\u{1FAFF}'   // pictographs, emoticons, symbols
        | '\u{2600}'..='\u{27BF}'   // misc symbols, dingbats
        | '\u{1F1E6}'..='\u{1F1FF}' // regional indicators
        | '\u{2B00}'..='\u{2BFF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recap_source::MemorySource;

    fn msg(id: &str, content: &str) -> RawMessage {
        MemorySource::message(
            id,
            "u1",
            "Ana",
            Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
            content,
        )
    }

    #[test]
    fn bots_are_dropped_unless_included() {
        let mut bot = msg("m1", "beep");
        bot.author_is_bot = true;
        let human = msg("m2", "hello");

        let out = filter_messages(vec![bot.clone(), human.clone()], &FilterOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "m2");

        let out = filter_messages(
            vec![bot, human],
            &FilterOptions {
                include_bots: true,
                ..Default::default()
            },
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn system_and_empty_messages_are_dropped() {
        let mut system = msg("m1", "Ana pinned a message.");
        system.is_system = true;
        let empty = msg("m2", "   \n\t ");
        let emoji_only = msg("m3", "🎉🎉 👍");
        let real = msg("m4", "actual content");

        let out = filter_messages(
            vec![system, empty, emoji_only, real],
            &FilterOptions::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "m4");
    }

    #[test]
    fn excluded_users_are_dropped() {
        let opts = FilterOptions {
            excluded_users: vec!["u1".into()],
            ..Default::default()
        };
        let out = filter_messages(vec![msg("m1", "hi")], &opts);
        assert!(out.is_empty());
    }

    #[test]
    fn code_blocks_are_extracted_with_language() {
        let out = filter_messages(
            vec![msg("m1", "look at this\n```rust\nfn main() {}\n```\nneat")],
            &FilterOptions::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "look at this\nneat");
        assert_eq!(out[0].code_blocks.len(), 1);
        assert_eq!(out[0].code_blocks[0].language.as_deref(), Some("rust"));
        assert_eq!(out[0].code_blocks[0].code, "fn main() {}");
    }

    #[test]
    fn code_only_message_survives() {
        let out = filter_messages(
            vec![msg("m1", "```\nselect 1;\n```")],
            &FilterOptions::default(),
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].content.is_empty());
        assert_eq!(out[0].code_blocks.len(), 1);
    }

    #[test]
    fn mentions_become_display_names() {
        let mut m = msg("m1", "ping <@1234> and <@!5678>");
        m.mentions = vec![
            ("1234".into(), "Ana".into()),
            ("5678".into(), "Bo".into()),
        ];
        let out = filter_messages(vec![m], &FilterOptions::default());
        assert_eq!(out[0].content, "ping @Ana and @Bo");
    }

    #[test]
    fn whitespace_collapses_but_links_survive() {
        let out = filter_messages(
            vec![msg("m1", "see   https://example.com/x?a=1\n\n\nnext    line")],
            &FilterOptions::default(),
        );
        assert_eq!(out[0].content, "see https://example.com/x?a=1\nnext line");
    }

    #[test]
    fn order_is_stable_by_timestamp_then_id() {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let mut a = msg("m2", "second");
        a.timestamp = base;
        let mut b = msg("m1", "first");
        b.timestamp = base;
        let mut c = msg("m0", "later");
        c.timestamp = base + chrono::Duration::seconds(5);

        let out = filter_messages(vec![c, a, b], &FilterOptions::default());
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m0"]);
    }
}
