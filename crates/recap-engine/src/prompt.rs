//! Prompt construction under a token budget.
//!
//! Token counts are estimated with the 1 token ≈ 4 characters rule. When the
//! composed prompt would overflow the budget, messages are dropped from the
//! middle of the chronological window and a single elision marker takes
//! their place.

use recap_core::types::{LengthProfile, NormalizedMessage};
use recap_core::{RecapError, Result};

/// Reserved headroom between the estimated prompt and the hard budget.
const SAFETY_TOKENS: usize = 256;
/// Share of messages kept at each end of the window when eliding.
const KEEP_RATIO: f64 = 0.30;

/// Conversation facts injected into the user prompt header.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub channel_name: String,
    pub guild_name: String,
    pub participant_count: usize,
    pub span_hours: f64,
}

/// A composed prompt pair plus accounting.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
    pub estimated_tokens: usize,
    /// Messages dropped by elision. Zero when everything fit.
    pub elided: usize,
}

pub struct PromptBuilder {
    max_prompt_tokens: usize,
}

impl PromptBuilder {
    pub fn new(max_prompt_tokens: usize) -> Self {
        Self { max_prompt_tokens }
    }

    /// 1 token ≈ 4 characters, rounded up.
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }

    pub fn build_system_prompt(&self, length: LengthProfile) -> String {
        let (budget_line, structure) = match length {
            LengthProfile::Brief => (
                "Keep the summary to 3-5 bullet points, roughly 150 words total.",
                "Focus on outcomes and decisions only; skip conversational detail.",
            ),
            LengthProfile::Detailed => (
                "Write 300-600 words, organized by topic.",
                "Cover each discussion topic with its context and outcome. \
                 List action items and open questions.",
            ),
            LengthProfile::Comprehensive => (
                "Write 600-1000+ words with full analysis sections.",
                "Cover topics discussed, decisions made, action items with owners, \
                 technical terms that came up, and each participant's notable \
                 contributions.",
            ),
        };

        format!(
            "You are a precise conversation summarizer for chat channels.\n\
             {budget_line}\n{structure}\n\n\
             Respond with a JSON object of this shape:\n\
             {{\n  \"summary\": \"...\",\n  \"key_points\": [\"...\"],\n  \
             \"action_items\": [{{\"description\": \"...\", \"assignee\": null, \
             \"deadline\": null, \"priority\": \"medium\"}}],\n  \
             \"technical_terms\": [{{\"term\": \"...\", \"definition\": \"...\"}}],\n  \
             \"participants\": [{{\"name\": \"...\", \"contributions\": [\"...\"]}}]\n}}\n\
             Do not invent content that is not in the transcript."
        )
    }

    pub fn build_user_prompt(&self, messages: &[NormalizedMessage], ctx: &PromptContext) -> String {
        let mut out = format!(
            "Channel: #{} (server: {})\nParticipants: {}\nTime span: {:.1} hours\n\
             Messages: {}\n\n--- transcript ---\n",
            ctx.channel_name,
            ctx.guild_name,
            ctx.participant_count,
            ctx.span_hours,
            messages.len(),
        );
        for msg in messages {
            out.push_str(&render_message(msg));
        }
        out
    }

    /// Compose both prompts, eliding the middle of the window when the
    /// estimate exceeds `max_prompt_tokens - max_output_tokens - safety`.
    pub fn build(
        &self,
        messages: &[NormalizedMessage],
        ctx: &PromptContext,
        length: LengthProfile,
        max_output_tokens: u32,
    ) -> Result<BuiltPrompt> {
        let budget = self
            .max_prompt_tokens
            .saturating_sub(max_output_tokens as usize)
            .saturating_sub(SAFETY_TOKENS);

        let system = self.build_system_prompt(length);
        let user = self.build_user_prompt(messages, ctx);
        let estimated = Self::estimate_tokens(&system) + Self::estimate_tokens(&user);
        if estimated <= budget {
            return Ok(BuiltPrompt {
                system,
                user,
                estimated_tokens: estimated,
                elided: 0,
            });
        }

        // Over budget: keep the first and last 30% of messages and replace
        // the middle with one marker.
        let keep = ((messages.len() as f64) * KEEP_RATIO).ceil() as usize;
        let elided = messages.len().saturating_sub(keep * 2);
        if elided == 0 {
            return Err(RecapError::PromptTooLarge {
                tokens: estimated,
                budget,
            });
        }

        let mut kept: Vec<NormalizedMessage> = Vec::with_capacity(keep * 2);
        kept.extend_from_slice(&messages[..keep]);
        kept.extend_from_slice(&messages[messages.len() - keep..]);

        let head = self.build_user_prompt(&kept[..keep], ctx);
        let marker = format!("\n[... {elided} messages omitted ...]\n\n");
        let tail: String = kept[keep..].iter().map(|m| render_message(m)).collect();
        let user = format!("{head}{marker}{tail}");

        let estimated = Self::estimate_tokens(&system) + Self::estimate_tokens(&user);
        if estimated > budget {
            return Err(RecapError::PromptTooLarge {
                tokens: estimated,
                budget,
            });
        }

        Ok(BuiltPrompt {
            system,
            user,
            estimated_tokens: estimated,
            elided,
        })
    }
}

fn render_message(msg: &NormalizedMessage) -> String {
    let mut line = format!(
        "[{}] {}: {}\n",
        msg.timestamp.format("%H:%M"),
        msg.author_name,
        msg.content,
    );
    for block in &msg.code_blocks {
        let lang = block.language.as_deref().unwrap_or("code");
        line.push_str(&format!("  [{lang}]\n  {}\n", block.code.replace('\n', "\n  ")));
    }
    for att in &msg.attachments {
        line.push_str(&format!(
            "  [attachment: {} ({:?}, {} bytes)]\n",
            att.name, att.kind, att.size_bytes
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn ctx() -> PromptContext {
        PromptContext {
            channel_name: "general".into(),
            guild_name: "Test Server".into(),
            participant_count: 3,
            span_hours: 24.0,
        }
    }

    fn messages(count: usize, content_len: usize) -> Vec<NormalizedMessage> {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap();
        (0..count)
            .map(|i| NormalizedMessage {
                id: format!("m{i:04}"),
                author_id: "u1".into(),
                author_name: "Ana".into(),
                author_is_bot: false,
                timestamp: base + Duration::minutes(i as i64),
                content: format!("msg{i:04} {}", "x".repeat(content_len)),
                code_blocks: Vec::new(),
                mentions: Vec::new(),
                attachments: Vec::new(),
                thread_id: None,
                reply_to: None,
            })
            .collect()
    }

    #[test]
    fn profiles_set_different_budgets() {
        let builder = PromptBuilder::new(8_000);
        let brief = builder.build_system_prompt(LengthProfile::Brief);
        let full = builder.build_system_prompt(LengthProfile::Comprehensive);
        assert!(brief.contains("3-5 bullet points"));
        assert!(full.contains("600-1000+"));
        assert_ne!(brief, full);
    }

    #[test]
    fn under_budget_prompt_has_no_marker() {
        let builder = PromptBuilder::new(50_000);
        let msgs = messages(20, 40);
        let built = builder
            .build(&msgs, &ctx(), LengthProfile::Detailed, 1_000)
            .unwrap();
        assert_eq!(built.elided, 0);
        assert!(!built.user.contains("omitted"));
        // Every message is present verbatim.
        for m in &msgs {
            assert!(built.user.contains(&m.content));
        }
    }

    #[test]
    fn over_budget_prompt_elides_the_middle_once() {
        // 100 messages of ~150 chars ≈ 4k+ tokens against a tight budget.
        let builder = PromptBuilder::new(4_000);
        let msgs = messages(100, 150);
        let built = builder
            .build(&msgs, &ctx(), LengthProfile::Brief, 512)
            .unwrap();

        assert!(built.elided > 0);
        assert_eq!(built.user.matches("messages omitted").count(), 1);

        // First and last 30% survive verbatim.
        for m in &msgs[..30] {
            assert!(built.user.contains(&m.content), "head message missing");
        }
        for m in &msgs[70..] {
            assert!(built.user.contains(&m.content), "tail message missing");
        }
        // A middle message is gone.
        assert!(!built.user.contains("msg0050"));

        let budget = 4_000 - 512 - SAFETY_TOKENS;
        assert!(built.estimated_tokens <= budget);
    }

    #[test]
    fn envelope_overflow_fails() {
        let builder = PromptBuilder::new(1_000);
        // Even 30% + 30% of these is far past a ~200-token budget.
        let msgs = messages(50, 500);
        let err = builder
            .build(&msgs, &ctx(), LengthProfile::Brief, 512)
            .unwrap_err();
        assert!(matches!(err, RecapError::PromptTooLarge { .. }));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(PromptBuilder::estimate_tokens(""), 0);
        assert_eq!(PromptBuilder::estimate_tokens("abcd"), 1);
        assert_eq!(PromptBuilder::estimate_tokens("abcde"), 2);
    }
}
