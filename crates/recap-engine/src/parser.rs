//! Structured extraction from LLM output.
//!
//! Models are asked for JSON but do not reliably produce it. Parse
//! strategies run in order: a balanced JSON object, then recognized
//! Markdown headings, then a freeform bullet scan. Parsing always succeeds;
//! the worst case is a summary whose body is the raw text plus an
//! `unstructured-response` warning.

use recap_core::types::{ActionItem, Priority, TechnicalTerm};

/// Participant facts as the model reported them. User IDs are resolved
/// against the normalized messages by the engine, never trusted from here.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParticipant {
    pub name: String,
    pub contributions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub body: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub technical_terms: Vec<TechnicalTerm>,
    pub participants: Vec<ParsedParticipant>,
    pub warnings: Vec<String>,
}

/// Parse raw LLM text. Never fails.
pub fn parse_response(raw: &str) -> ParsedResponse {
    if let Some(parsed) = try_parse_json(raw) {
        return parsed;
    }
    if let Some(parsed) = try_parse_markdown(raw) {
        return parsed;
    }
    parse_freeform(raw)
}

// ---------------------------------------------------------------------------
// Strategy 1: balanced JSON
// ---------------------------------------------------------------------------

fn try_parse_json(raw: &str) -> Option<ParsedResponse> {
    let json_text = extract_balanced_json(raw)?;
    let value: serde_json::Value = serde_json::from_str(&json_text).ok()?;
    let obj = value.as_object()?;

    // "summary" is the one required field; anything else is best-effort.
    let body = obj.get("summary")?.as_str()?.to_string();

    let key_points = obj
        .get("key_points")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let action_items = obj
        .get("action_items")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(json_action_item).collect())
        .unwrap_or_default();

    let technical_terms = obj
        .get("technical_terms")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let term = v.get("term")?.as_str()?.to_string();
                    let definition = v
                        .get("definition")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Some(TechnicalTerm {
                        term,
                        definition,
                        source_message_id: v
                            .get("source_message_id")
                            .and_then(|s| s.as_str())
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let participants = obj
        .get("participants")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    Some(ParsedParticipant {
                        name: v.get("name")?.as_str()?.to_string(),
                        contributions: v
                            .get("contributions")
                            .and_then(|c| c.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|s| s.as_str())
                                    .map(String::from)
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ParsedResponse {
        body,
        key_points,
        action_items,
        technical_terms,
        participants,
        warnings: Vec::new(),
    })
}

fn json_action_item(v: &serde_json::Value) -> Option<ActionItem> {
    let description = v.get("description")?.as_str()?.to_string();
    Some(ActionItem {
        priority: v
            .get("priority")
            .and_then(|p| p.as_str())
            .map(infer_priority_word)
            .unwrap_or_default(),
        assignee: v
            .get("assignee")
            .and_then(|a| a.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        deadline: v
            .get("deadline")
            .and_then(|d| d.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        source_message_ids: v
            .get("source_message_ids")
            .and_then(|ids| ids.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        description,
    })
}

/// Extract the first balanced `{...}` object, honoring strings and escapes.
fn extract_balanced_json(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Strategy 2: Markdown headings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Body,
    KeyPoints,
    ActionItems,
    Participants,
    TechnicalTerms,
}

/// A heading line: `## Key points`, `**Action Items:**`, etc.
fn heading_section(line: &str) -> Option<Section> {
    let cleaned = line
        .trim()
        .trim_start_matches('#')
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .to_lowercase();
    match cleaned.as_str() {
        "key points" | "key takeaways" | "highlights" => Some(Section::KeyPoints),
        "action items" | "action points" | "next steps" | "todos" => Some(Section::ActionItems),
        "participants" | "contributors" => Some(Section::Participants),
        "technical terms" | "terminology" | "glossary" => Some(Section::TechnicalTerms),
        _ => None,
    }
}

fn try_parse_markdown(raw: &str) -> Option<ParsedResponse> {
    if !raw.lines().any(|l| heading_section(l).is_some()) {
        return None;
    }

    let mut out = ParsedResponse::default();
    let mut section = Section::Body;
    let mut body_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(next) = heading_section(line) {
            section = next;
            continue;
        }
        let Some(item) = bullet_text(line) else {
            if section == Section::Body && !line.trim().is_empty() {
                body_lines.push(line.trim());
            }
            continue;
        };
        match section {
            Section::Body | Section::KeyPoints => {
                if section == Section::KeyPoints {
                    out.key_points.push(item.to_string());
                } else {
                    body_lines.push(line.trim());
                }
            }
            Section::ActionItems => out.action_items.push(parse_action_line(item)),
            Section::Participants => {
                let (name, rest) = match item.split_once(':') {
                    Some((n, r)) => (n.trim(), r.trim()),
                    None => (item.trim(), ""),
                };
                out.participants.push(ParsedParticipant {
                    name: name.trim_matches('*').to_string(),
                    contributions: if rest.is_empty() {
                        Vec::new()
                    } else {
                        vec![rest.to_string()]
                    },
                });
            }
            Section::TechnicalTerms => {
                let (term, definition) = match item.split_once(':') {
                    Some((t, d)) => (t.trim(), d.trim()),
                    None => (item.trim(), ""),
                };
                out.technical_terms.push(TechnicalTerm {
                    term: term.trim_matches('*').to_string(),
                    definition: definition.to_string(),
                    source_message_id: None,
                });
            }
        }
    }

    out.body = body_lines.join("\n");
    Some(out)
}

// ---------------------------------------------------------------------------
// Strategy 3: freeform fallback
// ---------------------------------------------------------------------------

fn parse_freeform(raw: &str) -> ParsedResponse {
    let mut out = ParsedResponse::default();
    let mut body_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        match bullet_text(line) {
            Some(item) => out.key_points.push(item.to_string()),
            None => body_lines.push(line),
        }
    }

    out.body = body_lines.join("\n").trim().to_string();
    if out.body.is_empty() && !out.key_points.is_empty() {
        // Bullet-only responses still need a body.
        out.body = raw.trim().to_string();
    }
    if out.key_points.is_empty() {
        out.body = raw.trim().to_string();
        out.warnings.push("unstructured-response".to_string());
    }
    out
}

/// Strip a leading bullet marker; `None` for non-bullet lines.
fn bullet_text(line: &str) -> Option<&str> {
    let t = line.trim_start();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = t.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered bullets: "1. ", "12) "
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(stripped) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(stripped.trim());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Action-item line heuristics
// ---------------------------------------------------------------------------

/// Parse one action-item line: priority from literal tokens, assignee from
/// `@Name` or a leading `Name:` prefix.
fn parse_action_line(line: &str) -> ActionItem {
    let mut description = line.trim().to_string();
    let priority = infer_priority(&description);

    let assignee = if let Some(at) = description.find('@') {
        let rest = &description[at + 1..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        (!name.is_empty()).then_some(name)
    } else if let Some((prefix, rest)) = description.split_once(':') {
        let candidate = prefix.trim();
        let is_name = !candidate.is_empty()
            && candidate.split_whitespace().count() == 1
            && candidate.chars().next().is_some_and(|c| c.is_uppercase());
        if is_name {
            let name = candidate.to_string();
            description = rest.trim().to_string();
            Some(name)
        } else {
            None
        }
    } else {
        None
    };

    ActionItem {
        description,
        assignee,
        deadline: None,
        priority,
        source_message_ids: Vec::new(),
    }
}

fn infer_priority(text: &str) -> Priority {
    let lower = text.to_lowercase();
    if lower.contains("urgent") || lower.contains("high priority") || text.contains('!') {
        Priority::High
    } else if lower.contains("low priority") || lower.contains("(low)") {
        Priority::Low
    } else {
        Priority::Medium
    }
}

fn infer_priority_word(word: &str) -> Priority {
    match word.to_lowercase().as_str() {
        "high" | "urgent" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_response_parses_fully() {
        let raw = r#"Here is the summary you asked for:
{
  "summary": "The team debated the cache design.",
  "key_points": ["TTL set to 5 minutes", "Channel-scoped invalidation"],
  "action_items": [
    {"description": "Write the eviction test", "assignee": "Bo", "priority": "high",
     "source_message_ids": ["m42"]}
  ],
  "technical_terms": [{"term": "TTL", "definition": "time to live"}],
  "participants": [{"name": "Ana", "contributions": ["proposed the design"]}]
}
Hope that helps!"#;

        let parsed = parse_response(raw);
        assert_eq!(parsed.body, "The team debated the cache design.");
        assert_eq!(parsed.key_points.len(), 2);
        assert_eq!(parsed.action_items.len(), 1);
        assert_eq!(parsed.action_items[0].assignee.as_deref(), Some("Bo"));
        assert_eq!(parsed.action_items[0].priority, Priority::High);
        assert_eq!(parsed.action_items[0].source_message_ids, vec!["m42"]);
        assert_eq!(parsed.technical_terms[0].term, "TTL");
        assert_eq!(parsed.participants[0].name, "Ana");
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn balanced_extraction_survives_nested_braces_and_strings() {
        let raw = r#"{"summary": "uses {braces} and \"quotes\"", "key_points": []}"#;
        let parsed = parse_response(raw);
        assert_eq!(parsed.body, r#"uses {braces} and "quotes""#);
    }

    #[test]
    fn markdown_headings_split_sections() {
        let raw = "\
The conversation covered the deploy.

## Key points
- Deploy moved to Thursday
- Staging is green

## Action items
- Bo: update the runbook
- ship the hotfix @Ana urgent

## Participants
- **Ana**: led the deploy discussion

## Technical terms
- blue-green: two-environment deploy strategy";

        let parsed = parse_response(raw);
        assert!(parsed.body.contains("covered the deploy"));
        assert_eq!(parsed.key_points.len(), 2);
        assert_eq!(parsed.action_items.len(), 2);
        assert_eq!(parsed.action_items[0].assignee.as_deref(), Some("Bo"));
        assert_eq!(parsed.action_items[0].description, "update the runbook");
        assert_eq!(parsed.action_items[1].assignee.as_deref(), Some("Ana"));
        assert_eq!(parsed.action_items[1].priority, Priority::High);
        assert_eq!(parsed.participants[0].name, "Ana");
        assert_eq!(parsed.technical_terms[0].term, "blue-green");
    }

    #[test]
    fn freeform_bullets_become_key_points() {
        let raw = "The chat was mostly about lunch.\n- pizza won the vote\n- next week: tacos";
        let parsed = parse_response(raw);
        assert_eq!(parsed.body, "The chat was mostly about lunch.");
        assert_eq!(parsed.key_points.len(), 2);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn plain_text_falls_back_with_warning() {
        let raw = "Nothing notable happened today.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.body, raw);
        assert!(parsed.key_points.is_empty());
        assert_eq!(parsed.warnings, vec!["unstructured-response".to_string()]);
    }

    #[test]
    fn priority_token_inference() {
        assert_eq!(infer_priority("do it urgent"), Priority::High);
        assert_eq!(infer_priority("ship now!"), Priority::High);
        assert_eq!(infer_priority("someday (low)"), Priority::Low);
        assert_eq!(infer_priority("regular chore"), Priority::Medium);
    }

    #[test]
    fn malformed_json_falls_through_to_markdown() {
        let raw = "{\"summary\": unterminated\n\n## Key points\n- still recoverable";
        let parsed = parse_response(raw);
        assert_eq!(parsed.key_points, vec!["still recoverable".to_string()]);
    }
}
