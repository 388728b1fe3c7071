/// Maximum characters per Discord message (2000 is the limit; 1950 leaves
/// headroom for formatting).
const CHUNK_MAX: usize = 1950;

/// Split `text` into chunks of at most [`CHUNK_MAX`] characters, preferring
/// newline then whitespace boundaries. Operates on characters, so multi-byte
/// content never splits mid-codepoint.
pub fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while rest.len() > CHUNK_MAX {
        let window = &rest[..CHUNK_MAX];
        let split_at = window
            .iter()
            .rposition(|c| *c == '\n')
            .or_else(|| window.iter().rposition(|c| c.is_whitespace()))
            .unwrap_or(CHUNK_MAX);

        let chunk: String = rest[..split_at].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        rest.drain(..split_at);
        while rest.first().is_some_and(|c| c.is_whitespace()) {
            rest.remove(0);
        }
    }

    if !rest.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// Send `text` to `channel_id` in chunked messages.
pub async fn send_chunked(
    http: &serenity::http::Http,
    channel_id: serenity::model::id::ChannelId,
    text: &str,
) -> Result<(), serenity::Error> {
    for chunk in split_chunks(text) {
        channel_id.say(http, &chunk).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("a short reply");
        assert_eq!(chunks, vec!["a short reply".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline() {
        let line = "a".repeat(1000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_MAX, "chunk too large");
        }
    }

    #[test]
    fn very_long_word_still_splits() {
        let text = "x".repeat(4000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_MAX);
        }
    }

    #[test]
    fn multibyte_content_never_splits_mid_codepoint() {
        let text = "é".repeat(3000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        assert_eq!(
            chunks.iter().map(|c| c.chars().count()).sum::<usize>(),
            3000
        );
    }
}
