//! Token estimation and budget-constrained selection.
//!
//! Token counts throughout this crate are a cheap character-based
//! approximation (`len / 4`), not a real BPE tokenizer count. This is a
//! deliberate simplification: the source material this crate is grounded
//! on uses this same approximation everywhere except one offline
//! Q&A-generation module, which instead counts real BPE tokens. Pulling in
//! a tokenizer crate to match that one module would leave two inconsistent
//! notions of "token" in the same crate, so this crate standardizes on the
//! approximation everywhere.

const CHARS_PER_TOKEN: usize = 4;

pub fn count_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Truncate `text` to approximately `max_tokens`, preferring to cut at a
/// sentence or paragraph boundary near the target length rather than
/// mid-word.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize) -> String {
    let target_chars = max_tokens * CHARS_PER_TOKEN;
    if text.len() <= target_chars {
        return text.to_string();
    }

    let truncated = &text[..target_chars.min(text.len())];
    let min_cut = (target_chars as f64 * 0.8) as usize;

    let boundaries = [". ", "? ", "! ", "\n\n"];
    let mut best_cut: Option<usize> = None;

    for marker in boundaries {
        if let Some(pos) = truncated.rfind(marker) {
            let end = pos + marker.len();
            if end >= min_cut && best_cut.map_or(true, |b| end > b) {
                best_cut = Some(end);
            }
        }
    }

    match best_cut {
        Some(cut) => truncated[..cut].to_string(),
        None => format!("{}...", truncated.trim_end()),
    }
}

/// Greedily select chunks (already sorted by descending relevance) within
/// a token budget. Stops at the first chunk that cannot fit at all, even
/// if a truncated partial inclusion was attempted for it.
pub fn select_chunks_within_budget<'a>(
    chunks: &'a [(String, usize)],
    max_tokens: usize,
    reserve_tokens: usize,
) -> Vec<(usize, String)> {
    let available = max_tokens.saturating_sub(reserve_tokens);
    let mut selected = Vec::new();
    let mut total = 0usize;

    for (idx, (text, tokens)) in chunks.iter().enumerate() {
        let remaining = available.saturating_sub(total);
        if *tokens <= remaining {
            selected.push((idx, text.clone()));
            total += tokens;
            continue;
        }

        if remaining > 200 {
            let truncated = truncate_to_token_limit(text, remaining);
            let truncated_tokens = count_tokens(&truncated);
            if truncated_tokens > 100 {
                selected.push((idx, truncated));
            }
        }
        break;
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tokens_is_len_over_four() {
        assert_eq!(count_tokens("abcdefgh"), 2);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn truncate_prefers_sentence_boundary() {
        let text = "First sentence here. Second sentence here. Third sentence that runs long enough to get cut off eventually.";
        let truncated = truncate_to_token_limit(text, 15);
        assert!(truncated.ends_with('.'));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn truncate_falls_back_to_ellipsis_without_boundary() {
        let text = "a".repeat(200);
        let truncated = truncate_to_token_limit(&text, 10);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn select_stops_at_first_unfittable_chunk() {
        let chunks = vec![
            ("short one".to_string(), 50),
            ("a".repeat(2000), 500),
            ("never reached".to_string(), 10),
        ];
        let selected = select_chunks_within_budget(&chunks, 600, 100);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].0, 0);
        assert_eq!(selected[1].0, 1);
    }

    #[test]
    fn select_includes_nothing_when_first_chunk_too_small_after_truncation() {
        let chunks = vec![("a".repeat(10_000), 2500)];
        let selected = select_chunks_within_budget(&chunks, 150, 100);
        assert!(selected.is_empty());
    }
}
