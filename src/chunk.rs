//! Sentence-aware text chunker, chunk validity filtering, embedding-input
//! cleanup, and embedding-based chunk deduplication.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_tokens` budget, carrying forward a trailing fraction of the
//! previous chunk's sentences as overlap so retrieval never loses context
//! at a chunk boundary.

use uuid::Uuid;

use crate::models::{Chunk, ChunkType};
use crate::token_budget::count_tokens;
use crate::tts_filter::filter_safe_text;

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into sentences on `.`, `?`, `!` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'?' || b == b'!')
            && i + 1 < bytes.len()
            && (bytes[i + 1] as char).is_whitespace()
        {
            sentences.push(text[start..=i].trim());
            start = i + 1;
        }
        i += 1;
    }
    if start < text.len() {
        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Chunk `text` into sentence-boundary-respecting windows of approximately
/// `max_tokens`, carrying forward `overlap_fraction` of the previous
/// chunk's trailing sentences into the next chunk.
pub fn chunk_text(filename: &str, text: &str, max_tokens: usize, overlap_fraction: f64) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let sentences = split_sentences(text);

    if sentences.is_empty() {
        return vec![];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    let mut chunk_index: i64 = 0;
    let mut char_cursor = 0usize;

    let flush = |sents: &[&str], idx: i64, cursor_start: usize, full_text: &str| -> Option<Chunk> {
        if sents.is_empty() {
            return None;
        }
        let joined = sents.join(" ");
        let char_start = full_text[cursor_start..]
            .find(sents[0])
            .map(|p| cursor_start + p)
            .unwrap_or(cursor_start);
        let char_end = (char_start + joined.len()).min(full_text.len());
        Some(Chunk {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            chunk_index: idx,
            char_start,
            char_end,
            estimated_tokens: count_tokens(&joined),
            text: joined,
            chunk_type: ChunkType::Normal,
        })
    };

    for sentence in &sentences {
        let sentence_len = sentence.len() + 1;
        if current_len + sentence_len > max_chars && !current.is_empty() {
            if let Some(c) = flush(&current, chunk_index, char_cursor, text) {
                char_cursor = c.char_end;
                chunks.push(c);
                chunk_index += 1;
            }

            let overlap_count = ((current.len() as f64) * overlap_fraction).round() as usize;
            let overlap_start = current.len().saturating_sub(overlap_count);
            let carried: Vec<&str> = current[overlap_start..].to_vec();
            current_len = carried.iter().map(|s| s.len() + 1).sum();
            current = carried;
        }

        current.push(sentence);
        current_len += sentence_len;
    }

    if let Some(c) = flush(&current, chunk_index, char_cursor, text) {
        chunks.push(c);
    }

    chunks
}

/// Reject chunks that look like table-of-contents noise, index-page
/// artifacts, or otherwise too degenerate to be useful retrieval units.
pub fn is_valid_chunk(text: &str) -> bool {
    if text.len() < 20 {
        return false;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let alpha_words = words.iter().filter(|w| w.chars().any(|c| c.is_alphabetic())).count();
    if alpha_words < 5 {
        return false;
    }

    let dot_count = text.matches('.').count();
    if dot_count > 2 * words.len() {
        return false;
    }

    let digit_count = text.chars().filter(|c| c.is_ascii_digit()).count();
    if text.is_empty() || (digit_count as f64 / text.len() as f64) > 0.30 {
        return false;
    }

    let avg_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64
    };
    if avg_word_len < 2.5 {
        return false;
    }

    true
}

/// Clean text before it is sent to the embedding service: collapse dot
/// leaders and repeated whitespace, strip bare page-number lines, and
/// normalize the same Unicode punctuation the TTS-safe filter targets.
pub fn clean_for_embedding(text: &str) -> String {
    let dot_leaders_collapsed = {
        let mut out = String::with_capacity(text.len());
        let mut run = 0;
        for ch in text.chars() {
            if ch == '.' {
                run += 1;
                if run <= 1 {
                    out.push(ch);
                }
            } else {
                run = 0;
                out.push(ch);
            }
        }
        out
    };

    let lines: Vec<&str> = dot_leaders_collapsed
        .lines()
        .filter(|line| !line.trim().chars().all(|c| c.is_ascii_digit()) || line.trim().is_empty())
        .collect();

    let mut result = String::new();
    let mut last_was_space = false;
    for ch in lines.join("\n").chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(ch);
            last_was_space = false;
        }
    }

    // Reuses the TTS-safe filter's Unicode-to-ASCII normalization
    // (dashes, ellipses, ligatures, soft hyphen, non-breaking spaces) so
    // embedder input and TTS output both see the same normalized text.
    filter_safe_text(result.trim())
}

/// Deduplicate chunks by comparing each cleaned chunk's embedding against
/// all previously-kept embeddings; rejects a chunk at or above
/// `threshold` cosine similarity to any prior chunk, preserving first
/// occurrence order.
pub fn deduplicate<'a>(
    chunks: &'a [Chunk],
    embeddings: &[Vec<f32>],
    threshold: f32,
) -> Vec<&'a Chunk> {
    let mut kept_embeddings: Vec<&Vec<f32>> = Vec::new();
    let mut kept = Vec::new();

    for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
        let is_dup = kept_embeddings
            .iter()
            .any(|kept_emb| cosine(kept_emb, embedding) >= threshold);
        if !is_dup {
            kept_embeddings.push(embedding);
            kept.push(chunk);
        }
    }

    kept
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
