//! Hybrid semantic + keyword merge, and context expansion around a chunk.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::ScoredChunk;

/// Min-max normalize a set of scores into `[0, 1]`. A constant input
/// (max == min) normalizes to all ones rather than dividing by zero.
fn min_max_normalize(scores: &HashMap<Uuid, f32>) -> HashMap<Uuid, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.values().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scores
        .iter()
        .map(|(&id, &score)| {
            let normalized = if range.abs() < f32::EPSILON {
                1.0
            } else {
                (score - min) / range
            };
            (id, normalized)
        })
        .collect()
}

/// Merge semantic and keyword score lists into combined hybrid scores.
pub fn merge_scores(
    semantic: &HashMap<Uuid, f32>,
    keyword: &HashMap<Uuid, f32>,
    semantic_weight: f32,
    keyword_weight: f32,
) -> Vec<ScoredChunk> {
    let sem_norm = min_max_normalize(semantic);
    let kw_norm = min_max_normalize(keyword);

    let mut ids: Vec<Uuid> = sem_norm.keys().chain(kw_norm.keys()).cloned().collect();
    ids.sort();
    ids.dedup();

    let mut results: Vec<ScoredChunk> = ids
        .into_iter()
        .map(|id| {
            let s = *sem_norm.get(&id).unwrap_or(&0.0);
            let k = *kw_norm.get(&id).unwrap_or(&0.0);
            ScoredChunk {
                chunk_id: id,
                semantic_score: s,
                keyword_score: k,
                combined_score: semantic_weight * s + keyword_weight * k,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}

const BOUNDARY_MARKERS: [&str; 5] = [". ", "? ", "! ", "\n\n", "\n"];

/// Expand `[char_start, char_end)` outward by up to `window` characters on
/// each side, snapping to the nearest sentence/paragraph boundary. If no
/// boundary exists within the window on a given side, that side's original
/// offset is used unmodified.
pub fn expand_to_boundaries(
    full_text: &str,
    char_start: usize,
    char_end: usize,
    window: usize,
) -> (usize, usize) {
    let search_start = char_start.saturating_sub(window);
    let search_end = (char_end + window).min(full_text.len());

    let mut new_start = char_start;
    if search_start < char_start {
        if let Some(prefix) = full_text.get(search_start..char_start) {
            let mut best: Option<usize> = None;
            for marker in BOUNDARY_MARKERS {
                if let Some(pos) = prefix.rfind(marker) {
                    let candidate = search_start + pos + marker.len();
                    if best.map_or(true, |b| candidate > b) {
                        best = Some(candidate);
                    }
                }
            }
            if let Some(cut) = best {
                new_start = cut;
            }
        }
    }

    let mut new_end = char_end;
    if search_end > char_end {
        if let Some(suffix) = full_text.get(char_end..search_end) {
            let mut best: Option<usize> = None;
            for marker in BOUNDARY_MARKERS {
                if let Some(pos) = suffix.find(marker) {
                    let candidate = char_end + pos + marker.len();
                    if best.map_or(true, |b| candidate < b) {
                        best = Some(candidate);
                    }
                }
            }
            if let Some(cut) = best {
                new_end = cut;
            }
        }
    }

    (new_start, new_end)
}

/// Expand a chunk's context and wrap it with markers, enforcing a hard
/// ceiling on the expanded size. If the chunk alone already exceeds the
/// ceiling, it is truncated rather than expanded further.
pub fn expand_chunk_context(
    full_text: &str,
    char_start: usize,
    char_end: usize,
    window: usize,
    max_expanded_chars: usize,
) -> String {
    let raw_len = char_end.saturating_sub(char_start);
    if raw_len >= max_expanded_chars {
        let end = (char_start + max_expanded_chars).min(full_text.len());
        return full_text[char_start..end].to_string();
    }

    let (start, end) = expand_to_boundaries(full_text, char_start, char_end, window);
    let mut expanded = full_text[start..end].to_string();

    if expanded.len() > max_expanded_chars {
        expanded.truncate(max_expanded_chars);
    }

    let mut result = String::new();
    if start < char_start {
        result.push_str("[...]");
    }
    result.push_str(&expanded);
    if end > char_end && end < full_text.len() {
        result.push_str("[...]");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_normalize_handles_constant_scores() {
        let mut scores = HashMap::new();
        let id = Uuid::new_v4();
        scores.insert(id, 0.5);
        let normalized = min_max_normalize(&scores);
        assert_eq!(*normalized.get(&id).unwrap(), 1.0);
    }

    #[test]
    fn merge_scores_combines_weighted() {
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let mut semantic = HashMap::new();
        semantic.insert(id1, 1.0);
        semantic.insert(id2, 0.0);
        let mut keyword = HashMap::new();
        keyword.insert(id1, 0.0);
        keyword.insert(id2, 1.0);

        let merged = merge_scores(&semantic, &keyword, 0.7, 0.3);
        assert_eq!(merged[0].chunk_id, id1);
        assert!((merged[0].combined_score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn expand_snaps_to_sentence_boundaries() {
        let text = "First sentence. Second sentence is the target. Third sentence trails off.";
        let target_start = text.find("Second").unwrap();
        let target_end = target_start + "Second sentence is the target.".len();

        let (start, end) = expand_to_boundaries(text, target_start, target_end, 30);
        assert!(text[start..].starts_with("Second"));
        assert!(end <= text.len());
    }

    #[test]
    fn expand_uses_raw_offsets_when_no_boundary_in_window() {
        let text = "a".repeat(100);
        let (start, end) = expand_to_boundaries(&text, 40, 60, 5);
        assert_eq!(start, 40);
        assert_eq!(end, 60);
    }

    #[test]
    fn expand_chunk_context_truncates_oversized_chunk() {
        let text = "x".repeat(5000);
        let result = expand_chunk_context(&text, 0, 3000, 100, 2000);
        assert!(result.len() <= 2000);
    }
}
