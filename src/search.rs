//! Chunk and Q&A retrieval: the two query-time paths the orchestrator and
//! the `ragctl search` CLI command both call into.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::RagResult;
use crate::hybrid::{expand_chunk_context, merge_scores};
use crate::models::ScoredChunk;
use crate::state::RagState;
use crate::store::{self, StorePaths};
use crate::token_budget::{count_tokens, select_chunks_within_budget};
use crate::tts_filter::filter_safe_text;

const OVERFETCH_FACTOR: usize = 4;

/// One chunk result ready for formatting, already context-expanded and
/// TTS-filtered.
pub struct ChunkHit {
    pub filename: String,
    pub text: String,
    pub score: f32,
}

async fn embed_query(state: &RagState, query: &str) -> RagResult<Vec<f32>> {
    let _permit = state.query_embed_semaphore.acquire().await.expect("semaphore not closed");
    state.embedding.embed(query).await
}

/// Run hybrid (or semantic-only) chunk retrieval against the live index
/// snapshot, expand each surviving hit to its surrounding context, and
/// fit the result within `budget_tokens`. Returns `Ok(None)` when nothing
/// clears the relevance threshold or the live index is empty.
pub async fn chunk_retrieve(state: &RagState, query: &str, budget_tokens: usize) -> RagResult<Option<String>> {
    let live = state.live.load();
    if live.vector_index.is_empty() {
        return Ok(None);
    }

    let query_vec = embed_query(state, query).await?;
    let top_k = state.config.retrieval.top_k;
    let threshold = state.config.retrieval.relevance_threshold;

    let raw_semantic = live.vector_index.query(&query_vec, (top_k * OVERFETCH_FACTOR).max(top_k))?;
    let semantic_map: HashMap<Uuid, f32> = raw_semantic
        .into_iter()
        .filter(|(_, score)| *score > threshold)
        .collect();

    if semantic_map.is_empty() {
        return Ok(None);
    }

    let scored: Vec<ScoredChunk> = if state.config.retrieval.hybrid_search_enabled {
        let keyword_results = live.bm25_index.query(query, (top_k * OVERFETCH_FACTOR).max(top_k));
        let keyword_map: HashMap<Uuid, f32> = keyword_results.into_iter().collect();
        let mut merged = merge_scores(
            &semantic_map,
            &keyword_map,
            state.config.retrieval.hybrid_semantic_weight as f32,
            state.config.retrieval.hybrid_keyword_weight as f32,
        );
        merged.retain(|c| semantic_map.contains_key(&c.chunk_id));
        merged
    } else {
        let mut semantic_only: Vec<ScoredChunk> = semantic_map
            .iter()
            .map(|(&id, &score)| ScoredChunk {
                chunk_id: id,
                semantic_score: score,
                keyword_score: 0.0,
                combined_score: score,
            })
            .collect();
        semantic_only.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));
        semantic_only
    };

    let paths = StorePaths::new(&state.config.store.root);
    let mut hits = Vec::new();

    for scored in scored.into_iter().take(top_k) {
        let Some(record) = live.chunk_metadata.get(&scored.chunk_id) else {
            continue;
        };
        let chunk = &record.chunk;

        let full_text = state
            .doc_text_cache
            .get_or_load(&chunk.filename, || store::load_document_text(&paths, &chunk.filename))
            .await?;

        let expanded = if state.config.retrieval.context_expansion_enabled {
            expand_chunk_context(
                &full_text,
                chunk.char_start,
                chunk.char_end,
                state.config.retrieval.expansion_chars,
                state.config.retrieval.max_expanded_chars,
            )
        } else {
            chunk.text.clone()
        };

        hits.push(ChunkHit {
            filename: chunk.filename.clone(),
            text: filter_safe_text(&expanded),
            score: scored.combined_score,
        });
    }

    if hits.is_empty() {
        return Ok(None);
    }

    let budgeted: Vec<(String, usize)> = hits.iter().map(|h| (h.text.clone(), count_tokens(&h.text))).collect();
    let selected = select_chunks_within_budget(&budgeted, budget_tokens, 0);
    if selected.is_empty() {
        return Ok(None);
    }

    let formatted = format_chunk_context(state, &hits, &selected);
    Ok(Some(formatted))
}

/// Build the final chunk-context string, grouping snippets by document and
/// including each document's short summary once, up to 3 snippets per
/// document, citing the source when `enable_citations` is set.
fn format_chunk_context(state: &RagState, hits: &[ChunkHit], selected: &[(usize, String)]) -> String {
    let live = state.live.load();
    let mut by_doc: Vec<(String, Vec<String>)> = Vec::new();

    for &(idx, ref text) in selected {
        let filename = &hits[idx].filename;
        if let Some(entry) = by_doc.iter_mut().find(|(f, _)| f == filename) {
            if entry.1.len() < 3 {
                entry.1.push(text.clone());
            }
        } else {
            by_doc.push((filename.clone(), vec![text.clone()]));
        }
    }

    let mut out = String::new();
    for (filename, snippets) in by_doc {
        if state.config.retrieval.enable_citations {
            out.push_str(&format!("Source: {}\n", filename));
        }
        if let Some(summary) = live.doc_summaries.get(&filename) {
            out.push_str(&summary.summary);
            out.push('\n');
        }
        for snippet in snippets {
            out.push_str(&snippet);
            out.push('\n');
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Run Q&A retrieval against the live Q&A index. Returns `Ok(None)` when
/// no Q&A index is loaded or nothing clears the configured threshold.
pub async fn qa_retrieve(state: &RagState, query: &str) -> RagResult<Option<String>> {
    let qa_index_guard = state.qa_index.load();
    let Some(qa_index) = qa_index_guard.as_ref() else {
        return Ok(None);
    };
    if qa_index.is_empty() {
        return Ok(None);
    }

    let query_vec = embed_query(state, query).await?;
    let results = qa_index.query(&query_vec, state.config.qa.top_k, state.config.qa.relevance_threshold);
    if results.is_empty() {
        return Ok(None);
    }

    Ok(Some(format_qa_context(state, &results)))
}

fn format_qa_context(state: &RagState, results: &[crate::qa::RetrievedQaPair]) -> String {
    let mut out = String::new();
    for pair in results {
        out.push_str(&format!("Q: {}\nA: {}\n", pair.question, pair.answer));
        if state.config.retrieval.enable_citations {
            out.push_str(&format!("Source: {}\n", pair.source));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// The `ragctl search` CLI command: run an explicit retrieval (independent
/// of the orchestrator's budget/eviction machinery) and print results
/// grouped by document.
pub async fn run_search_command(state: &RagState, query: &str, mode: crate::models::RagMode) -> RagResult<()> {
    match mode {
        crate::models::RagMode::Qa => match qa_retrieve(state, query).await? {
            Some(text) => println!("{}", text),
            None => println!("No matching Q&A pairs."),
        },
        crate::models::RagMode::Chunk => {
            match chunk_retrieve(state, query, state.config.rag.context_budget_tokens).await? {
                Some(text) => println!("{}", text),
                None => println!("No matching chunks."),
            }
        }
        crate::models::RagMode::Both => {
            if let Some(text) = qa_retrieve(state, query).await? {
                println!("-- Q&A matches --\n{}\n", text);
            }
            if let Some(text) = chunk_retrieve(state, query, state.config.rag.context_budget_tokens).await? {
                println!("-- Chunk matches --\n{}", text);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_chunk_context_groups_by_document_up_to_three() {
        let hits = vec![
            ChunkHit { filename: "a.md".into(), text: "one".into(), score: 0.9 },
            ChunkHit { filename: "a.md".into(), text: "two".into(), score: 0.8 },
            ChunkHit { filename: "b.md".into(), text: "three".into(), score: 0.7 },
        ];
        let selected = vec![(0, "one".to_string()), (1, "two".to_string()), (2, "three".to_string())];

        let mut by_doc: Vec<(String, Vec<String>)> = Vec::new();
        for &(idx, ref text) in &selected {
            let filename = &hits[idx].filename;
            if let Some(entry) = by_doc.iter_mut().find(|(f, _)| f == filename) {
                if entry.1.len() < 3 {
                    entry.1.push(text.clone());
                }
            } else {
                by_doc.push((filename.clone(), vec![text.clone()]));
            }
        }

        assert_eq!(by_doc.len(), 2);
        assert_eq!(by_doc[0].1.len(), 2);
    }
}
