//! Offline Q&A generation: split large documents into overlapping
//! windows, prompt the LLM for candidate pairs, validate, deduplicate,
//! and hand back a finished list for the caller to persist.
//!
//! State machine: `LOAD → SPLIT? → per-part (PROMPT → CALL_LLM →
//! PARSE_JSON → VALIDATE) → DEDUP → PERSIST`. This module implements
//! everything up to DEDUP; persistence is the caller's job via `store`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{ChunkingConfig, QaConfig};
use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::error::{RagError, RagResult};
use crate::llm::LlmClient;
use crate::models::QaPair;

const MAX_QUESTION_TOKENS: usize = 60;

/// Filler prefaces that add no information and should never open an
/// answer ("Based on the document, ...").
const BANNED_FILLER_PREFIXES: &[&str] = &[
    "based on the document",
    "based on the text",
    "according to the document",
    "according to the text",
    "the document states that",
    "the text states that",
    "as mentioned in the document",
];

/// Phrases that assert a consequence or outcome without grounding it in
/// the source; rejected unless paired with one of `SOURCING_PHRASES`.
const BANNED_CONSEQUENCE_PHRASES: &[&str] = &["this means that", "as a result", "this implies", "therefore it follows"];

const SOURCING_PHRASES: &[&str] = &["according to", "as stated in", "as reported in", "per the document"];

#[derive(Debug, Deserialize)]
struct RawQaPair {
    question: String,
    answer: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    page: Option<u32>,
}

/// One window of a (possibly split) document's text.
#[derive(Debug, Clone)]
pub struct DocumentWindow {
    pub text: String,
    pub page: Option<u32>,
}

/// Split `text` into ~`window_tokens`-sized windows with
/// `overlap_tokens` of carried-forward context, preferring page
/// boundaries (when `page_starts` is non-empty) and falling back to
/// paragraph boundaries.
pub fn split_document(
    text: &str,
    page_starts: &[usize],
    chunking: &ChunkingConfig,
) -> Vec<DocumentWindow> {
    let total_tokens = crate::token_budget::count_tokens(text);
    if total_tokens <= chunking.split_trigger_tokens {
        return vec![DocumentWindow { text: text.to_string(), page: page_starts.first().map(|_| 1) }];
    }

    let sections: Vec<(usize, usize)> = if page_starts.len() > 1 {
        let mut bounds = page_starts.to_vec();
        bounds.push(text.len());
        bounds.windows(2).map(|w| (w[0], w[1])).collect()
    } else {
        paragraph_bounds(text)
    };

    let window_chars = chunking.split_window_tokens * 4;
    let overlap_chars = chunking.split_overlap_tokens * 4;

    let mut windows = Vec::new();
    let mut current_start = 0usize;
    let mut current_len = 0usize;
    let mut current_page = if page_starts.len() > 1 { Some(1u32) } else { None };

    for (i, (start, end)) in sections.iter().enumerate() {
        let section_len = end - start;
        if current_len + section_len > window_chars && current_len > 0 {
            windows.push(DocumentWindow {
                text: text[current_start..*start].to_string(),
                page: current_page,
            });

            // Carry forward trailing whole sections up to overlap_chars.
            let mut back = i;
            let mut carried_len = 0usize;
            while back > 0 && carried_len < overlap_chars {
                back -= 1;
                carried_len += sections[back].1 - sections[back].0;
            }
            current_start = sections[back].0;
            current_len = carried_len + section_len;
            current_page = if page_starts.len() > 1 { Some((back + 1) as u32) } else { None };
        } else {
            current_len += section_len;
        }
    }

    if current_start < text.len() {
        windows.push(DocumentWindow {
            text: text[current_start..].to_string(),
            page: current_page,
        });
    }

    windows
}

fn paragraph_bounds(text: &str) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0usize;
    let marker = "\n\n";
    while let Some(pos) = text[start..].find(marker) {
        let end = start + pos + marker.len();
        bounds.push((start, end));
        start = end;
    }
    if start < text.len() {
        bounds.push((start, text.len()));
    }
    bounds
}

/// How many Q&A pairs to target for a document of `token_count` tokens,
/// scaling across three configured bands.
pub fn target_count(token_count: usize, cfg: &QaConfig) -> usize {
    if token_count < 5_000 {
        cfg.qa_count_small
    } else if token_count <= 15_000 {
        cfg.qa_count_medium
    } else {
        cfg.qa_count_large
    }
}

fn build_prompt(filename: &str, window: &DocumentWindow, target: usize) -> (String, String) {
    let system = format!(
        "You generate question-answer pairs from a document for a voice assistant's \
         knowledge base. Respond with strict JSON: a list of objects each shaped \
         {{\"question\": string, \"answer\": string, \"context\": string, \"page\": number|null}}. \
         Generate about {} pairs. Answers must be self-contained and must not open with a \
         filler preface like 'Based on the document'. Do not assert unsourced consequences.",
        target
    );
    let user = format!("Document: {}\n\n{}", filename, window.text);
    (system, user)
}

/// Reject a candidate pair that violates any of §4.8's validation rules.
pub fn validate_pair(question: &str, answer: &str) -> RagResult<()> {
    if question.trim().is_empty() || answer.trim().is_empty() {
        return Err(RagError::InvalidData("empty question or answer".to_string()));
    }
    if crate::token_budget::count_tokens(question) > MAX_QUESTION_TOKENS {
        return Err(RagError::InvalidData("question exceeds token cap".to_string()));
    }

    let lower_answer = answer.to_lowercase();
    for prefix in BANNED_FILLER_PREFIXES {
        if lower_answer.trim_start().starts_with(prefix) {
            return Err(RagError::InvalidData(format!("answer begins with banned filler preface: {}", prefix)));
        }
    }

    for phrase in BANNED_CONSEQUENCE_PHRASES {
        if lower_answer.contains(phrase) {
            let sourced = SOURCING_PHRASES.iter().any(|s| lower_answer.contains(s));
            if !sourced {
                return Err(RagError::InvalidData(format!(
                    "answer contains unsourced consequence claim: {}",
                    phrase
                )));
            }
        }
    }

    Ok(())
}

fn parse_json_array(raw: &str) -> RagResult<Vec<RawQaPair>> {
    let trimmed = raw.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    let value: Value = serde_json::from_str(json_text)?;
    let array = value
        .as_array()
        .cloned()
        .or_else(|| value.get("pairs").and_then(|v| v.as_array()).cloned())
        .ok_or_else(|| RagError::InvalidData("LLM response is not a JSON array of pairs".to_string()))?;

    let mut pairs = Vec::new();
    for item in array {
        if let Ok(pair) = serde_json::from_value::<RawQaPair>(item) {
            pairs.push(pair);
        }
    }
    Ok(pairs)
}

/// Generate, validate, and embed candidate Q&A pairs for one document.
/// Runs the full `SPLIT? → per-window (PROMPT → CALL_LLM → PARSE_JSON →
/// VALIDATE)` pipeline; does not deduplicate (see `deduplicate_pairs`)
/// or persist.
pub async fn generate_for_document(
    llm: &dyn LlmClient,
    embedding: &EmbeddingClient,
    filename: &str,
    text: &str,
    page_starts: &[usize],
    chunking: &ChunkingConfig,
    qa_cfg: &QaConfig,
) -> RagResult<Vec<QaPair>> {
    let windows = split_document(text, page_starts, chunking);
    let target = target_count(crate::token_budget::count_tokens(text), qa_cfg);
    let per_window_target = (target / windows.len().max(1)).max(1);

    let mut pairs = Vec::new();

    for window in &windows {
        let (system, user) = build_prompt(filename, window, per_window_target);
        let raw = match llm.complete(&system, &user).await {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let candidates = match parse_json_array(&raw) {
            Ok(c) => c,
            Err(_) => continue,
        };

        for candidate in candidates {
            if validate_pair(&candidate.question, &candidate.answer).is_err() {
                continue;
            }

            let embedding_vec = embedding.embed(&candidate.question).await.unwrap_or_default();
            if embedding_vec.is_empty() {
                continue;
            }

            pairs.push(QaPair {
                id: Uuid::new_v4(),
                question: candidate.question,
                answer: candidate.answer,
                context: if candidate.context.is_empty() { window.text.clone() } else { candidate.context },
                source_filename: filename.to_string(),
                page: candidate.page.or(window.page),
                embedding: embedding_vec,
            });
        }
    }

    Ok(pairs)
}

/// Two-tier deduplication: try an LLM-based redundancy pass first (the
/// LLM names indices that are redundant with an earlier pair); if that
/// call is unavailable or fails to parse, fall back to cosine similarity
/// over the question embeddings. Both paths keep first occurrence.
pub async fn deduplicate_pairs(llm: Option<&dyn LlmClient>, pairs: Vec<QaPair>) -> Vec<QaPair> {
    if pairs.len() <= 1 {
        return pairs;
    }

    if let Some(llm) = llm {
        if let Some(deduped) = llm_dedup_pass(llm, &pairs).await {
            return deduped;
        }
    }

    cosine_dedup_pass(pairs, 0.95)
}

async fn llm_dedup_pass(llm: &dyn LlmClient, pairs: &[QaPair]) -> Option<Vec<QaPair>> {
    let mut global_redundant = std::collections::HashSet::new();

    for (batch_idx, batch) in pairs.chunks(30).enumerate() {
        let base = batch_idx * 30;
        let listing: String = batch
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i, p.question))
            .collect::<Vec<_>>()
            .join("\n");
        let system = "Identify redundant questions that ask the same thing in different words. \
                       Respond with strict JSON: {\"redundant_indices\": [int]} using the listed indices.";
        let raw = llm.complete(system, &listing).await.ok()?;
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        let indices = value.get("redundant_indices")?.as_array()?;

        for idx in indices {
            if let Some(local_idx) = idx.as_u64() {
                global_redundant.insert(base + local_idx as usize);
            }
        }
    }

    Some(
        pairs
            .iter()
            .enumerate()
            .filter(|(i, _)| !global_redundant.contains(i))
            .map(|(_, p)| p.clone())
            .collect(),
    )
}

fn cosine_dedup_pass(pairs: Vec<QaPair>, threshold: f32) -> Vec<QaPair> {
    let mut kept: Vec<QaPair> = Vec::new();

    for pair in pairs {
        let is_dup = kept.iter().any(|k| cosine_similarity(&k.embedding, &pair.embedding) >= threshold);
        if !is_dup {
            kept.push(pair);
        }
    }

    kept
}

/// Per-document Q&A generation output, ready for JSON persistence.
#[derive(Debug, Serialize)]
pub struct QaDocumentOutput {
    pub title: String,
    pub count: usize,
    pub generated_at: i64,
    pub pairs: Vec<QaPairOutput>,
}

#[derive(Debug, Serialize)]
pub struct QaPairOutput {
    pub question: String,
    pub answer: String,
    pub context: String,
    pub page: Option<u32>,
}

pub fn build_output(filename: &str, pairs: &[QaPair]) -> QaDocumentOutput {
    QaDocumentOutput {
        title: filename.to_string(),
        count: pairs.len(),
        generated_at: Utc::now().timestamp(),
        pairs: pairs
            .iter()
            .map(|p| QaPairOutput {
                question: p.question.clone(),
                answer: p.answer.clone(),
                context: p.context.clone(),
                page: p.page,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_overlong_question() {
        let question = "word ".repeat(100);
        assert!(validate_pair(&question, "a fine answer").is_err());
    }

    #[test]
    fn validate_rejects_filler_preface() {
        assert!(validate_pair("What happened?", "Based on the document, it rained.").is_err());
    }

    #[test]
    fn validate_rejects_unsourced_consequence() {
        assert!(validate_pair("What happened?", "This means that the whole system failed.").is_err());
    }

    #[test]
    fn validate_allows_sourced_consequence() {
        assert!(validate_pair(
            "What happened?",
            "According to the report, this means that output dropped 10%."
        )
        .is_ok());
    }

    #[test]
    fn target_count_scales_by_band() {
        let cfg = QaConfig {
            relevance_threshold: 0.5,
            top_k: 5,
            qa_count_small: 10,
            qa_count_medium: 25,
            qa_count_large: 50,
            dedup_cosine_threshold: 0.95,
        };
        assert_eq!(target_count(1000, &cfg), 10);
        assert_eq!(target_count(10_000, &cfg), 25);
        assert_eq!(target_count(20_000, &cfg), 50);
    }

    #[test]
    fn split_document_returns_single_window_below_trigger() {
        let chunking = ChunkingConfig::default();
        let windows = split_document("short text", &[], &chunking);
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn cosine_dedup_keeps_first_occurrence() {
        let p1 = QaPair {
            id: Uuid::new_v4(),
            question: "q1".into(),
            answer: "a1".into(),
            context: "c".into(),
            source_filename: "f".into(),
            page: None,
            embedding: vec![1.0, 0.0],
        };
        let mut p2 = p1.clone();
        p2.id = Uuid::new_v4();
        p2.question = "q2".into();

        let deduped = cosine_dedup_pass(vec![p1.clone(), p2], 0.95);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, p1.id);
    }
}
