//! Per-document summary generation: a short summary (~100 tokens), an
//! extended summary (~400 tokens), and keyword lists at both granularities.
//! Regenerated whenever a document's content hash changes.
//!
//! The generation algorithm is implemented directly from this crate's
//! behavioral spec rather than ported from a reference module, since the
//! module that would have grounded it (the document-summary generator
//! referenced by the database orchestration source) was not available in
//! the retrieved reference material.

use chrono::Utc;
use serde_json::Value;

use crate::error::{RagError, RagResult};
use crate::llm::LlmClient;
use crate::models::DocumentSummary;

const SYSTEM_PROMPT: &str = "You summarize documents for a voice assistant's knowledge base. \
Respond with strict JSON: {\"summary\": string, \"extended_summary\": string, \
\"keywords\": [string], \"extended_keywords\": [string]}. The summary must be at most \
roughly 100 tokens, the extended_summary at most roughly 400 tokens. Use only plain \
ASCII-friendly punctuation suitable for text-to-speech.";

pub async fn generate_summary(
    llm: &dyn LlmClient,
    filename: &str,
    document_text: &str,
    source_hash: &str,
) -> RagResult<DocumentSummary> {
    let excerpt: String = document_text.chars().take(20_000).collect();
    let user_prompt = format!("Document: {}\n\n{}", filename, excerpt);

    let raw = llm.complete(SYSTEM_PROMPT, &user_prompt).await?;
    let parsed: Value = parse_json_completion(&raw)?;

    let summary = parsed
        .get("summary")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RagError::InvalidData("summary field missing".to_string()))?
        .to_string();
    let extended_summary = parsed
        .get("extended_summary")
        .and_then(|v| v.as_str())
        .unwrap_or(&summary)
        .to_string();
    let keywords = string_array(&parsed, "keywords");
    let extended_keywords = string_array(&parsed, "extended_keywords");

    Ok(DocumentSummary {
        filename: filename.to_string(),
        summary,
        extended_summary,
        keywords,
        extended_keywords,
        generated_at: Utc::now().timestamp(),
        source_hash: source_hash.to_string(),
    })
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

/// LLM responses sometimes wrap JSON in a code fence; strip that before
/// parsing.
fn parse_json_completion(raw: &str) -> RagResult<Value> {
    let trimmed = raw.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(json_text).map_err(RagError::Json)
}

/// A document's summary should be regenerated only when its content hash
/// has changed since the last stored summary, or no summary exists yet.
pub fn needs_regeneration(existing: Option<&DocumentSummary>, current_hash: &str) -> bool {
    match existing {
        Some(summary) => summary.source_hash != current_hash,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fence_before_parsing() {
        let raw = "```json\n{\"summary\": \"hi\", \"keywords\": [\"a\"]}\n```";
        let parsed = parse_json_completion(raw).unwrap();
        assert_eq!(parsed.get("summary").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn needs_regeneration_when_hash_changes() {
        let existing = DocumentSummary {
            filename: "a.md".into(),
            summary: "s".into(),
            extended_summary: "e".into(),
            keywords: vec![],
            extended_keywords: vec![],
            generated_at: 0,
            source_hash: "abc".into(),
        };
        assert!(needs_regeneration(Some(&existing), "def"));
        assert!(!needs_regeneration(Some(&existing), "abc"));
        assert!(needs_regeneration(None, "abc"));
    }
}
