//! Embedding HTTP client.
//!
//! Calls a local embedding inference endpoint (the embedding model itself
//! is an external collaborator, never run in-process). Retries on
//! transient failures with exponential backoff, and retries with a
//! shrinking token cap when the upstream rejects an input as too large.
//!
//! Retry strategy, shared with the rest of this crate's HTTP clients:
//! - HTTP 429 and 5xx, or a connection error → retry with backoff
//! - HTTP 4xx (not 429) → fail immediately, not retryable
//! - A response whose embedding has the wrong dimensionality → `InvalidData`,
//!   the caller skips the chunk rather than retrying

use std::time::Duration;

use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};
use crate::token_budget::{count_tokens, truncate_to_token_limit};

pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> RagResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Embed a single text, shrinking the effective token cap on each
    /// retry attempt (a defense against upstream "input too large"
    /// responses that a fixed cap doesn't fully prevent).
    pub async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut last_err: Option<RagError> = None;

        for attempt in 0..3u32 {
            let cap = self
                .config
                .max_input_tokens
                .saturating_sub(10 * attempt as usize)
                .max(50);
            let input = if count_tokens(text) > cap {
                truncate_to_token_limit(text, cap)
            } else {
                text.to_string()
            };

            match self.embed_once(&input).await {
                Ok(mut vector) => {
                    if vector.iter().all(|&v| v == 0.0) {
                        return Err(RagError::InvalidData(
                            "embedding service returned a zero vector".to_string(),
                        ));
                    }
                    if vector.len() != self.config.dims {
                        return Err(RagError::InvalidData(format!(
                            "expected {} dims, got {}",
                            self.config.dims,
                            vector.len()
                        )));
                    }
                    l2_normalize(&mut vector);
                    return Ok(vector);
                }
                Err(RagError::InputTooLarge(_)) => continue,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RagError::InputTooLarge(text.len().to_string())))
    }

    async fn embed_once(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut last_err: Option<RagError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.config.url)
                .json(&json!({ "content": text, "embedding": true }))
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&body);
                    }
                    if status.as_u16() == 413 {
                        return Err(RagError::InputTooLarge(format!("HTTP {}", status)));
                    }
                    if status.as_u16() == 429 {
                        last_err = Some(RagError::RateLimited(format!("HTTP {}", status)));
                        continue;
                    }
                    if status.is_server_error() {
                        last_err = Some(RagError::TransientUpstream(format!("HTTP {}", status)));
                        continue;
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(RagError::InvalidData(format!(
                        "embedding service error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(RagError::TransientUpstream(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RagError::TransientUpstream("exhausted retries".to_string())))
    }
}

/// Parse the embedding endpoint's response. Handles both a flat
/// `{"embedding": [...]}` shape and a nested `[[...]]` shape some
/// embedding servers return for batch compatibility.
fn parse_embedding_response(json: &serde_json::Value) -> RagResult<Vec<f32>> {
    if let Some(arr) = json.get("embedding").and_then(|e| e.as_array()) {
        return Ok(to_f32_vec(arr));
    }

    if let Some(arr) = json.as_array() {
        if let Some(first) = arr.first() {
            if let Some(inner) = first.as_array() {
                return Ok(to_f32_vec(inner));
            }
            if first.is_number() {
                return Ok(to_f32_vec(arr));
            }
        }
    }

    Err(RagError::InvalidData(
        "could not locate embedding array in response".to_string(),
    ))
}

fn to_f32_vec(arr: &[serde_json::Value]) -> Vec<f32> {
    arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect()
}

/// Compute cosine similarity between two embedding vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// L2-normalize a vector in place.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flat_embedding_shape() {
        let json = serde_json::json!({ "embedding": [1.0, 2.0, 3.0] });
        let result = parse_embedding_response(&json).unwrap();
        assert_eq!(result, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn parse_nested_list_shape() {
        let json = serde_json::json!([[1.0, 2.0, 3.0]]);
        let result = parse_embedding_response(&json).unwrap();
        assert_eq!(result, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
