//! Abstraction over the external LLM chat-completion collaborator used by
//! offline summary and Q&A generation. The LLM itself is out of this
//! crate's scope; this trait lets `summary` and `qagen` depend on a
//! capability rather than a concrete HTTP client, so each still functions
//! (summary generation degrading to a stub, Q&A dedup falling back to
//! cosine similarity) when no LLM client is wired up.

use async_trait::async_trait;

use crate::error::RagResult;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single prompt, return the raw completion text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> RagResult<String>;
}

/// A real client that calls an OpenAI-compatible chat completions endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(url: String, model: String, timeout_secs: u64) -> RagResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http, url, model })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> RagResult<String> {
        use crate::error::RagError;

        let mut last_err: Option<RagError> = None;

        for attempt in 0..3u32 {
            if attempt > 0 {
                let delay = std::time::Duration::from_secs(1u64 << (attempt - 1).min(5));
                tokio::time::sleep(delay.min(std::time::Duration::from_secs(60))).await;
            }

            let body = serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
            });

            let resp = self.http.post(&self.url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .get("choices")
                            .and_then(|c| c.as_array())
                            .and_then(|c| c.first())
                            .and_then(|c| c.get("message"))
                            .and_then(|m| m.get("content"))
                            .and_then(|c| c.as_str())
                            .map(|s| s.to_string());
                        match content {
                            Some(text) => return Ok(text),
                            None => {
                                return Err(RagError::InvalidData(
                                    "LLM response missing choices[0].message.content".to_string(),
                                ))
                            }
                        }
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(RagError::TransientUpstream(format!("HTTP {}", status)));
                        continue;
                    }
                    return Err(RagError::InvalidData(format!("LLM error {}", status)));
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
