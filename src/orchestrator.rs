//! Query-time orchestration: enrich a chat transcript with retrieved
//! context immediately before the last user message, honoring a rolling
//! token budget and never letting a retrieval failure interrupt the
//! caller's turn loop.

use chrono::Utc;
use tracing::warn;

use crate::error::{RagError, RagResult};
use crate::models::RagMode;
use crate::state::RagState;
use crate::token_budget::count_tokens;

/// One message in the caller's chat transcript. The orchestrator only
/// reads `role`/`content` and writes the two RAG-tagging fields; the
/// caller owns everything else about message shape.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub is_rag_context: bool,
    pub rag_timestamp: Option<i64>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            is_rag_context: false,
            rag_timestamp: None,
        }
    }

    fn rag(content: String) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            is_rag_context: true,
            rag_timestamp: Some(Utc::now().timestamp()),
        }
    }
}

/// A caller's chat transcript, mutated in place by enrichment. `read_only`
/// models transcripts the voice loop has frozen for this turn (e.g. one
/// already being streamed to the model) — enrichment against one of these
/// is a programming error, not a condition to degrade gracefully from.
pub struct ChatTranscript {
    pub messages: Vec<ChatMessage>,
    pub read_only: bool,
}

impl ChatTranscript {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, read_only: false }
    }

    fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == "user")
    }
}

/// Evict RAG-tagged messages oldest-first until the transcript's RAG
/// content fits within `budget_tokens`. Runs unconditionally, even when
/// RAG is disabled for this turn, because a prior turn may have left
/// tagged messages behind after a mid-conversation mode change.
fn manage_rolling_budget(transcript: &mut ChatTranscript, budget_tokens: usize) -> RagResult<()> {
    if transcript.read_only {
        return Err(RagError::Fatal("cannot manage rolling budget on a read-only transcript".to_string()));
    }

    let mut indices: Vec<usize> = transcript
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_rag_context)
        .map(|(i, _)| i)
        .collect();
    indices.sort_by_key(|&i| transcript.messages[i].rag_timestamp.unwrap_or(0));

    let mut total: usize = indices.iter().map(|&i| count_tokens(&transcript.messages[i].content)).sum();

    let mut to_remove = Vec::new();
    for &i in &indices {
        if total <= budget_tokens {
            break;
        }
        total = total.saturating_sub(count_tokens(&transcript.messages[i].content));
        to_remove.push(i);
    }

    to_remove.sort_unstable_by(|a, b| b.cmp(a));
    for i in to_remove {
        transcript.messages.remove(i);
    }

    Ok(())
}

fn insert_before_last_user(transcript: &mut ChatTranscript, content: String) -> RagResult<()> {
    let idx = transcript
        .last_user_index()
        .ok_or_else(|| RagError::LocalRecoverable("no user message to enrich around".to_string()))?;

    let last_user_len = transcript.messages[idx].content.trim().len();
    if last_user_len < 3 {
        return Err(RagError::LocalRecoverable("last user message is too short to enrich".to_string()));
    }

    transcript.messages.insert(idx, ChatMessage::rag(content));
    Ok(())
}

/// Enrich `transcript` with retrieved context for `query`, dispatching on
/// `mode`. Errors never escape to the caller: every failure is logged and
/// the transcript is left exactly as the rolling-budget pass left it.
pub async fn enrich(state: &RagState, mode: RagMode, query: &str, transcript: &mut ChatTranscript) {
    if let Err(err) = manage_rolling_budget(transcript, state.config.rag.context_budget_tokens) {
        warn!(error = %err, "rolling budget management failed");
        return;
    }

    if !state.is_rag_enabled() {
        return;
    }

    let result = match mode {
        RagMode::Qa => enrich_qa_only(state, query, transcript).await,
        RagMode::Chunk => enrich_chunk_only(state, query, transcript).await,
        RagMode::Both => enrich_both(state, query, transcript).await,
    };

    if let Err(err) = result {
        warn!(error = %err, "RAG enrichment failed for this turn, continuing without context");
    }
}

const RETRIEVAL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);

async fn enrich_qa_only(state: &RagState, query: &str, transcript: &mut ChatTranscript) -> RagResult<()> {
    if let Some(content) = timed_qa_context(state, query).await? {
        insert_before_last_user(transcript, content)?;
    }
    Ok(())
}

async fn enrich_chunk_only(state: &RagState, query: &str, transcript: &mut ChatTranscript) -> RagResult<()> {
    if let Some(content) = timed_chunk_context(state, query, state.config.rag.context_budget_tokens).await? {
        insert_before_last_user(transcript, content)?;
    }
    Ok(())
}

async fn enrich_both(state: &RagState, query: &str, transcript: &mut ChatTranscript) -> RagResult<()> {
    let qa_content = timed_qa_context(state, query).await?;
    let qa_tokens = qa_content.as_deref().map(count_tokens).unwrap_or(0);

    let remaining = state.config.rag.context_budget_tokens.saturating_sub(qa_tokens);
    let chunk_content = if remaining > state.config.rag.both_mode_chunk_floor_tokens {
        timed_chunk_context(state, query, remaining).await?
    } else {
        None
    };

    let combined = match (qa_content, chunk_content) {
        (Some(qa), Some(chunk)) => Some(format!("{}\n\n{}", qa, chunk)),
        (Some(qa), None) => Some(qa),
        (None, Some(chunk)) => Some(chunk),
        (None, None) => None,
    };

    if let Some(content) = combined {
        insert_before_last_user(transcript, content)?;
    }
    Ok(())
}

async fn timed_qa_context(state: &RagState, query: &str) -> RagResult<Option<String>> {
    match tokio::time::timeout(RETRIEVAL_TIMEOUT, crate::search::qa_retrieve(state, query)).await {
        Ok(inner) => inner,
        Err(_) => Err(RagError::LocalRecoverable("qa retrieval timed out".to_string())),
    }
}

async fn timed_chunk_context(state: &RagState, query: &str, budget_tokens: usize) -> RagResult<Option<String>> {
    match tokio::time::timeout(RETRIEVAL_TIMEOUT, crate::search::chunk_retrieve(state, query, budget_tokens)).await {
        Ok(inner) => inner,
        Err(_) => Err(RagError::LocalRecoverable("chunk retrieval timed out".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(content: &str, ts: i64) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.to_string(),
            is_rag_context: true,
            rag_timestamp: Some(ts),
        }
    }

    #[test]
    fn rolling_budget_evicts_oldest_first() {
        let mut transcript = ChatTranscript::new(vec![
            tagged(&"a".repeat(4000), 1),
            tagged(&"b".repeat(4000), 2),
            ChatMessage::user("hello"),
        ]);

        manage_rolling_budget(&mut transcript, 1500).unwrap();

        assert_eq!(transcript.messages.len(), 2);
        assert!(transcript.messages[0].content.starts_with('b'));
    }

    #[test]
    fn rolling_budget_errors_on_read_only_transcript() {
        let mut transcript = ChatTranscript::new(vec![ChatMessage::user("hi")]);
        transcript.read_only = true;
        assert!(manage_rolling_budget(&mut transcript, 1000).is_err());
    }

    #[test]
    fn insert_fails_fast_under_three_chars() {
        let mut transcript = ChatTranscript::new(vec![ChatMessage::user("hi")]);
        assert!(insert_before_last_user(&mut transcript, "context".to_string()).is_err());
    }

    #[test]
    fn insert_fails_without_user_message() {
        let mut transcript = ChatTranscript::new(vec![ChatMessage {
            role: "system".to_string(),
            content: "just a system prompt".to_string(),
            is_rag_context: false,
            rag_timestamp: None,
        }]);
        assert!(insert_before_last_user(&mut transcript, "context".to_string()).is_err());
    }

    #[test]
    fn insert_places_message_immediately_before_last_user() {
        let mut transcript = ChatTranscript::new(vec![
            ChatMessage::user("first question that is long enough"),
            ChatMessage {
                role: "assistant".to_string(),
                content: "an answer".to_string(),
                is_rag_context: false,
                rag_timestamp: None,
            },
            ChatMessage::user("second question that is long enough"),
        ]);

        insert_before_last_user(&mut transcript, "retrieved context".to_string()).unwrap();

        assert_eq!(transcript.messages.len(), 4);
        assert!(transcript.messages[2].is_rag_context);
        assert_eq!(transcript.messages[3].role, "user");
    }
}
