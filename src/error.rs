//! The retrieval core's error taxonomy.
//!
//! Query-path code never lets an error escape into the voice agent's turn
//! loop: every `RagError` the orchestrator produces is logged and converted
//! to "no RAG context this turn" rather than propagated. Ingestion and
//! Q&A-generation code propagates `RagError` normally via `?` and
//! accumulates failures into a report instead of aborting a whole run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding or LLM service is temporarily unreachable or returned
    /// a 5xx/connection error. Safe to retry.
    #[error("upstream service unavailable: {0}")]
    TransientUpstream(String),

    /// The embedding service rejected the input as too large even after
    /// the shrink-retry loop.
    #[error("input too large for embedding service: {0}")]
    InputTooLarge(String),

    /// The embedding or LLM service returned HTTP 429.
    #[error("rate limited by upstream service: {0}")]
    RateLimited(String),

    /// A response could not be parsed into the expected shape, or a
    /// returned vector had the wrong dimensionality.
    #[error("invalid data from upstream: {0}")]
    InvalidData(String),

    /// An on-disk artifact failed its integrity check after load (e.g. the
    /// uuid map length does not match the vector index's item count).
    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    /// A local, recoverable condition: a chunk failed validation, a file
    /// failed to extract, a single Q&A pair failed to parse. The caller
    /// should skip the offending item and continue.
    #[error("local recoverable error: {0}")]
    LocalRecoverable(String),

    /// A condition serious enough that the operation must stop and report
    /// failure rather than silently degrade — e.g. an attempt to evict
    /// rolling-budget context from a read-only transcript.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type RagResult<T> = Result<T, RagError>;
