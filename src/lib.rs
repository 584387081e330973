//! # ragcore
//!
//! **A retrieval core for a voice-agent backend.**
//!
//! Two independent retrieval paths share one live index snapshot: a
//! chunk-based vector index (hybrid semantic + keyword search with context
//! expansion) and a precomputed Q&A index. Both are swapped in atomically
//! on every ingestion run and hot-reloaded into a running server without a
//! restart.
//!
//! ## Architecture
//!
//! ```text
//! docs/ ──▶ discover+diff ──▶ extract+chunk+embed ──▶ LiveIndices (staged)
//!                                                          │
//!                                            atomic swap (ArcSwap)
//!                                                          │
//!                                                          ▼
//!                                          orchestrator::enrich() / ragctl search
//! ```
//!
//! ## Data Flow
//!
//! 1. [`ingest`] walks the docs folder, detects changed files by
//!    size+mtime+hash, and re-chunks/re-embeds only what changed.
//! 2. [`chunk`] splits extracted text into overlapping chunks; [`extract`]
//!    pulls text out of PDF/DOCX/plain-text sources.
//! 3. [`embedding`] calls the external embedding service; [`cache`] avoids
//!    re-embedding identical text.
//! 4. [`vector_index`] (an ANN index) and [`bm25`] together back
//!    [`hybrid`]'s min-max-normalized weighted merge.
//! 5. [`qagen`] offline-generates Q&A pairs via an LLM, validated and
//!    deduplicated before being persisted for [`qa`]'s index.
//! 6. [`search`] runs either retrieval path at query time; [`orchestrator`]
//!    wraps both behind a rolling token budget for a live chat transcript.
//! 7. [`reload`] picks up a rebuilt index in a running `serve` process;
//!    [`health`] reports on the whole system's condition; [`server`]
//!    exposes both over HTTP.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | The crate's error type and retry-classification |
//! | [`models`] | Core data types: `Chunk`, `QaPair`, `DocumentSummary`, `IngestionReportEntry` |
//! | [`extract`] | PDF/DOCX/plain-text extraction |
//! | [`chunk`] | Token-budget-aware text chunking and embedding-pass cleanup |
//! | [`tts_filter`] | TTS-safe text filtering shared by both retrieval paths |
//! | [`embedding`] | Embedding HTTP client, cosine similarity, L2 normalization |
//! | [`cache`] | Embedding cache keyed by cleaned chunk text |
//! | [`vector_index`] | ANN vector index (angular distance) with a uuid sidecar |
//! | [`bm25`] | Okapi BM25 keyword index |
//! | [`hybrid`] | Min-max score normalization and context expansion |
//! | [`token_budget`] | Character-based token approximation and budget selection |
//! | [`qa`] | The precomputed Q&A index |
//! | [`qagen`] | Offline Q&A generation: split, prompt, validate, dedup |
//! | [`summary`] | Per-document LLM summary generation |
//! | [`llm`] | Abstraction over the external LLM chat-completion collaborator |
//! | [`state`] | Process-owned global state (`RagState`, `LiveIndices`) |
//! | [`store`] | Atomic on-disk persistence for every artifact |
//! | [`ingest`] | Incremental ingestion pipeline orchestration |
//! | [`reload`] | Hot reload via signal and mtime poll |
//! | [`orchestrator`] | Query-time transcript enrichment with rolling budget |
//! | [`health`] | Diagnostic health checks |
//! | [`search`] | Chunk and Q&A retrieval, context formatting |
//! | [`server`] | Status HTTP server (Axum) |
//!
//! ## Configuration
//!
//! This crate is configured via a TOML file (default: `config/rag.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod bm25;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod health;
pub mod hybrid;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod qa;
pub mod qagen;
pub mod reload;
pub mod search;
pub mod server;
pub mod state;
pub mod store;
pub mod summary;
pub mod token_budget;
pub mod tts_filter;
pub mod vector_index;
