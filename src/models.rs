//! Core data model for the retrieval core: documents, chunks, embeddings,
//! Q&A pairs, and the bookkeeping records that track ingestion state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw item produced while scanning the docs folder, before extraction.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub filename: String,
    pub path: std::path::PathBuf,
    pub content_type: String,
    /// Populated for text-native formats (`.md`, `.txt`).
    pub body: Option<String>,
    /// Populated for binary formats (`.pdf`, `.docx`) that need extraction.
    pub raw_bytes: Option<Vec<u8>>,
}

/// One ingested document's identity and change-detection fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileHistoryEntry {
    pub filename: String,
    pub size: u64,
    pub mtime: i64,
    pub hash: String,
}

/// A chunk of extracted document text, ready for embedding and indexing.
///
/// `chunk_index == -1` marks the special per-document summary chunk
/// (see `summary`), which is retrievable independently of its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub filename: String,
    pub chunk_index: i64,
    pub char_start: usize,
    pub char_end: usize,
    pub estimated_tokens: usize,
    pub text: String,
    pub chunk_type: ChunkType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkType {
    Normal,
    Summary,
}

/// Persisted chunk record: the text and metadata the metadata store owns.
/// The vector index owns the embedding itself, keyed by the same `Uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    /// Hash of the cleaned text that was actually embedded, used to detect
    /// whether a cached embedding is still valid for this chunk.
    pub embedding_fingerprint: String,
}

/// A chunk paired with its retrieval score, produced by hybrid search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub combined_score: f32,
}

/// The result of context-expanding a scored chunk: the original chunk plus
/// surrounding text snapped to sentence boundaries.
#[derive(Debug, Clone)]
pub struct ExpandedChunk {
    pub chunk_id: Uuid,
    pub filename: String,
    pub text: String,
    pub score: f32,
}

/// Per-document summary, regenerated whenever the document's content hash
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub summary: String,
    pub extended_summary: String,
    pub keywords: Vec<String>,
    pub extended_keywords: Vec<String>,
    pub generated_at: i64,
    pub source_hash: String,
}

/// A precomputed question/answer pair with its normalized embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub context: String,
    pub source_filename: String,
    pub page: Option<u32>,
    pub embedding: Vec<f32>,
}

/// A single record in the append-only ingestion report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReportEntry {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_processed: u32,
    pub files_failed: u32,
    pub files_skipped: u32,
    pub chunks_processed: u32,
    pub chunks_failed: u32,
    pub errors: Vec<String>,
}

impl IngestionReportEntry {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            files_processed: 0,
            files_failed: 0,
            files_skipped: 0,
            chunks_processed: 0,
            chunks_failed: 0,
            errors: Vec::new(),
        }
    }
}

/// The three retrieval modes the query orchestrator dispatches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RagMode {
    Qa,
    Chunk,
    Both,
}

impl RagMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qa" => Some(Self::Qa),
            "chunk" => Some(Self::Chunk),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}
