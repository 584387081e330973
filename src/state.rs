//! Process-owned global state: the live index snapshot, the embedding
//! cache, concurrency primitives, and the document-text LRU.
//!
//! Everything here is constructed once per OS process at startup and
//! never touched by a `fork()` mid-run — see `DESIGN.md`'s open-question
//! record for why this crate does not attempt the reference's
//! runtime-PID-revalidation dance. A multi-worker deployment is multiple
//! independent `RagState`s in independent processes, each with its own
//! `tokio` runtime, HTTP client, and pair of embedding semaphores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{RagError, RagResult};
use crate::llm::LlmClient;
use crate::models::{ChunkRecord, DocumentSummary, FileHistoryEntry};
use crate::qa::QaIndex;
use crate::vector_index::VectorIndex;

/// A single atomically-swappable snapshot of every in-memory index. The
/// query path borrows an `Arc<LiveIndices>` for the duration of one query;
/// ingestion builds a fresh one and swaps the `ArcSwap` pointer.
pub struct LiveIndices {
    pub vector_index: VectorIndex,
    pub chunk_metadata: HashMap<Uuid, ChunkRecord>,
    pub bm25_index: Bm25Index,
    pub doc_summaries: HashMap<String, DocumentSummary>,
    pub file_history: HashMap<String, FileHistoryEntry>,
}

impl LiveIndices {
    pub fn empty(dims: usize) -> Self {
        Self {
            vector_index: VectorIndex::new(dims),
            chunk_metadata: HashMap::new(),
            bm25_index: Bm25Index::new(),
            doc_summaries: HashMap::new(),
            file_history: HashMap::new(),
        }
    }

    /// The index-consistency invariant (§8 property 2): every uuid the
    /// vector index holds must be present in the metadata store.
    pub fn verify_consistency(&self) -> RagResult<()> {
        for id in self.vector_index.ids() {
            if !self.chunk_metadata.contains_key(&id) {
                return Err(RagError::IntegrityFailure(format!(
                    "chunk {} present in vector index but missing from metadata store",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// A small LRU cache of lazily-loaded document full texts, keyed by
/// filename. Backs context expansion (§4.5), which needs the source
/// document's full text to expand a chunk's character offsets.
pub struct DocTextCache {
    capacity: usize,
    inner: Mutex<DocTextCacheInner>,
}

struct DocTextCacheInner {
    order: Vec<String>,
    entries: HashMap<String, Arc<String>>,
}

impl DocTextCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(DocTextCacheInner {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Fetch the full text for `filename`, loading it from
    /// `document_texts/<safe filename>` via `loader` on a cache miss.
    pub async fn get_or_load<F>(&self, filename: &str, loader: F) -> RagResult<Arc<String>>
    where
        F: FnOnce() -> RagResult<String>,
    {
        let mut guard = self.inner.lock().await;
        if let Some(text) = guard.entries.get(filename) {
            let text = text.clone();
            guard.touch(filename);
            return Ok(text);
        }

        let text = Arc::new(loader()?);
        guard.insert(filename.to_string(), text.clone(), self.capacity);
        Ok(text)
    }

    pub async fn invalidate(&self, filename: &str) {
        let mut guard = self.inner.lock().await;
        guard.entries.remove(filename);
        guard.order.retain(|f| f != filename);
    }
}

impl DocTextCacheInner {
    fn touch(&mut self, filename: &str) {
        self.order.retain(|f| f != filename);
        self.order.push(filename.to_string());
    }

    fn insert(&mut self, filename: String, text: Arc<String>, capacity: usize) {
        self.entries.insert(filename.clone(), text);
        self.order.retain(|f| f != &filename);
        self.order.push(filename);
        while self.order.len() > capacity {
            let evicted = self.order.remove(0);
            self.entries.remove(&evicted);
        }
    }
}

/// The process-wide state a worker constructs once at startup. Every
/// query and every ingest run borrows from here.
pub struct RagState {
    pub config: Config,
    pub embedding: EmbeddingClient,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub cache: Mutex<EmbeddingCache>,
    pub live: ArcSwap<LiveIndices>,
    pub qa_index: ArcSwap<Option<QaIndex>>,
    pub doc_text_cache: DocTextCache,
    /// Ingestion embeddings get exactly one in-flight request at a time,
    /// so a slow embedder never competes with query-path latency.
    pub ingest_embed_semaphore: Semaphore,
    /// Queries get their own independent permit so ingestion traffic can
    /// never starve the voice loop.
    pub query_embed_semaphore: Semaphore,
    pub reload_requested: AtomicBool,
    pub reload_lock: Mutex<()>,
    pub swap_lock: Mutex<()>,
    pub last_db_modified: AtomicI64,
    pub rag_enabled: AtomicBool,
}

impl RagState {
    pub fn new(
        config: Config,
        embedding: EmbeddingClient,
        llm: Option<Arc<dyn LlmClient>>,
        cache: EmbeddingCache,
        live: LiveIndices,
        qa_index: Option<QaIndex>,
        rag_enabled: bool,
        last_db_modified: i64,
    ) -> Self {
        Self {
            embedding,
            llm,
            cache: Mutex::new(cache),
            live: ArcSwap::from_pointee(live),
            qa_index: ArcSwap::from_pointee(qa_index),
            doc_text_cache: DocTextCache::new(32),
            ingest_embed_semaphore: Semaphore::new(1),
            query_embed_semaphore: Semaphore::new(1),
            reload_requested: AtomicBool::new(false),
            reload_lock: Mutex::new(()),
            swap_lock: Mutex::new(()),
            last_db_modified: AtomicI64::new(last_db_modified),
            rag_enabled: AtomicBool::new(rag_enabled),
            config,
        }
    }

    pub fn is_rag_enabled(&self) -> bool {
        self.rag_enabled.load(Ordering::SeqCst)
    }

    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::SeqCst);
    }
}
