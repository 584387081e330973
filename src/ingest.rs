//! Incremental document ingestion: discover the docs folder, detect
//! changed files by size+mtime+hash, re-chunk and re-embed only what
//! changed, and atomically swap the result into the live index.
//!
//! Unchanged files are carried forward into the new snapshot without
//! re-embedding, via `VectorIndex::copy_forward` and a rebuilt (but
//! re-populated from the same text, so effectively free) BM25 index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::cache_key;
use crate::chunk::{chunk_text, clean_for_embedding, deduplicate, is_valid_chunk};
use crate::error::{RagError, RagResult};
use crate::extract::{self, MIME_DOCX, MIME_PDF};
use crate::models::{Chunk, ChunkRecord, ChunkType, FileHistoryEntry, IngestionReportEntry};
use crate::state::{LiveIndices, RagState};
use crate::store::{self, StorePaths};
use crate::summary::{generate_summary, needs_regeneration};

/// Near-duplicate chunk rejection threshold for incremental ingest. Kept
/// distinct from the Q&A dedup threshold since the two pipelines compare
/// different kinds of text (raw chunk text vs. generated questions).
const CHUNK_DEDUP_THRESHOLD: f32 = 0.97;

struct DiscoveredFile {
    filename: String,
    path: std::path::PathBuf,
    size: u64,
    mtime: i64,
    hash: String,
}

fn build_globset(patterns: &[String]) -> RagResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| RagError::InvalidData(e.to_string()))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| RagError::InvalidData(e.to_string()))
}

fn hash_file(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Walk the docs folder, returning every file matching `include_globs`
/// and not matching `exclude_globs`, with its change-detection fields
/// already computed.
fn discover_files(state: &RagState) -> RagResult<Vec<DiscoveredFile>> {
    let include = build_globset(&state.config.docs.include_globs)?;
    let exclude = build_globset(&state.config.docs.exclude_globs)?;

    let mut found = Vec::new();
    for entry in WalkDir::new(&state.config.docs.root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&state.config.docs.root).unwrap_or(entry.path());
        if !include.is_match(relative) || exclude.is_match(relative) {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| RagError::LocalRecoverable(e.to_string()))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let bytes = std::fs::read(entry.path()).map_err(|e| RagError::LocalRecoverable(e.to_string()))?;
        found.push(DiscoveredFile {
            filename: relative.to_string_lossy().to_string(),
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            mtime,
            hash: hash_file(&bytes),
        });
    }

    Ok(found)
}

fn has_changed(discovered: &DiscoveredFile, history: &HashMap<String, FileHistoryEntry>) -> bool {
    match history.get(&discovered.filename) {
        Some(entry) => entry.size != discovered.size || entry.mtime != discovered.mtime || entry.hash != discovered.hash,
        None => true,
    }
}

fn content_type_for(path: &std::path::Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "pdf" => Some(MIME_PDF),
        Some(ext) if ext == "docx" => Some(MIME_DOCX),
        _ => None,
    }
}

struct ProcessedFile {
    filename: String,
    history: FileHistoryEntry,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
    summary: Option<crate::models::DocumentSummary>,
    chunks_failed: u32,
}

async fn process_file(state: &RagState, file: &DiscoveredFile) -> RagResult<ProcessedFile> {
    let text = if let Some(content_type) = content_type_for(&file.path) {
        let bytes = std::fs::read(&file.path)?;
        extract::extract_text(&bytes, content_type).map_err(|e| RagError::LocalRecoverable(e.to_string()))?.text
    } else {
        std::fs::read_to_string(&file.path)?
    };

    let paths = StorePaths::new(&state.config.store.root);
    store::save_document_text(&paths, &file.filename, &text)?;
    state.doc_text_cache.invalidate(&file.filename).await;

    let summary = if let Some(llm) = &state.llm {
        let existing = {
            let live = state.live.load();
            live.doc_summaries.get(&file.filename).cloned()
        };
        if needs_regeneration(existing.as_ref(), &file.hash) {
            generate_summary(llm.as_ref(), &file.filename, &text, &file.hash).await.ok()
        } else {
            existing
        }
    } else {
        None
    };

    let raw_chunks = chunk_text(&file.filename, &text, state.config.chunking.max_tokens, state.config.chunking.overlap_fraction);
    let valid_chunks: Vec<Chunk> = raw_chunks.into_iter().filter(|c| is_valid_chunk(&c.text)).collect();

    let mut embeddings = Vec::with_capacity(valid_chunks.len());
    let mut chunks_failed = 0u32;
    let mut embedded_chunks = Vec::with_capacity(valid_chunks.len());

    for chunk in valid_chunks {
        let cleaned = clean_for_embedding(&chunk.text);

        let cached = {
            let cache = state.cache.lock().await;
            cache.get(&cleaned).cloned()
        };

        let embedding = match cached {
            Some(v) => v,
            None => {
                let _permit = state.ingest_embed_semaphore.acquire().await.expect("semaphore not closed");
                match state.embedding.embed(&cleaned).await {
                    Ok(v) => {
                        let mut cache = state.cache.lock().await;
                        cache.insert(&cleaned, v.clone());
                        v
                    }
                    Err(_) => {
                        chunks_failed += 1;
                        continue;
                    }
                }
            }
        };

        embedded_chunks.push(chunk);
        embeddings.push(embedding);
    }

    let kept: Vec<Chunk> = deduplicate(&embedded_chunks, &embeddings, CHUNK_DEDUP_THRESHOLD)
        .into_iter()
        .cloned()
        .collect();
    let kept_embeddings: Vec<Vec<f32>> = kept
        .iter()
        .map(|c| {
            let idx = embedded_chunks.iter().position(|ec| ec.id == c.id).unwrap();
            embeddings[idx].clone()
        })
        .collect();

    Ok(ProcessedFile {
        filename: file.filename.clone(),
        history: FileHistoryEntry {
            filename: file.filename.clone(),
            size: file.size,
            mtime: file.mtime,
            hash: file.hash.clone(),
        },
        chunks: kept,
        embeddings: kept_embeddings,
        summary,
        chunks_failed,
    })
}

/// Run one full incremental sync: discover, diff, process changed files,
/// and atomically swap the rebuilt index into `state`. Returns the
/// ingestion report entry for this run.
pub async fn run_sync(state: &RagState) -> RagResult<IngestionReportEntry> {
    let paths = StorePaths::new(&state.config.store.root);
    store::clean_stray_tmp_files(paths.root())?;

    let started_at = Utc::now();
    let mut report = IngestionReportEntry::new(started_at);

    let discovered = discover_files(state)?;
    let discovered_names: HashSet<String> = discovered.iter().map(|f| f.filename.clone()).collect();

    let live = state.live.load();
    let changed: Vec<&DiscoveredFile> = discovered.iter().filter(|f| has_changed(f, &live.file_history)).collect();
    let unaffected_filenames: HashSet<String> = discovered_names
        .iter()
        .filter(|name| !changed.iter().any(|f| &f.filename == *name))
        .cloned()
        .collect();

    let keep_ids: HashSet<Uuid> = live
        .chunk_metadata
        .iter()
        .filter(|(_, record)| unaffected_filenames.contains(&record.chunk.filename))
        .map(|(&id, _)| id)
        .collect();

    let mut staging = LiveIndices::empty(state.config.embedding.dims);
    staging.vector_index.copy_forward(&live.vector_index, &keep_ids);

    for (&id, record) in live.chunk_metadata.iter() {
        if keep_ids.contains(&id) {
            staging.chunk_metadata.insert(id, record.clone());
            staging.bm25_index.add(id, &record.chunk.text);
        }
    }
    for (filename, summary) in live.file_history.iter().filter(|(name, _)| unaffected_filenames.contains(*name)).map(|(name, _)| {
        (name.clone(), live.doc_summaries.get(name).cloned())
    }) {
        if let Some(summary) = summary {
            staging.doc_summaries.insert(filename.clone(), summary);
        }
        staging.file_history.insert(filename.clone(), live.file_history.get(&filename).unwrap().clone());
    }

    drop(live);

    for file in &changed {
        match process_file(state, file).await {
            Ok(processed) => {
                if let Some(summary) = processed.summary {
                    staging.doc_summaries.insert(processed.filename.clone(), summary.clone());
                    let summary_chunk = Chunk {
                        id: Uuid::new_v4(),
                        filename: processed.filename.clone(),
                        chunk_index: -1,
                        char_start: 0,
                        char_end: summary.summary.len(),
                        estimated_tokens: crate::token_budget::count_tokens(&summary.summary),
                        text: summary.summary.clone(),
                        chunk_type: ChunkType::Summary,
                    };
                    let summary_embedding = {
                        let _permit = state.ingest_embed_semaphore.acquire().await.expect("semaphore not closed");
                        state.embedding.embed(&summary_chunk.text).await
                    };
                    if let Ok(embedding) = summary_embedding {
                        let id = summary_chunk.id;
                        staging.vector_index.add(id, embedding).ok();
                        staging.bm25_index.add(id, &summary_chunk.text);
                        staging.chunk_metadata.insert(
                            id,
                            ChunkRecord { chunk: summary_chunk, embedding_fingerprint: cache_key(&summary.summary) },
                        );
                    }
                }

                let chunks_processed = processed.chunks.len() as u32;
                for (chunk, embedding) in processed.chunks.into_iter().zip(processed.embeddings.into_iter()) {
                    let fingerprint = cache_key(&clean_for_embedding(&chunk.text));
                    if staging.vector_index.add(chunk.id, embedding).is_ok() {
                        staging.bm25_index.add(chunk.id, &chunk.text);
                        staging.chunk_metadata.insert(chunk.id, ChunkRecord { chunk, embedding_fingerprint: fingerprint });
                    }
                }

                report.chunks_processed += chunks_processed;
                report.chunks_failed += processed.chunks_failed;
                staging.file_history.insert(processed.filename.clone(), processed.history);

                if chunks_processed > processed.chunks_failed {
                    report.files_processed += 1;
                } else {
                    report.files_failed += 1;
                    report.errors.push(format!("{}: more chunks failed than succeeded", processed.filename));
                }
            }
            Err(err) => {
                report.files_failed += 1;
                report.errors.push(format!("{}: {}", file.filename, err));
            }
        }

        report.finished_at = Utc::now();
        persist_report(&paths, &report)?;
    }

    let removed: Vec<String> = {
        let live = state.live.load();
        live.file_history.keys().filter(|f| !discovered_names.contains(*f)).cloned().collect()
    };
    for filename in &removed {
        staging.file_history.remove(filename);
        staging.doc_summaries.remove(filename);
    }
    report.files_skipped = discovered.len() as u32 - changed.len() as u32;

    staging.vector_index.build(state.config.retrieval.ef_construction);
    staging.verify_consistency()?;

    {
        let _swap_guard = state.swap_lock.lock().await;
        store::save_index_bundle(&paths, &staging)?;
        state.live.store(Arc::new(staging));
    }

    {
        let mut cache = state.cache.lock().await;
        cache.flush()?;
    }

    state.last_db_modified.store(store::ann_mtime(&paths)?, Ordering::SeqCst);

    report.finished_at = Utc::now();
    persist_report(&paths, &report)?;
    Ok(report)
}

fn persist_report(paths: &StorePaths, report: &IngestionReportEntry) -> RagResult<()> {
    let bytes = serde_json::to_vec_pretty(report)?;
    store::write_atomic(&paths.ingestion_report(), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_changed_detects_new_file() {
        let history = HashMap::new();
        let discovered = DiscoveredFile {
            filename: "a.txt".into(),
            path: "a.txt".into(),
            size: 10,
            mtime: 100,
            hash: "abc".into(),
        };
        assert!(has_changed(&discovered, &history));
    }

    #[test]
    fn has_changed_false_when_fields_match() {
        let mut history = HashMap::new();
        history.insert(
            "a.txt".to_string(),
            FileHistoryEntry { filename: "a.txt".into(), size: 10, mtime: 100, hash: "abc".into() },
        );
        let discovered = DiscoveredFile {
            filename: "a.txt".into(),
            path: "a.txt".into(),
            size: 10,
            mtime: 100,
            hash: "abc".into(),
        };
        assert!(!has_changed(&discovered, &history));
    }

    #[test]
    fn has_changed_true_when_hash_differs() {
        let mut history = HashMap::new();
        history.insert(
            "a.txt".to_string(),
            FileHistoryEntry { filename: "a.txt".into(), size: 10, mtime: 100, hash: "abc".into() },
        );
        let discovered = DiscoveredFile {
            filename: "a.txt".into(),
            path: "a.txt".into(),
            size: 10,
            mtime: 100,
            hash: "def".into(),
        };
        assert!(has_changed(&discovered, &history));
    }

    #[test]
    fn content_type_detects_pdf_and_docx() {
        assert_eq!(content_type_for(std::path::Path::new("a.pdf")), Some(MIME_PDF));
        assert_eq!(content_type_for(std::path::Path::new("a.docx")), Some(MIME_DOCX));
        assert_eq!(content_type_for(std::path::Path::new("a.txt")), None);
    }
}
