//! Atomic multi-file persistence for every on-disk artifact this crate
//! owns: the vector index + its uuid map, the chunk metadata store, the
//! BM25 index, document summaries, file history, extracted document
//! texts, and the append-only ingestion report.
//!
//! Every write goes through temp-file-then-rename. The four index
//! artifacts that together form one "live index snapshot" (`vdb_data`,
//! `vdb_data.map`, `metadata.bin`, `bm25_index.bin`) are written as temp
//! files first and renamed as a tight group inside the caller's swap
//! lock, so a reader never observes a half-updated set: it sees either
//! every old file or every new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::error::RagResult;
use crate::models::{ChunkRecord, DocumentSummary, FileHistoryEntry};
use crate::state::LiveIndices;
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vectors(&self) -> PathBuf {
        self.root.join("vdb_data")
    }

    pub fn vector_map(&self) -> PathBuf {
        self.root.join("vdb_data.map")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata.bin")
    }

    pub fn bm25(&self) -> PathBuf {
        self.root.join("bm25_index.bin")
    }

    pub fn embeddings_cache(&self) -> PathBuf {
        self.root.join("embeddings_cache.bin")
    }

    pub fn document_summaries(&self) -> PathBuf {
        self.root.join("document_summaries.bin")
    }

    pub fn file_history(&self) -> PathBuf {
        self.root.join("file_history.bin")
    }

    pub fn document_texts_dir(&self) -> PathBuf {
        self.root.join("document_texts")
    }

    pub fn ingestion_report(&self) -> PathBuf {
        self.root.join(".ingestion_report.json")
    }

    pub fn qa_embeddings(&self) -> PathBuf {
        self.root.join("qa_db").join("qa_embeddings.bin")
    }

    pub fn qa_dev_outputs_dir(&self) -> PathBuf {
        self.root.join("qa_db").join("dev_outputs")
    }

    pub fn document_text_path(&self, filename: &str) -> PathBuf {
        self.document_texts_dir().join(safe_filename(filename))
    }
}

/// Replace path separators and other filesystem-hostile characters so a
/// document filename (which may itself contain subdirectory components)
/// can be used as a single flat filename under `document_texts/`.
pub fn safe_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write `bytes` to `path` via temp-file-then-rename. The temp file lives
/// alongside `path` so the rename is same-filesystem and atomic.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> RagResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!("{}.tmp", file_name))
}

/// Remove any `*.tmp` files left behind by a save cycle that crashed
/// before its rename completed. Called once before a new save cycle
/// begins.
pub fn clean_stray_tmp_files(root: &Path) -> RagResult<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

pub fn save_document_text(paths: &StorePaths, filename: &str, text: &str) -> RagResult<()> {
    write_atomic(&paths.document_text_path(filename), text.as_bytes())
}

pub fn load_document_text(paths: &StorePaths, filename: &str) -> RagResult<String> {
    Ok(std::fs::read_to_string(paths.document_text_path(filename))?)
}

/// Persist the four index artifacts that make up one `LiveIndices`
/// snapshot, plus the file-history and summary sidecars, as one atomic
/// group: every write lands in a temp file first, then every rename
/// happens back-to-back. A reader using the old files concurrently with
/// this call either still sees the complete old set or, the instant
/// after the last rename, the complete new set.
///
/// The ANN vectors file's mtime is explicitly bumped afterward (even if
/// its content is byte-identical to the previous save) so the
/// hot-reload mtime-poll fallback always observes a change after a swap.
pub fn save_index_bundle(paths: &StorePaths, live: &LiveIndices) -> RagResult<()> {
    clean_stray_tmp_files(paths.root())?;

    let vectors_tmp = tmp_path_for(&paths.vectors());
    let map_tmp = tmp_path_for(&paths.vector_map());
    live.vector_index.write_temp(&vectors_tmp, &map_tmp)?;

    let metadata_bytes = bincode::serialize(&live.chunk_metadata)?;
    let metadata_tmp = tmp_path_for(&paths.metadata());
    std::fs::write(&metadata_tmp, &metadata_bytes)?;

    let bm25_bytes = bincode::serialize(&live.bm25_index)?;
    let bm25_tmp = tmp_path_for(&paths.bm25());
    std::fs::write(&bm25_tmp, &bm25_bytes)?;

    let summaries_bytes = bincode::serialize(&live.doc_summaries)?;
    let summaries_tmp = tmp_path_for(&paths.document_summaries());
    std::fs::write(&summaries_tmp, &summaries_bytes)?;

    let history_bytes = bincode::serialize(&live.file_history)?;
    let history_tmp = tmp_path_for(&paths.file_history());
    std::fs::write(&history_tmp, &history_bytes)?;

    // Renames happen back-to-back: nothing between them can observe a
    // partially-renamed set.
    std::fs::rename(&vectors_tmp, paths.vectors())?;
    std::fs::rename(&map_tmp, paths.vector_map())?;
    std::fs::rename(&metadata_tmp, paths.metadata())?;
    std::fs::rename(&bm25_tmp, paths.bm25())?;
    std::fs::rename(&summaries_tmp, paths.document_summaries())?;
    std::fs::rename(&history_tmp, paths.file_history())?;

    bump_mtime(&paths.vectors())?;
    Ok(())
}

fn bump_mtime(path: &Path) -> RagResult<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(std::time::SystemTime::now())?;
    Ok(())
}

pub fn index_files_present(paths: &StorePaths) -> bool {
    paths.vectors().exists() && paths.vector_map().exists() && paths.metadata().exists()
}

pub fn ann_mtime(paths: &StorePaths) -> RagResult<i64> {
    let meta = std::fs::metadata(paths.vectors())?;
    let modified = meta.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Load a full `LiveIndices` snapshot from disk. The BM25 index and
/// document-summary/file-history sidecars are optional (a fresh database
/// may not have them yet); only the vector index + uuid map + metadata
/// store are required.
pub fn load_index_bundle(paths: &StorePaths, dims: usize, ef_construction: usize) -> RagResult<LiveIndices> {
    let vector_index = VectorIndex::load(&paths.vectors(), &paths.vector_map(), dims, ef_construction)?;

    let chunk_metadata: HashMap<Uuid, ChunkRecord> = bincode::deserialize(&std::fs::read(paths.metadata())?)?;

    let bm25_index: Bm25Index = match std::fs::read(paths.bm25()) {
        Ok(bytes) => bincode::deserialize(&bytes)?,
        Err(_) => Bm25Index::new(),
    };

    let doc_summaries: HashMap<String, DocumentSummary> = match std::fs::read(paths.document_summaries()) {
        Ok(bytes) => bincode::deserialize(&bytes)?,
        Err(_) => HashMap::new(),
    };

    let file_history: HashMap<String, FileHistoryEntry> = match std::fs::read(paths.file_history()) {
        Ok(bytes) => bincode::deserialize(&bytes)?,
        Err(_) => HashMap::new(),
    };

    let live = LiveIndices {
        vector_index,
        chunk_metadata,
        bm25_index,
        doc_summaries,
        file_history,
    };
    live.verify_consistency()?;
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_replaces_path_separators() {
        assert_eq!(safe_filename("a/b/c.txt"), "a_b_c.txt");
    }

    #[test]
    fn write_atomic_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn clean_stray_tmp_files_removes_leftover_tmp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leftover.bin.tmp"), b"stale").unwrap();
        std::fs::write(dir.path().join("keep.bin"), b"keep").unwrap();
        clean_stray_tmp_files(dir.path()).unwrap();
        assert!(!dir.path().join("leftover.bin.tmp").exists());
        assert!(dir.path().join("keep.bin").exists());
    }

    #[test]
    fn save_and_load_index_bundle_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());

        let mut live = LiveIndices::empty(2);
        let id = Uuid::new_v4();
        live.vector_index.add(id, vec![1.0, 0.0]).unwrap();
        live.vector_index.build(64);
        live.chunk_metadata.insert(
            id,
            ChunkRecord {
                chunk: crate::models::Chunk {
                    id,
                    filename: "doc.txt".into(),
                    chunk_index: 0,
                    char_start: 0,
                    char_end: 5,
                    estimated_tokens: 1,
                    text: "hello".into(),
                    chunk_type: crate::models::ChunkType::Normal,
                },
                embedding_fingerprint: "fp".into(),
            },
        );

        save_index_bundle(&paths, &live).unwrap();
        assert!(index_files_present(&paths));

        let loaded = load_index_bundle(&paths, 2, 64).unwrap();
        assert_eq!(loaded.vector_index.len(), 1);
        assert!(loaded.chunk_metadata.contains_key(&id));
    }
}
