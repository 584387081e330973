//! On-disk embedding cache, keyed by a content hash of the cleaned text
//! that was embedded. Flushes to disk when either a count threshold or a
//! time threshold since the last save is exceeded, whichever comes first.
//! Falls back to a `.backup` copy when the primary file is corrupt, and
//! rewrites the backup after every successful load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagResult;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    entries: HashMap<String, Vec<f32>>,
}

pub struct EmbeddingCache {
    path: PathBuf,
    data: CacheData,
    dirty_count: usize,
    last_flush: Instant,
    flush_count_threshold: usize,
    flush_interval: Duration,
}

pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl EmbeddingCache {
    pub fn load_or_create(path: &Path, flush_count_threshold: usize, flush_interval_secs: u64) -> Self {
        let data = Self::load_with_backup_fallback(path).unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            data,
            dirty_count: 0,
            last_flush: Instant::now(),
            flush_count_threshold,
            flush_interval: Duration::from_secs(flush_interval_secs),
        }
    }

    fn load_with_backup_fallback(path: &Path) -> Option<CacheData> {
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(data) = bincode::deserialize::<CacheData>(&bytes) {
                let backup_path = Self::backup_path(path);
                let _ = std::fs::write(&backup_path, &bytes);
                return Some(data);
            }
        }

        let backup_path = Self::backup_path(path);
        if let Ok(bytes) = std::fs::read(&backup_path) {
            if let Ok(data) = bincode::deserialize::<CacheData>(&bytes) {
                return Some(data);
            }
        }

        None
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        let ext = backup
            .extension()
            .map(|e| format!("{}.backup", e.to_string_lossy()))
            .unwrap_or_else(|| "backup".to_string());
        backup.set_extension(ext);
        backup
    }

    pub fn get(&self, text: &str) -> Option<&Vec<f32>> {
        self.data.entries.get(&cache_key(text))
    }

    pub fn insert(&mut self, text: &str, embedding: Vec<f32>) {
        self.data.entries.insert(cache_key(text), embedding);
        self.dirty_count += 1;
    }

    pub fn should_flush(&self) -> bool {
        self.dirty_count >= self.flush_count_threshold
            || (self.dirty_count > 0 && self.last_flush.elapsed() >= self.flush_interval)
    }

    pub fn flush(&mut self) -> RagResult<()> {
        if self.dirty_count == 0 {
            return Ok(());
        }

        let tmp_path = self.path.with_extension("tmp");
        let bytes = bincode::serialize(&self.data)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;

        self.dirty_count = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let mut cache = EmbeddingCache::load_or_create(&path, 10, 300);
        cache.insert("hello", vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get("hello"), Some(&vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn flush_and_reload_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        {
            let mut cache = EmbeddingCache::load_or_create(&path, 10, 300);
            cache.insert("hello", vec![1.0, 2.0]);
            cache.flush().unwrap();
        }
        let cache = EmbeddingCache::load_or_create(&path, 10, 300);
        assert_eq!(cache.get("hello"), Some(&vec![1.0, 2.0]));
    }

    #[test]
    fn should_flush_respects_count_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let mut cache = EmbeddingCache::load_or_create(&path, 2, 3600);
        assert!(!cache.should_flush());
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        assert!(cache.should_flush());
    }

    #[test]
    fn falls_back_to_backup_when_primary_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        {
            let mut cache = EmbeddingCache::load_or_create(&path, 10, 300);
            cache.insert("hello", vec![9.0]);
            cache.flush().unwrap();
        }
        std::fs::write(&path, b"not valid bincode data at all").unwrap();
        let cache = EmbeddingCache::load_or_create(&path, 10, 300);
        assert_eq!(cache.get("hello"), Some(&vec![9.0]));
    }
}
