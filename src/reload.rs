//! Hot reload: pick up an index rebuilt by a separate `ragctl sync`
//! process without restarting the server. Two triggers share one
//! routine — a SIGUSR1-equivalent signal for an immediate nudge, and a
//! periodic mtime poll as a fallback for deployments that can't send
//! the signal.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::RagResult;
use crate::qa::QaIndex;
use crate::state::RagState;
use crate::store::{self, StorePaths};

/// Spawn the background signal listener and poll loop. Returns
/// immediately; both tasks run until the process exits.
pub fn spawn(state: Arc<RagState>) {
    let signal_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = listen_for_signal(signal_state).await {
            warn!(error = %err, "reload signal listener exited");
        }
    });

    let poll_state = state;
    tokio::spawn(async move {
        poll_loop(poll_state).await;
    });
}

#[cfg(unix)]
async fn listen_for_signal(state: Arc<RagState>) -> RagResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stream = signal(SignalKind::user_defined1())?;
    loop {
        stream.recv().await;
        info!("reload signal received");
        state.request_reload();
        if let Err(err) = check_and_reload(&state).await {
            warn!(error = %err, "reload after signal failed");
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signal(_state: Arc<RagState>) -> RagResult<()> {
    // No SIGUSR1 equivalent off Unix; the mtime poll loop is the only
    // trigger on these platforms.
    std::future::pending().await
}

async fn poll_loop(state: Arc<RagState>) {
    let interval_secs = state.config.reload.poll_interval_secs.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let paths = StorePaths::new(&state.config.store.root);
        let current_mtime = match store::ann_mtime(&paths) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if current_mtime != state.last_db_modified.load(Ordering::SeqCst) {
            state.request_reload();
        }

        if let Err(err) = check_and_reload(&state).await {
            warn!(error = %err, "mtime-triggered reload failed");
        }
    }
}

/// Double-checked-locking reload: a cheap flag check, then (only if set)
/// the actual reload under `reload_lock`, re-checking the flag once
/// inside in case a concurrent caller already handled it.
pub async fn check_and_reload(state: &RagState) -> RagResult<()> {
    if !state.reload_requested.load(Ordering::SeqCst) {
        return Ok(());
    }

    let _guard = state.reload_lock.lock().await;
    if !state.reload_requested.load(Ordering::SeqCst) {
        return Ok(());
    }

    let paths = StorePaths::new(&state.config.store.root);
    let new_mtime = store::ann_mtime(&paths)?;

    let new_live = store::load_index_bundle(&paths, state.config.embedding.dims, state.config.retrieval.ef_construction)?;
    let new_qa = load_qa_index(&paths)?;

    {
        let _swap_guard = state.swap_lock.lock().await;
        state.live.store(Arc::new(new_live));
        state.qa_index.store(Arc::new(new_qa));
    }

    state.last_db_modified.store(new_mtime, Ordering::SeqCst);
    state.reload_requested.store(false, Ordering::SeqCst);
    info!("index reloaded");
    Ok(())
}

fn load_qa_index(paths: &StorePaths) -> RagResult<Option<QaIndex>> {
    let path = paths.qa_embeddings();
    if !path.exists() {
        return Ok(None);
    }
    let pairs: Vec<crate::models::QaPair> = bincode::deserialize(&std::fs::read(&path)?)?;
    Ok(Some(QaIndex::new(pairs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddingCache;
    use crate::config::Config;
    use crate::embedding::EmbeddingClient;
    use crate::state::LiveIndices;

    fn test_config(root: &std::path::Path) -> Config {
        let toml_str = format!(
            "[store]\nroot = \"{}\"\n[docs]\nroot = \"{}\"\n",
            root.display(),
            root.display()
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[tokio::test]
    async fn check_and_reload_is_noop_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let embedding = EmbeddingClient::new(config.embedding.clone()).unwrap();
        let cache = EmbeddingCache::load_or_create(&dir.path().join("embeddings_cache.bin"), 50, 300);
        let live = LiveIndices::empty(config.embedding.dims);
        let state = RagState::new(config, embedding, None, cache, live, None, true, 0);

        check_and_reload(&state).await.unwrap();
        assert!(!state.reload_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn check_and_reload_picks_up_saved_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let paths = StorePaths::new(dir.path());

        let mut live = LiveIndices::empty(2);
        let id = uuid::Uuid::new_v4();
        live.vector_index.add(id, vec![1.0, 0.0]).unwrap();
        live.vector_index.build(64);
        live.chunk_metadata.insert(
            id,
            crate::models::ChunkRecord {
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
        store::save_index_bundle(&paths, &live).unwrap();

        let embedding = EmbeddingClient::new(config.embedding.clone()).unwrap();
        let cache = EmbeddingCache::load_or_create(&dir.path().join("embeddings_cache.bin"), 50, 300);
        let empty_live = LiveIndices::empty(2);
        let state = RagState::new(config, embedding, None, cache, empty_live, None, true, 0);

        state.request_reload();
        check_and_reload(&state).await.unwrap();

        let loaded = state.live.load();
        assert_eq!(loaded.vector_index.len(), 1);
    }
}
