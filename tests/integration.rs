//! End-to-end tests driving the `ragctl` binary against a temp docs folder
//! and a mock embedding/LLM service pair.

mod common;

use common::{run_ragctl, write_config, MockServer};
use std::fs;
use tempfile::TempDir;

const DIMS: usize = 64;

fn setup() -> (TempDir, std::path::PathBuf, MockServer, MockServer) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("docs")).unwrap();

    fs::write(
        root.join("docs").join("alpha.md"),
        "# Alpha\n\nAlpha document about Rust programming and cargo crates.\n",
    )
    .unwrap();
    fs::write(
        root.join("docs").join("beta.md"),
        "# Beta\n\nBeta document about Python machine learning frameworks.\n",
    )
    .unwrap();

    let embedding_server = MockServer::start_embedding(DIMS);
    let llm_server = MockServer::start_llm();
    let config_path = write_config(&root, &embedding_server.url("/embedding"), &llm_server.url("/v1/chat/completions"), DIMS);

    (tmp, config_path, embedding_server, llm_server)
}

#[test]
fn init_creates_empty_index() {
    let (_tmp, config_path, _e, _l) = setup();
    let (stdout, stderr, success) = run_ragctl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout} stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path, _e, _l) = setup();
    let (_, _, first) = run_ragctl(&config_path, &["init"]);
    assert!(first);
    let (stdout, _, second) = run_ragctl(&config_path, &["init"]);
    assert!(second);
    assert!(stdout.contains("already present"));
}

#[test]
fn sync_ingests_every_discovered_file() {
    let (_tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragctl(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={stdout} stderr={stderr}");
    assert!(stdout.contains("processed 2 files"), "got: {}", stdout);
}

#[test]
fn sync_skips_unchanged_files_on_rerun() {
    let (_tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    run_ragctl(&config_path, &["sync"]);

    let (stdout, _, success) = run_ragctl(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("processed 0 files"), "expected nothing reprocessed, got: {}", stdout);
}

#[test]
fn sync_reprocesses_only_the_modified_file() {
    let (tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    run_ragctl(&config_path, &["sync"]);

    std::thread::sleep(std::time::Duration::from_secs(1));
    fs::write(
        tmp.path().join("docs").join("alpha.md"),
        "# Alpha Updated\n\nEntirely rewritten content about something else.\n",
    )
    .unwrap();

    let (stdout, _, success) = run_ragctl(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("processed 1 files"), "expected only alpha.md reprocessed, got: {}", stdout);
}

#[test]
fn search_chunk_mode_cites_the_relevant_document() {
    let (_tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    run_ragctl(&config_path, &["sync"]);

    let (stdout, stderr, success) = run_ragctl(&config_path, &["search", "Rust programming cargo crates", "--mode", "chunk"]);
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("alpha.md"), "expected alpha.md cited, got: {}", stdout);
}

#[test]
fn search_rejects_unknown_mode() {
    let (_tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    let (_, stderr, success) = run_ragctl(&config_path, &["search", "anything", "--mode", "bogus"]);
    assert!(!success);
    assert!(stderr.contains("mode must be one of"));
}

#[test]
fn health_reports_embedding_service_reachable_after_sync() {
    let (_tmp, config_path, _e, _l) = setup();
    run_ragctl(&config_path, &["init"]);
    run_ragctl(&config_path, &["sync"]);

    let (stdout, stderr, success) = run_ragctl(&config_path, &["health"]);
    assert!(success, "health failed: stdout={stdout} stderr={stderr}");
    assert!(stdout.contains("\"embedding_service\""));
    assert!(stdout.contains("\"Pass\""));
}
