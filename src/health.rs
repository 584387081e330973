//! Health checks for the retrieval core: embedding-service reachability,
//! on-disk artifact presence, docs-folder readability, in-memory index
//! sanity, and recent ingestion error counts. Grounded in the reference's
//! `RAGHealthChecker`.

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::state::RagState;
use crate::store::StorePaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub component: String,
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn overall_status(&self) -> Status {
        if self.checks.iter().any(|c| c.status == Status::Fail) {
            Status::Fail
        } else if self.checks.iter().any(|c| c.status == Status::Warn) {
            Status::Warn
        } else {
            Status::Pass
        }
    }
}

fn check(component: &str, status: Status, message: impl Into<String>) -> CheckResult {
    CheckResult {
        component: component.to_string(),
        status,
        message: message.into(),
    }
}

/// Run every health check and return the aggregate report. Never fails:
/// a check that cannot determine its own status reports `Fail` or `Warn`
/// rather than returning an error to the caller.
pub async fn run_checks(state: &RagState) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(check_embedding_service(state).await);
    checks.push(check_store_files(state));
    checks.push(check_cache_file(state));
    checks.push(check_docs_folder(state));
    checks.push(check_index_sanity(state));
    checks.push(check_process_memory());

    HealthReport { checks }
}

async fn check_embedding_service(state: &RagState) -> CheckResult {
    match state.embedding.embed("health check probe").await {
        Ok(_) => check("embedding_service", Status::Pass, "reachable"),
        Err(err) => check("embedding_service", Status::Fail, format!("unreachable: {}", err)),
    }
}

fn check_store_files(state: &RagState) -> CheckResult {
    let paths = StorePaths::new(&state.config.store.root);
    if !crate::store::index_files_present(&paths) {
        return check("store_files", Status::Warn, "index not yet built");
    }

    match std::fs::metadata(paths.vectors()) {
        Ok(meta) => check("store_files", Status::Pass, format!("vdb_data is {} bytes", meta.len())),
        Err(err) => check("store_files", Status::Fail, format!("cannot stat vdb_data: {}", err)),
    }
}

fn check_cache_file(state: &RagState) -> CheckResult {
    let paths = StorePaths::new(&state.config.store.root);
    if paths.embeddings_cache().exists() {
        check("embedding_cache", Status::Pass, "present")
    } else {
        check("embedding_cache", Status::Warn, "no cache file yet; first sync will create one")
    }
}

fn check_docs_folder(state: &RagState) -> CheckResult {
    let root = &state.config.docs.root;
    match std::fs::read_dir(root) {
        Ok(_) => check("docs_folder", Status::Pass, format!("{} is readable", root.display())),
        Err(err) => check("docs_folder", Status::Fail, format!("{} unreadable: {}", root.display(), err)),
    }
}

fn check_index_sanity(state: &RagState) -> CheckResult {
    let live = state.live.load();
    match live.verify_consistency() {
        Ok(()) => check(
            "index_sanity",
            Status::Pass,
            format!("{} chunks, {} bm25 docs", live.chunk_metadata.len(), live.bm25_index.num_docs()),
        ),
        Err(err) => check("index_sanity", Status::Fail, err.to_string()),
    }
}

/// `psutil`-style process memory reporting. Diagnostic only: a failure to
/// read it never downgrades overall health below `Warn`.
fn check_process_memory() -> CheckResult {
    let mut system = System::new();
    let pid = sysinfo::get_current_pid().unwrap_or_else(|_| Pid::from_u32(0));
    system.refresh_processes(ProcessesToUpdate::All);

    match system.process(pid) {
        Some(process) => check(
            "process_memory",
            Status::Pass,
            format!("resident set size: {} bytes", process.memory()),
        ),
        None => check("process_memory", Status::Warn, "could not read process memory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_escalates_to_fail() {
        let report = HealthReport {
            checks: vec![
                check("a", Status::Pass, "ok"),
                check("b", Status::Fail, "bad"),
            ],
        };
        assert_eq!(report.overall_status(), Status::Fail);
    }

    #[test]
    fn overall_status_warn_without_fail() {
        let report = HealthReport {
            checks: vec![check("a", Status::Pass, "ok"), check("b", Status::Warn, "meh")],
        };
        assert_eq!(report.overall_status(), Status::Warn);
    }

    #[test]
    fn overall_status_pass_when_all_pass() {
        let report = HealthReport { checks: vec![check("a", Status::Pass, "ok")] };
        assert_eq!(report.overall_status(), Status::Pass);
    }
}
