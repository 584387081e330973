//! Shared test scaffolding: a CLI runner for the `ragctl` binary and a
//! minimal single-threaded HTTP mock standing in for the embedding and LLM
//! services, so integration tests never depend on a real network service.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;

pub fn ragctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // the test binary itself
    path.pop(); // deps/
    path.push("ragctl");
    path
}

pub fn run_ragctl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(ragctl_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run ragctl: {}", e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

pub fn write_config(root: &Path, embedding_url: &str, llm_url: &str, dims: usize) -> PathBuf {
    let store_root = root.join("store");
    let docs_root = root.join("docs");
    let content = format!(
        r#"[store]
root = "{store}"

[docs]
root = "{docs}"

[retrieval]
relevance_threshold = 0.05

[embedding]
url = "{embedding_url}"
dims = {dims}
timeout_secs = 5

[llm]
url = "{llm_url}"
timeout_secs = 5
"#,
        store = store_root.display(),
        docs = docs_root.display(),
        embedding_url = embedding_url,
        llm_url = llm_url,
        dims = dims,
    );
    let config_path = root.join("rag.toml");
    std::fs::write(&config_path, content).unwrap();
    config_path
}

/// A single-threaded HTTP/1.1 mock listening on an OS-assigned port. Every
/// connection is handled independently and closed after one response, so
/// the client must reconnect per request (reqwest does this transparently).
pub struct MockServer {
    addr: std::net::SocketAddr,
}

impl MockServer {
    pub fn start_embedding(dims: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle_embedding(stream, dims);
            }
        });
        Self { addr }
    }

    pub fn start_llm() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle_llm(stream);
            }
        });
        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn handle_embedding(mut stream: TcpStream, dims: usize) {
    let body = read_request_body(&mut stream);
    let content = json_string_field(&body, "content").unwrap_or_default();
    let vector = hashing_trick_vector(&content, dims);
    write_json_response(&mut stream, &serde_json::json!({ "embedding": vector }));
}

fn handle_llm(mut stream: TcpStream) {
    let _ = read_request_body(&mut stream);
    write_json_response(
        &mut stream,
        &serde_json::json!({ "choices": [ { "message": { "content": "[]" } } ] }),
    );
}

fn read_request_body(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let Ok(n) = stream.read(&mut buf) else { break };
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        let Some(header_end) = text.find("\r\n\r\n") else { continue };
        let content_length = text[..header_end]
            .lines()
            .find(|l| l.to_lowercase().starts_with("content-length"))
            .and_then(|l| l.split(':').nth(1))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() - (header_end + 4) >= content_length {
            break;
        }
    }

    let text = String::from_utf8_lossy(&data).to_string();
    match text.find("\r\n\r\n") {
        Some(idx) => text[idx + 4..].to_string(),
        None => String::new(),
    }
}

fn write_json_response(stream: &mut TcpStream, json: &serde_json::Value) {
    let body = json.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn json_string_field(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get(field)?.as_str().map(|s| s.to_string())
}

/// A deterministic stand-in for a real embedding model: a feature-hashed
/// bag-of-words vector, L2-normalized. Texts sharing vocabulary end up with
/// correlated vectors, close enough to a real embedding's behavior for
/// exercising hybrid retrieval without a live model.
fn hashing_trick_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims.max(1)];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let word = word.to_lowercase();
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % dims.max(1) as u64) as usize;
        let sign = if (h >> 32) % 2 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}
