//! `ragctl`: the operator CLI for the retrieval core. `init` bootstraps an
//! empty store, `sync` runs incremental ingestion, `search` runs a one-off
//! retrieval, `qa-generate` runs the offline Q&A pipeline, `serve` starts
//! the hot-reloading status server, and `health` runs the diagnostic
//! checks once and prints the report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use ragcore::cache::EmbeddingCache;
use ragcore::config::{self, Config};
use ragcore::embedding::EmbeddingClient;
use ragcore::error::RagResult;
use ragcore::health;
use ragcore::ingest;
use ragcore::llm::{HttpLlmClient, LlmClient};
use ragcore::models::{QaPair, RagMode};
use ragcore::qa::QaIndex;
use ragcore::qagen;
use ragcore::reload;
use ragcore::search;
use ragcore::server;
use ragcore::state::{LiveIndices, RagState};
use ragcore::store::{self, StorePaths};

#[derive(Parser)]
#[command(name = "ragctl", about = "RAG retrieval core for a voice-agent backend", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and docs directories and an empty index if none exists.
    Init,

    /// Run one incremental ingestion pass over the docs folder.
    Sync,

    /// Run a single retrieval and print the result.
    Search {
        query: String,

        /// qa, chunk, or both
        #[arg(long, default_value = "both")]
        mode: String,
    },

    /// Generate Q&A pairs for already-ingested documents via the configured LLM.
    QaGenerate {
        /// Limit generation to a single already-ingested filename.
        #[arg(long)]
        doc: Option<String>,
    },

    /// Start the status server and hot-reload watchers.
    Serve,

    /// Run health checks once and print the report.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => run_init(&cli.config),
        Commands::Sync => {
            let state = build_state(&cli.config)?;
            let report = ingest::run_sync(&state).await?;
            println!(
                "processed {} files ({} skipped, {} failed), {} chunks processed ({} failed)",
                report.files_processed, report.files_skipped, report.files_failed, report.chunks_processed, report.chunks_failed
            );
            for err in &report.errors {
                eprintln!("error: {}", err);
            }
            Ok(())
        }
        Commands::Search { query, mode } => {
            let state = build_state(&cli.config)?;
            let mode = RagMode::parse(&mode).ok_or_else(|| anyhow::anyhow!("mode must be one of qa, chunk, both"))?;
            search::run_search_command(&state, &query, mode).await?;
            Ok(())
        }
        Commands::QaGenerate { doc } => run_qa_generate(&cli.config, doc.as_deref()).await,
        Commands::Serve => {
            let state = Arc::new(build_state(&cli.config)?);
            reload::spawn(state.clone());
            server::run_server(state).await
        }
        Commands::Health => {
            let state = build_state(&cli.config)?;
            let report = health::run_checks(&state).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.overall_status() == health::Status::Fail {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn run_init(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = config::load_config(config_path)?;
    std::fs::create_dir_all(&config.store.root)?;
    std::fs::create_dir_all(&config.docs.root)?;

    let paths = StorePaths::new(&config.store.root);
    if !store::index_files_present(&paths) {
        let live = LiveIndices::empty(config.embedding.dims);
        store::save_index_bundle(&paths, &live)?;
        println!("initialized empty index at {}", config.store.root.display());
    } else {
        println!("index already present at {}", config.store.root.display());
    }
    Ok(())
}

fn build_llm(config: &Config) -> RagResult<Arc<dyn LlmClient>> {
    Ok(Arc::new(HttpLlmClient::new(
        config.llm.url.clone(),
        config.llm.model.clone(),
        config.llm.timeout_secs,
    )?))
}

fn load_qa_index(paths: &StorePaths) -> anyhow::Result<Option<QaIndex>> {
    let path = paths.qa_embeddings();
    if !path.exists() {
        return Ok(None);
    }
    let pairs: Vec<QaPair> = bincode::deserialize(&std::fs::read(&path)?)?;
    Ok(Some(QaIndex::new(pairs)))
}

fn build_state(config_path: &std::path::Path) -> anyhow::Result<RagState> {
    let config = config::load_config(config_path)?;
    let paths = StorePaths::new(&config.store.root);

    let live = if store::index_files_present(&paths) {
        store::load_index_bundle(&paths, config.embedding.dims, config.retrieval.ef_construction)?
    } else {
        LiveIndices::empty(config.embedding.dims)
    };
    let qa_index = load_qa_index(&paths)?;
    let last_db_modified = if store::index_files_present(&paths) { store::ann_mtime(&paths)? } else { 0 };

    let embedding = EmbeddingClient::new(config.embedding.clone())?;
    let llm = Some(build_llm(&config)?);
    let cache = EmbeddingCache::load_or_create(
        &paths.embeddings_cache(),
        config.embedding.cache_flush_count,
        config.embedding.cache_flush_secs,
    );
    let rag_enabled = config.rag.enabled;

    Ok(RagState::new(config, embedding, llm, cache, live, qa_index, rag_enabled, last_db_modified))
}

/// Run the offline Q&A generation pipeline over every already-ingested
/// document (or just `only`, if given), writing one dev-readable JSON file
/// per document plus the merged binary embeddings file the query path loads.
async fn run_qa_generate(config_path: &std::path::Path, only: Option<&str>) -> anyhow::Result<()> {
    let state = build_state(config_path)?;
    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("qa-generate requires an LLM client"))?
        .clone();
    let paths = StorePaths::new(&state.config.store.root);

    let filenames: Vec<String> = {
        let live = state.live.load();
        live.file_history
            .keys()
            .filter(|f| only.map(|o| o == f.as_str()).unwrap_or(true))
            .cloned()
            .collect()
    };
    if filenames.is_empty() {
        println!("no ingested documents match; run `ragctl sync` first");
        return Ok(());
    }

    let mut by_doc: HashMap<String, Vec<QaPair>> = match std::fs::read(paths.qa_embeddings()) {
        Ok(bytes) => {
            let pairs: Vec<QaPair> = bincode::deserialize(&bytes)?;
            let mut grouped: HashMap<String, Vec<QaPair>> = HashMap::new();
            for pair in pairs {
                grouped.entry(pair.source_filename.clone()).or_default().push(pair);
            }
            grouped
        }
        Err(_) => HashMap::new(),
    };

    std::fs::create_dir_all(paths.qa_dev_outputs_dir())?;

    for filename in &filenames {
        let text = store::load_document_text(&paths, filename)?;
        let generated = qagen::generate_for_document(
            llm.as_ref(),
            &state.embedding,
            filename,
            &text,
            &[],
            &state.config.chunking,
            &state.config.qa,
        )
        .await?;
        let deduped = qagen::deduplicate_pairs(Some(llm.as_ref()), generated).await;

        let output = qagen::build_output(filename, &deduped);
        let json = serde_json::to_vec_pretty(&output)?;
        store::write_atomic(
            &paths.qa_dev_outputs_dir().join(format!("{}.json", store::safe_filename(filename))),
            &json,
        )?;

        println!("{}: generated {} Q&A pairs", filename, deduped.len());
        by_doc.insert(filename.clone(), deduped);
    }

    let all_pairs: Vec<QaPair> = by_doc.into_values().flatten().collect();
    let bytes = bincode::serialize(&all_pairs)?;
    store::write_atomic(&paths.qa_embeddings(), &bytes)?;

    Ok(())
}
