//! Docflow — document ingestion worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use docflow_core::{DocflowConfig, SystemMemory};
use docflow_ingest::{
    create_embedder, ChannelProgressSink, ExtractionOptions, FileExtractor, FileType,
    ParagraphChunker, PipelineController, ProcessDocumentRequest,
};
use docflow_store::{NewSource, SqliteStore};
use docflow_vision::{
    HttpVisionEngine, OrientationCorrector, RecognitionRouter, TesseractEngine, TesseractOsd,
    VisionEngine,
};
use docflow_worker::{Job, JobQueue, MemoryQueue, Retention, Worker};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct App {
    config: DocflowConfig,
    store: Arc<SqliteStore>,
    controller: Arc<PipelineController>,
    progress: Arc<ChannelProgressSink>,
}

async fn build_app(config: DocflowConfig) -> anyhow::Result<App> {
    info!("Data directory: {}", config.data_dir.display());

    let store = Arc::new(
        SqliteStore::open(config.db_dir())
            .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?,
    );

    let fast = Arc::new(TesseractEngine::new(&config.providers));
    match fast.start().await {
        Ok(version) => info!("Fast engine ready: {}", version),
        Err(e) => warn!("Fast engine unavailable, image inputs will fail: {}", e),
    }
    let vision: Option<Arc<dyn VisionEngine>> = if config.router.vision_enabled {
        match HttpVisionEngine::new(&config.providers) {
            Ok(engine) => Some(Arc::new(engine)),
            Err(e) => {
                warn!("Vision engine disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    let router = Arc::new(RecognitionRouter::new(config.router.clone(), fast, vision));
    let corrector = Arc::new(OrientationCorrector::with_detector(
        config.orientation.clone(),
        TesseractOsd::factory(&config.providers),
    ));

    let progress = Arc::new(ChannelProgressSink::new(256));
    let controller = PipelineController::new(
        config.pipeline.clone(),
        Arc::new(FileExtractor::new(corrector, router)),
        Arc::new(ParagraphChunker::new()),
        create_embedder(&config.providers),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(SystemMemory::new(config.memory.clone())),
    )
    .with_progress(progress.clone());

    Ok(App {
        config,
        store,
        controller: Arc::new(controller),
        progress,
    })
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match FileType::from_extension(&ext) {
        FileType::PlainText => "text/plain",
        FileType::Markdown => "text/markdown",
        FileType::Json => "application/json",
        FileType::Pdf => "application/pdf",
        FileType::Image => match ext.as_str() {
            "png" => "image/png",
            "tif" | "tiff" => "image/tiff",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            "gif" => "image/gif",
            _ => "image/jpeg",
        },
        FileType::Code | FileType::Unknown => "text/plain",
    }
}

async fn ingest(files: &[String]) -> anyhow::Result<bool> {
    let app = build_app(DocflowConfig::from_env()?).await?;
    let organization_id =
        std::env::var("DOCFLOW_ORGANIZATION_ID").unwrap_or_else(|_| "local".to_string());
    let user_id = std::env::var("DOCFLOW_USER_ID").unwrap_or_else(|_| "cli".to_string());

    // Every job's outcome is reported at the end, so none may be evicted.
    let queue = Arc::new(MemoryQueue::from_config(&app.config.worker).with_retention(Retention {
        keep_completed: app.config.worker.keep_completed.max(files.len()),
        keep_failed: app.config.worker.keep_failed.max(files.len()),
    }));
    let worker = Worker::for_pipeline(
        queue.clone(),
        Arc::new(SystemMemory::new(app.config.memory.clone())),
        app.config.worker.clone(),
        app.controller.clone(),
    );
    let forwarder = worker.forward_progress(app.progress.subscribe());

    let mut enqueued = Vec::new();
    for file in files {
        let path = PathBuf::from(file);
        let size = std::fs::metadata(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?
            .len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        let mime_type = guess_mime(&path).to_string();
        let source_id = uuid::Uuid::new_v4().to_string();

        app.store
            .create_source(&NewSource {
                id: source_id.clone(),
                organization_id: organization_id.clone(),
                owner_id: user_id.clone(),
                filename: filename.clone(),
                mime_type: mime_type.clone(),
                size,
            })
            .map_err(|e| anyhow::anyhow!("Failed to register {}: {}", filename, e))?;

        let job = Job::ProcessDocument(ProcessDocumentRequest {
            source_id: source_id.clone(),
            organization_id: organization_id.clone(),
            user_id: user_id.clone(),
            file_path: path,
            filename,
            mime_type,
            file_size: size,
            options: ExtractionOptions::default(),
        });
        let job_id = queue.add(job.to_payload()?).await?;
        info!(job_id = %job_id, source_id = %source_id, "Queued {}", file);
        enqueued.push((file.clone(), source_id, job_id));
    }

    worker.run_until_idle().await;
    forwarder.abort();

    let mut all_ok = true;
    let report: Vec<serde_json::Value> = enqueued
        .into_iter()
        .map(|(file, source_id, job_id)| {
            let snapshot = queue.get(&job_id);
            all_ok &= snapshot
                .as_ref()
                .and_then(|s| s.result.as_ref())
                .is_some_and(|r| r.success);
            serde_json::json!({ "file": file, "sourceId": source_id, "job": snapshot })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(all_ok)
}

fn status(source_id: &str) -> anyhow::Result<bool> {
    let config = DocflowConfig::from_env()?;
    let store = SqliteStore::open(config.db_dir())
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    match store
        .get_source(source_id)
        .map_err(|e| anyhow::anyhow!("Failed to read source: {}", e))?
    {
        Some(source) => {
            println!("{}", serde_json::to_string_pretty(&source)?);
            Ok(true)
        }
        None => {
            eprintln!("Source not found: {}", source_id);
            Ok(false)
        }
    }
}

async fn health() -> anyhow::Result<bool> {
    let config = DocflowConfig::from_env()?;
    let queue = Arc::new(MemoryQueue::from_config(&config.worker));
    let worker = Worker::new(
        queue,
        Arc::new(SystemMemory::new(config.memory.clone())),
        config.worker.clone(),
    );
    let health = worker.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(health.is_healthy)
}

fn print_help() {
    println!("Docflow — document ingestion worker");
    println!();
    println!("Usage: docflow <command>");
    println!();
    println!("Commands:");
    println!("  ingest <file>...         Extract, chunk, embed, and store files");
    println!("  status <source-id>       Show a source's processing status");
    println!("  health                   Show worker health");
    println!("  help                     Show this help message");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let ok = match args.get(1).map(String::as_str) {
        Some("ingest") => {
            if args.len() < 3 {
                eprintln!("Usage: docflow ingest <file>...");
                std::process::exit(1);
            }
            ingest(&args[2..]).await?
        }
        Some("status") => {
            let Some(source_id) = args.get(2) else {
                eprintln!("Usage: docflow status <source-id>");
                std::process::exit(1);
            };
            status(source_id)?
        }
        Some("health") => health().await?,
        None | Some("--help") | Some("-h") | Some("help") => {
            print_help();
            true
        }
        Some(other) => {
            eprintln!("Unknown command: {}. Use 'docflow help' for usage.", other);
            std::process::exit(1);
        }
    };
    std::process::exit(if ok { 0 } else { 1 });
}
