//! Configuration and data directory management.
//!
//! Every tunable is read from a `DOCFLOW_*` environment variable and falls
//! back to the documented default. Thresholds consumed by the recognition
//! router and the pipeline live here, never at call sites.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Recognition routing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Fast-engine confidence at or above which a dense page is "simple".
    pub high_confidence_threshold: f64,
    /// Fast-engine confidence below which a page is "complex".
    pub low_confidence_threshold: f64,
    /// Minimum text length for a high-confidence page to count as "simple".
    pub simple_density_threshold: usize,
    /// Text length below which a page is "complex".
    pub min_density_threshold: usize,
    /// Pages with more pixels than this are "complex" when text signals are inconclusive.
    pub large_page_pixels: u64,
    /// Whether the vision-language engine may be called at all.
    pub vision_enabled: bool,
    /// Upper bound on a single vision-engine call.
    pub vision_timeout_ms: u64,
    /// Confidences closer than this are merged into a hybrid result.
    pub hybrid_merge_delta: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 85.0,
            low_confidence_threshold: 70.0,
            simple_density_threshold: 200,
            min_density_threshold: 50,
            large_page_pixels: 12_000_000,
            vision_enabled: false,
            vision_timeout_ms: 30_000,
            hybrid_merge_delta: 10.0,
        }
    }
}

/// Orientation correction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationConfig {
    /// Feature flag for the secondary (OSD) orientation detector.
    pub secondary_detection_enabled: bool,
    /// Memory growth allowed for the lazily created detector, in MB.
    pub detector_memory_budget_mb: u64,
    /// Detections at or below this confidence are ignored.
    pub min_rotation_confidence: f64,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            secondary_detection_enabled: false,
            detector_memory_budget_mb: 150,
            min_rotation_confidence: 50.0,
        }
    }
}

/// Ingestion pipeline batch sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub embedding_batch_size: usize,
    pub storage_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_batch_size: 50,
            storage_batch_size: 100,
        }
    }
}

/// Job worker concurrency, retry, and health settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub process_document_concurrency: usize,
    pub generate_embeddings_concurrency: usize,
    pub reprocess_chunks_concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Health turns false above this many active jobs.
    pub max_active: usize,
    /// Health turns false above this many waiting jobs.
    pub max_waiting: usize,
    /// Whole-attempt timeout; the next attempt resumes from the checkpoint.
    pub job_timeout_ms: u64,
    /// Finished jobs kept for inspection; older ones are evicted.
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            process_document_concurrency: 2,
            generate_embeddings_concurrency: 1,
            reprocess_chunks_concurrency: 2,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            max_active: 10,
            max_waiting: 100,
            job_timeout_ms: 600_000,
            keep_completed: 100,
            keep_failed: 500,
        }
    }
}

/// Process-wide memory budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_rss_mb: u64,
    pub min_available_mb: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_rss_mb: 2048,
            min_available_mb: 256,
        }
    }
}

/// External capability providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub tesseract_bin: String,
    pub tesseract_lang: String,
    pub vision_endpoint: String,
    pub vision_model: String,
    #[serde(skip_serializing)]
    pub vision_api_key: Option<String>,
    pub embedding_endpoint: String,
    pub embedding_model: String,
    #[serde(skip_serializing)]
    pub embedding_api_key: Option<String>,
    pub embedding_dim: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            tesseract_lang: "eng".to_string(),
            vision_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            vision_model: "gpt-4o".to_string(),
            vision_api_key: None,
            embedding_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
            embedding_dim: 1536,
        }
    }
}

/// Top-level Docflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocflowConfig {
    /// Root data directory holding the SQLite database.
    pub data_dir: PathBuf,
    pub router: RouterConfig,
    pub orientation: OrientationConfig,
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
    pub memory: MemoryConfig,
    pub providers: ProviderConfig,
}

impl DocflowConfig {
    /// Configuration with all defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            router: RouterConfig::default(),
            orientation: OrientationConfig::default(),
            pipeline: PipelineConfig::default(),
            worker: WorkerConfig::default(),
            memory: MemoryConfig::default(),
            providers: ProviderConfig::default(),
        }
    }

    /// Create configuration from environment and defaults.
    pub fn from_env() -> crate::Result<Self> {
        let data_dir = std::env::var("DOCFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let mut config = Self::with_data_dir(data_dir);

        let r = &mut config.router;
        r.high_confidence_threshold =
            env_or("DOCFLOW_HIGH_CONFIDENCE_THRESHOLD", r.high_confidence_threshold)?;
        r.low_confidence_threshold =
            env_or("DOCFLOW_LOW_CONFIDENCE_THRESHOLD", r.low_confidence_threshold)?;
        r.simple_density_threshold =
            env_or("DOCFLOW_SIMPLE_DENSITY_THRESHOLD", r.simple_density_threshold)?;
        r.min_density_threshold = env_or("DOCFLOW_MIN_DENSITY_THRESHOLD", r.min_density_threshold)?;
        r.large_page_pixels = env_or("DOCFLOW_LARGE_PAGE_PIXELS", r.large_page_pixels)?;
        r.vision_timeout_ms = env_or("DOCFLOW_VISION_TIMEOUT_MS", r.vision_timeout_ms)?;
        r.hybrid_merge_delta = env_or("DOCFLOW_HYBRID_MERGE_DELTA", r.hybrid_merge_delta)?;

        let o = &mut config.orientation;
        o.secondary_detection_enabled =
            env_or("DOCFLOW_SECONDARY_ORIENTATION", o.secondary_detection_enabled)?;
        o.detector_memory_budget_mb =
            env_or("DOCFLOW_DETECTOR_MEMORY_MB", o.detector_memory_budget_mb)?;
        o.min_rotation_confidence =
            env_or("DOCFLOW_MIN_ROTATION_CONFIDENCE", o.min_rotation_confidence)?;

        let p = &mut config.pipeline;
        p.embedding_batch_size = env_or("DOCFLOW_EMBEDDING_BATCH_SIZE", p.embedding_batch_size)?;
        p.storage_batch_size = env_or("DOCFLOW_STORAGE_BATCH_SIZE", p.storage_batch_size)?;

        let w = &mut config.worker;
        w.process_document_concurrency =
            env_or("DOCFLOW_DOCUMENT_CONCURRENCY", w.process_document_concurrency)?;
        w.generate_embeddings_concurrency =
            env_or("DOCFLOW_EMBEDDING_CONCURRENCY", w.generate_embeddings_concurrency)?;
        w.reprocess_chunks_concurrency =
            env_or("DOCFLOW_REPROCESS_CONCURRENCY", w.reprocess_chunks_concurrency)?;
        w.max_attempts = env_or("DOCFLOW_MAX_ATTEMPTS", w.max_attempts)?;
        w.backoff_base_ms = env_or("DOCFLOW_BACKOFF_BASE_MS", w.backoff_base_ms)?;
        w.backoff_max_ms = env_or("DOCFLOW_BACKOFF_MAX_MS", w.backoff_max_ms)?;
        w.max_active = env_or("DOCFLOW_MAX_ACTIVE", w.max_active)?;
        w.max_waiting = env_or("DOCFLOW_MAX_WAITING", w.max_waiting)?;
        w.job_timeout_ms = env_or("DOCFLOW_JOB_TIMEOUT_MS", w.job_timeout_ms)?;
        w.keep_completed = env_or("DOCFLOW_KEEP_COMPLETED", w.keep_completed)?;
        w.keep_failed = env_or("DOCFLOW_KEEP_FAILED", w.keep_failed)?;

        let m = &mut config.memory;
        m.max_rss_mb = env_or("DOCFLOW_MAX_RSS_MB", m.max_rss_mb)?;
        m.min_available_mb = env_or("DOCFLOW_MIN_AVAILABLE_MB", m.min_available_mb)?;

        let pr = &mut config.providers;
        pr.tesseract_bin = env_or("DOCFLOW_TESSERACT_BIN", pr.tesseract_bin.clone())?;
        pr.tesseract_lang = env_or("DOCFLOW_TESSERACT_LANG", pr.tesseract_lang.clone())?;
        pr.vision_endpoint = env_or("DOCFLOW_VISION_ENDPOINT", pr.vision_endpoint.clone())?;
        pr.vision_model = env_or("DOCFLOW_VISION_MODEL", pr.vision_model.clone())?;
        pr.vision_api_key = std::env::var("DOCFLOW_VISION_API_KEY").ok();
        pr.embedding_endpoint =
            env_or("DOCFLOW_EMBEDDING_ENDPOINT", pr.embedding_endpoint.clone())?;
        pr.embedding_model = env_or("DOCFLOW_EMBEDDING_MODEL", pr.embedding_model.clone())?;
        pr.embedding_api_key = std::env::var("DOCFLOW_EMBEDDING_API_KEY").ok();
        pr.embedding_dim = env_or("DOCFLOW_EMBEDDING_DIM", pr.embedding_dim)?;

        // Vision stays off unless explicitly enabled and a key is present.
        config.router.vision_enabled = env_or("DOCFLOW_VISION_ENABLED", false)?
            && config.providers.vision_api_key.is_some();

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or corrupt the pipeline.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pipeline.embedding_batch_size == 0 || self.pipeline.storage_batch_size == 0 {
            return Err(crate::Error::Config("batch sizes must be positive".into()));
        }
        if self.router.low_confidence_threshold > self.router.high_confidence_threshold {
            return Err(crate::Error::Config(
                "low confidence threshold exceeds high confidence threshold".into(),
            ));
        }
        if self.worker.backoff_max_ms < self.worker.backoff_base_ms {
            return Err(crate::Error::Config(
                "backoff_max_ms is below backoff_base_ms".into(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(crate::Error::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of the SQLite database file.
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> crate::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| crate::Error::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DocflowConfig::with_data_dir("/tmp/docflow");
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.embedding_batch_size, 50);
        assert_eq!(config.pipeline.storage_batch_size, 100);
        assert_eq!(config.worker.process_document_concurrency, 2);
        assert!(!config.router.vision_enabled);
    }

    #[test]
    fn test_rejects_zero_batch() {
        let mut config = DocflowConfig::with_data_dir("/tmp/docflow");
        config.pipeline.embedding_batch_size = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = DocflowConfig::with_data_dir("/tmp/docflow");
        config.router.low_confidence_threshold = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_backoff_cap_and_rotation_confidence() {
        std::env::set_var("DOCFLOW_BACKOFF_MAX_MS", "90000");
        std::env::set_var("DOCFLOW_MIN_ROTATION_CONFIDENCE", "72.5");
        let config = DocflowConfig::from_env();
        std::env::remove_var("DOCFLOW_BACKOFF_MAX_MS");
        std::env::remove_var("DOCFLOW_MIN_ROTATION_CONFIDENCE");

        let config = config.unwrap();
        assert_eq!(config.worker.backoff_max_ms, 90_000);
        assert_eq!(config.orientation.min_rotation_confidence, 72.5);
    }
}
