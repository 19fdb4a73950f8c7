use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::llm::pricing::{ModelRate, PriceTable};
use crate::llm::LlmProvider;

/// Configuration for the chapterizer pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transcript and chunking settings
    pub processing: ProcessingConfig,

    /// Text generation provider settings
    pub llm: LlmConfig,

    /// Screenshot selection and capture settings
    pub screenshots: ScreenshotConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Job scheduling settings
    pub jobs: JobConfig,

    /// Where transcripts, media and descriptions come from
    pub sources: SourceConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Transcript text budget; later segments are dropped
    pub max_transcript_chars: usize,

    /// Character budget for a single refinement call
    pub chunk_size: usize,

    /// Attempts per chunk before it is dropped
    pub max_retries: u32,

    /// Delay between attempts (milliseconds)
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,

    /// Per-token rates keyed by model identifier
    pub pricing: HashMap<String, ModelRate>,

    /// Rate used for models missing from `pricing`
    pub default_rate: ModelRate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Minimum spacing between captured frames (seconds)
    pub interval_seconds: f64,

    /// Cap per subject
    pub max_per_subject: usize,

    /// Hard limit on the media download (seconds)
    pub download_timeout_seconds: u64,

    /// Where captured frames are written
    pub output_dir: PathBuf,

    /// Scratch space for downloaded media
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,

    /// Artifacts older than this are removed by the retention sweep
    pub retention_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Pipelines allowed to run at the same time
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory of `{subject_id}.json` transcript files
    pub transcripts_dir: PathBuf,

    /// Directory of `{subject_id}.pdf` or `.txt` documents, tried after transcripts
    pub documents_dir: Option<PathBuf>,

    /// Media location; `{subject_id}` is substituted (url-encoded)
    pub media_url_template: String,

    /// How `media_url_template` is fetched
    pub download_method: DownloadMethod,

    /// Speech-to-text endpoint used when no transcript exists
    pub transcription_endpoint: String,
    pub transcription_api_key: Option<String>,
    pub transcription_model: String,
    pub transcription_timeout_seconds: u64,

    /// yt-dlp binary used for downloads and descriptions
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMethod {
    /// Resolve through yt-dlp (video pages)
    YtDlp,
    /// Plain HTTP GET of a direct media file
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    pub level: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_transcript_chars: 100_000,
            chunk_size: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        let pricing = [
            ("gpt-4o", 5.0, 15.0),
            ("gpt-4o-2024-08-06", 2.5, 10.0),
            ("gpt-4o-mini-2024-07-18", 0.15, 0.6),
            ("gpt-4o-mini", 0.15, 0.6),
            ("llama3-8b-8192", 0.05, 0.08),
            ("llama3-70b-8192", 0.59, 0.79),
            ("claude-3-5-sonnet-20240620", 3.0, 15.0),
            ("claude-3-haiku-20240307", 0.25, 1.25),
        ]
        .into_iter()
        .map(|(model, input, output)| (model.to_string(), ModelRate::per_million(input, output)))
        .collect();

        Self {
            provider: LlmProvider::OpenAI,
            // resolved per provider when unset
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout_seconds: 120,
            pricing,
            default_rate: ModelRate { input: 0.0001, output: 0.0002 },
        }
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60.0,
            max_per_subject: 50,
            download_timeout_seconds: 300,
            output_dir: PathBuf::from("./screenshots"),
            temp_dir: std::env::temp_dir().join("chapterizer"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            retention_days: 7,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { max_concurrent_jobs: 5 }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            transcripts_dir: PathBuf::from("./transcripts"),
            documents_dir: None,
            media_url_template: "https://www.youtube.com/watch?v={subject_id}".to_string(),
            download_method: DownloadMethod::YtDlp,
            transcription_endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            transcription_api_key: None,
            transcription_model: "whisper-1".to_string(),
            transcription_timeout_seconds: 3600,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "chapterizer=info,warn".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            llm: LlmConfig::default(),
            screenshots: ScreenshotConfig::default(),
            cache: CacheConfig::default(),
            jobs: JobConfig::default(),
            sources: SourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn price_table(&self) -> PriceTable {
        PriceTable::new(self.pricing.clone(), self.default_rate)
    }
}

impl ProcessingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }
}

impl Config {
    /// Load configuration from the first readable config file, then apply env overrides
    pub fn load() -> Result<Self> {
        let config_paths = ["chapterizer.toml", "config/chapterizer.toml"];

        let mut config = None;
        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(parsed) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config = Some(parsed);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        let mut config = config.unwrap_or_default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load a specific file, failing if it cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&config_str)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("CHAPTERIZER_MODEL") {
            self.llm.model = model;
        }

        if let Some(max_tokens) = env_parse("CHAPTERIZER_MAX_TOKENS") {
            self.llm.max_tokens = max_tokens;
        }

        if let Ok(api_key) = std::env::var("CHAPTERIZER_API_KEY") {
            self.llm.api_key = Some(api_key.clone());
            if self.sources.transcription_api_key.is_none() {
                self.sources.transcription_api_key = Some(api_key);
            }
        }

        if let Ok(endpoint) = std::env::var("CHAPTERIZER_LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }

        if let Some(chunk_size) = env_parse("CHAPTERIZER_CHUNK_SIZE") {
            self.processing.chunk_size = chunk_size;
        }

        if let Some(max_chars) = env_parse("CHAPTERIZER_MAX_CHARS") {
            self.processing.max_transcript_chars = max_chars;
        }

        if let Ok(cache_dir) = std::env::var("CHAPTERIZER_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(cache_dir);
        }

        if let Ok(screenshot_dir) = std::env::var("CHAPTERIZER_SCREENSHOT_DIR") {
            self.screenshots.output_dir = PathBuf::from(screenshot_dir);
        }

        if let Ok(documents_dir) = std::env::var("CHAPTERIZER_DOCUMENTS_DIR") {
            self.sources.documents_dir = Some(PathBuf::from(documents_dir));
        }

        if let Some(jobs) = env_parse("CHAPTERIZER_MAX_CONCURRENT_JOBS") {
            self.jobs.max_concurrent_jobs = jobs;
        }

        if let Ok(log_level) = std::env::var("CHAPTERIZER_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processing.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be greater than 0".into()));
        }

        if self.processing.max_retries == 0 {
            return Err(PipelineError::Config("max_retries must be greater than 0".into()));
        }

        if self.screenshots.max_per_subject == 0 {
            return Err(PipelineError::Config("max_per_subject must be greater than 0".into()));
        }

        if !self.screenshots.interval_seconds.is_finite() || self.screenshots.interval_seconds < 0.0 {
            return Err(PipelineError::Config("interval_seconds must be a non-negative number".into()));
        }

        if self.jobs.max_concurrent_jobs == 0 {
            return Err(PipelineError::Config("max_concurrent_jobs must be greater than 0".into()));
        }

        let mut rates: Vec<(&str, &ModelRate)> = self.llm.pricing.iter().map(|(k, v)| (k.as_str(), v)).collect();
        rates.push(("default", &self.llm.default_rate));
        for (model, rate) in rates {
            if rate.input < 0.0 || rate.output < 0.0 {
                return Err(PipelineError::Config(format!("negative price for model {}", model)));
            }
        }

        if let Some(endpoint) = &self.llm.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| PipelineError::Config(format!("invalid llm endpoint {}: {}", endpoint, e)))?;
        }

        url::Url::parse(&self.sources.transcription_endpoint).map_err(|e| {
            PipelineError::Config(format!(
                "invalid transcription endpoint {}: {}",
                self.sources.transcription_endpoint, e
            ))
        })?;

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Chapterizer Configuration:\n\
            - Model: {}\n\
            - Chunk Size: {} chars\n\
            - Retries: {} x {}ms\n\
            - Screenshots: every {}s, max {}\n\
            - Cache Directory: {} ({} day retention)\n\
            - Concurrent Jobs: {}",
            self.llm.model,
            self.processing.chunk_size,
            self.processing.max_retries,
            self.processing.retry_delay_ms,
            self.screenshots.interval_seconds,
            self.screenshots.max_per_subject,
            self.cache.cache_dir.display(),
            self.cache.retention_days,
            self.jobs.max_concurrent_jobs
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", key, value);
            None
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.processing.chunk_size = chunk_size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay_ms: u64) -> Self {
        self.config.processing.max_retries = max_retries;
        self.config.processing.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.llm.model = model.to_string();
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.cache.cache_dir = dir;
        self
    }

    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.config.cache.retention_days = days;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: PathBuf) -> Self {
        self.config.screenshots.output_dir = dir;
        self
    }

    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.config.screenshots.temp_dir = dir;
        self
    }

    pub fn with_screenshot_limits(mut self, interval_seconds: f64, max_per_subject: usize) -> Self {
        self.config.screenshots.interval_seconds = interval_seconds;
        self.config.screenshots.max_per_subject = max_per_subject;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.jobs.max_concurrent_jobs = jobs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processing.chunk_size, 1000);
        assert_eq!(config.processing.max_transcript_chars, 100_000);
        assert_eq!(config.processing.max_retries, 3);
        assert_eq!(config.screenshots.max_per_subject, 50);
        assert_eq!(config.cache.retention_days, 7);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.jobs.max_concurrent_jobs, 5);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_chunk_size(250)
            .with_retries(2, 0)
            .with_model("gpt-4o")
            .build();

        assert_eq!(config.processing.chunk_size, 250);
        assert_eq!(config.processing.max_retries, 2);
        assert_eq!(config.processing.retry_delay(), Duration::ZERO);
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let config = ConfigBuilder::new().with_chunk_size(0).build();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.default_rate = ModelRate { input: -1.0, output: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [processing]
            chunk_size = 500

            [llm]
            model = "gpt-4o"
            "#,
        )
        .unwrap();

        assert_eq!(config.processing.chunk_size, 500);
        assert_eq!(config.processing.max_retries, 3);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.screenshots.interval_seconds, 60.0);
    }

    #[test]
    fn test_local_provider_leaves_endpoint_unset() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            provider = "LMStudio"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::LMStudio);
        assert!(config.llm.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pricing_defaults() {
        let table = Config::default().llm.price_table();
        let rate = table.rate_for("gpt-4o");
        assert!((rate.input - 5.0 / 1_000_000.0).abs() < 1e-15);
        assert_eq!(table.rate_for("mystery-model"), ModelRate { input: 0.0001, output: 0.0002 });
    }
}
