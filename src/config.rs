//! Configuration types for every backend.
//!
//! Each backend has one config struct with documented defaults, chained
//! setters and `serde` support, so the same struct can be filled in code,
//! from a JSON options map (`PdfParser::from_name`) or from the environment
//! ([`DoclingConfig::from_env`] and friends). Environment variables are read
//! only in the `from_env` constructors and [`credential`].

use crate::error::ParseError;
use crate::poll::PollPolicy;
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// ── Environment ──────────────────────────────────────────────────────────

pub const ENV_DOCLING_URL: &str = "DOCLING_SERVE_URL";
pub const ENV_DOCLING_API_KEY: &str = "DOCLING_SERVE_API_KEY";
pub const ENV_LLAMA_KEY: &str = "LLAMA_CLOUD_API_KEY";
pub const ENV_LLAMA_KEY_LEGACY: &str = "LLAMA_PARSE_KEY";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_PDFIUM_LIB: &str = "PDFIUM_LIB_PATH";

/// Read a non-empty environment variable.
pub fn credential(variable: &str) -> Option<String> {
    std::env::var(variable).ok().filter(|v| !v.trim().is_empty())
}

fn pdfium_lib_from_env() -> Option<PathBuf> {
    credential(ENV_PDFIUM_LIB).map(PathBuf::from)
}

// ── Layout model (docling-serve) ─────────────────────────────────────────

/// Table-structure model quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    Fast,
    #[default]
    Accurate,
}

impl TableMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableMode::Fast => "fast",
            TableMode::Accurate => "accurate",
        }
    }
}

/// Options for the `docling` backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DoclingConfig {
    /// docling-serve base URL. Default: `http://localhost:5001`.
    pub base_url: String,
    /// Sent as `X-Api-Key` when the service is protected.
    pub api_key: Option<String>,
    /// Abort the whole call when one document fails. Default: true.
    pub raises_on_error: bool,
    /// Reject documents with more pages than this.
    pub max_num_pages: Option<u32>,
    /// Reject files larger than this many bytes (checked before upload).
    pub max_file_size: Option<u64>,
    /// Inclusive 1-based page range to convert.
    pub page_range: Option<(u32, u32)>,
    /// Default: true.
    pub do_ocr: bool,
    /// OCR every page even when it has a text layer. Default: true.
    pub force_ocr: bool,
    pub table_mode: TableMode,
    /// Match predicted table cells back to PDF text cells. Default: false.
    pub do_cell_matching: bool,
    /// Picture rendering scale. Default: 1.0.
    pub images_scale: f32,
    /// Ask for embedded picture bitmaps. Default: true.
    pub include_images: bool,
    /// Per-request timeout in seconds. Default: 600.
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for DoclingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".into(),
            api_key: None,
            raises_on_error: true,
            max_num_pages: None,
            max_file_size: None,
            page_range: None,
            do_ocr: true,
            force_ocr: true,
            table_mode: TableMode::Accurate,
            do_cell_matching: false,
            images_scale: 1.0,
            include_images: true,
            timeout_secs: 600,
            retry: RetryPolicy::default(),
        }
    }
}

impl DoclingConfig {
    /// Defaults overlaid with `DOCLING_SERVE_URL` / `DOCLING_SERVE_API_KEY`.
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Some(url) = credential(ENV_DOCLING_URL) {
            c.base_url = url;
        }
        c.api_key = credential(ENV_DOCLING_API_KEY);
        c
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn raises_on_error(mut self, v: bool) -> Self {
        self.raises_on_error = v;
        self
    }

    pub fn max_num_pages(mut self, n: u32) -> Self {
        self.max_num_pages = Some(n);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn page_range(mut self, first: u32, last: u32) -> Self {
        self.page_range = Some((first, last));
        self
    }

    pub fn table_mode(mut self, mode: TableMode) -> Self {
        self.table_mode = mode;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ParseError::InvalidConfig(format!(
                "docling base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if let Some((first, last)) = self.page_range {
            if first == 0 || last < first {
                return Err(ParseError::InvalidConfig(format!(
                    "page_range must be 1-based and ordered, got ({first}, {last})"
                )));
            }
        }
        if !(self.images_scale > 0.0) {
            return Err(ParseError::InvalidConfig(
                "images_scale must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Native PDF (PDFium) ──────────────────────────────────────────────────

/// Options for the `pymupdf` / `pdfium` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PdfiumConfig {
    /// PDFium library file or the directory holding it. `None`: system library.
    pub lib_path: Option<PathBuf>,
    /// Smallest run of aligned lines treated as a table. Default: 2.
    pub min_table_rows: usize,
    /// Smallest column count treated as a table. Default: 2.
    pub min_table_columns: usize,
}

impl Default for PdfiumConfig {
    fn default() -> Self {
        Self {
            lib_path: None,
            min_table_rows: 2,
            min_table_columns: 2,
        }
    }
}

impl PdfiumConfig {
    /// Defaults overlaid with `PDFIUM_LIB_PATH`.
    pub fn from_env() -> Self {
        Self {
            lib_path: pdfium_lib_from_env(),
            ..Self::default()
        }
    }

    pub fn lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lib_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        if self.min_table_rows < 2 || self.min_table_columns < 2 {
            return Err(ParseError::InvalidConfig(
                "min_table_rows and min_table_columns must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

// ── Cloud parse (LlamaParse) ─────────────────────────────────────────────

/// Options for the `llama` backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlamaConfig {
    pub api_key: Option<String>,
    /// Default: `https://api.cloud.llamaindex.ai`.
    pub base_url: String,
    /// Default: true.
    pub premium_mode: bool,
    /// Default: true.
    pub continuous_mode: bool,
    /// Default: true.
    pub take_screenshot: bool,
    pub disable_ocr: bool,
    pub invalidate_cache: bool,
    pub do_not_cache: bool,
    /// Job status polling. Default: every 2 s, give up after 600 s.
    pub poll: PollPolicy,
    pub retry: RetryPolicy,
    /// Per-request timeout in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.cloud.llamaindex.ai".into(),
            premium_mode: true,
            continuous_mode: true,
            take_screenshot: true,
            disable_ocr: false,
            invalidate_cache: false,
            do_not_cache: false,
            poll: PollPolicy::new(2000, 600),
            retry: RetryPolicy::default(),
            timeout_secs: 120,
        }
    }
}

impl fmt::Debug for LlamaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlamaConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("premium_mode", &self.premium_mode)
            .field("poll", &self.poll)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LlamaConfig {
    /// Defaults with the key from `LLAMA_CLOUD_API_KEY`, else `LLAMA_PARSE_KEY`.
    pub fn from_env() -> Self {
        Self {
            api_key: credential(ENV_LLAMA_KEY).or_else(|| credential(ENV_LLAMA_KEY_LEGACY)),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn poll(mut self, policy: PollPolicy) -> Self {
        self.poll = policy;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// The configured key, or [`ParseError::MissingCredential`].
    pub fn require_api_key(&self) -> Result<&str, ParseError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ParseError::MissingCredential {
                backend: "llama",
                variable: ENV_LLAMA_KEY,
            })
    }
}

// ── LLM vision ───────────────────────────────────────────────────────────

/// Options for the `vision` and `anthropic` backends.
///
/// Built via [`VisionConfig::builder()`], [`VisionConfig::default()`]
/// (OpenAI) or [`VisionConfig::anthropic()`].
///
/// # Example
/// ```rust
/// use parsestudio::VisionConfig;
///
/// let config = VisionConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_tokens(6000)
///     .build()
///     .unwrap();
/// assert_eq!(config.provider, "openai");
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    /// `edgequake-llm` provider name ("openai", "anthropic", "gemini", "ollama", ...).
    pub provider: String,
    pub model: String,
    /// Default: 0.0, transcription wants determinism.
    pub temperature: f32,
    /// Per-page output budget. Default: 4000.
    pub max_tokens: usize,
    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
    pub retry: RetryPolicy,
    /// Overrides the built-in system prompt.
    pub system_prompt: Option<String>,
    pub pdfium_lib_path: Option<PathBuf>,
    /// Pre-constructed provider; takes precedence over `provider`/`model`.
    #[serde(skip)]
    pub llm: Option<Arc<dyn LLMProvider>>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            max_tokens: 4000,
            max_rendered_pixels: 2000,
            retry: RetryPolicy::default(),
            system_prompt: None,
            pdfium_lib_path: None,
            llm: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("retry", &self.retry)
            .field("llm", &self.llm.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish_non_exhaustive()
    }
}

impl VisionConfig {
    /// Defaults for the `anthropic` backend.
    pub fn anthropic() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `PDFIUM_LIB_PATH`.
    pub fn from_env() -> Self {
        Self {
            pdfium_lib_path: pdfium_lib_from_env(),
            ..Self::default()
        }
    }

    pub fn builder() -> VisionConfigBuilder {
        VisionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Environment variable the named provider reads its key from, if known.
    pub fn credential_variable(&self) -> Option<&'static str> {
        match self.provider.to_ascii_lowercase().as_str() {
            "openai" => Some(ENV_OPENAI_KEY),
            "anthropic" => Some(ENV_ANTHROPIC_KEY),
            "gemini" => Some("GEMINI_API_KEY"),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        if self.max_tokens == 0 {
            return Err(ParseError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ParseError::InvalidConfig(format!(
                "temperature must be 0.0–2.0, got {}",
                self.temperature
            )));
        }
        if self.max_rendered_pixels < 100 {
            return Err(ParseError::InvalidConfig(
                "max_rendered_pixels must be ≥ 100".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`VisionConfig`].
#[derive(Debug)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.llm = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<VisionConfig, ParseError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── LLM file search (OpenAI) ─────────────────────────────────────────────

/// Which OpenAI API family drives the extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSearchMode {
    /// One `/responses` call with the `file_search` tool and a strict schema.
    #[default]
    Responses,
    /// Assistant + thread + run, polled to completion.
    Assistant,
}

/// Options for the `openai` backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSearchConfig {
    pub api_key: Option<String>,
    /// Default: `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Default: 8000.
    pub max_tokens: usize,
    pub temperature: f32,
    pub mode: FileSearchMode,
    /// Vector-store indexing. Default: every 1 s, give up after 120 s.
    pub index_poll: PollPolicy,
    /// Assistant runs. Default: every 1 s, give up after 300 s.
    pub run_poll: PollPolicy,
    pub retry: RetryPolicy,
    /// Per-request timeout in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl Default for FileSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 8000,
            temperature: 0.0,
            mode: FileSearchMode::Responses,
            index_poll: PollPolicy::new(1000, 120),
            run_poll: PollPolicy::new(1000, 300),
            retry: RetryPolicy::default(),
            timeout_secs: 120,
        }
    }
}

impl fmt::Debug for FileSearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSearchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("mode", &self.mode)
            .field("index_poll", &self.index_poll)
            .field("run_poll", &self.run_poll)
            .finish_non_exhaustive()
    }
}

impl FileSearchConfig {
    /// Defaults with the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            api_key: credential(ENV_OPENAI_KEY),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn mode(mut self, mode: FileSearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn index_poll(mut self, policy: PollPolicy) -> Self {
        self.index_poll = policy;
        self
    }

    pub fn run_poll(mut self, policy: PollPolicy) -> Self {
        self.run_poll = policy;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// The configured key, or [`ParseError::MissingCredential`].
    pub fn require_api_key(&self) -> Result<&str, ParseError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ParseError::MissingCredential {
                backend: "openai",
                variable: ENV_OPENAI_KEY,
            })
    }
}
