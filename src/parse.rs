//! The facade: pick one backend by name or config, then parse.
//!
//! ```rust,no_run
//! use parsestudio::PdfParser;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), parsestudio::ParseError> {
//! let parser = PdfParser::from_name("docling", json!({ "max_num_pages": 50 }))?;
//! let docs = parser.parse("report.pdf", &["text", "tables"]).await?;
//! println!("{}", docs[0].text.text);
//! # Ok(())
//! # }
//! ```

use crate::backend::docling::DoclingBackend;
use crate::backend::file_search::FileSearchBackend;
use crate::backend::llama::LlamaBackend;
use crate::backend::pdfium::PdfiumBackend;
use crate::backend::vision::VisionBackend;
use crate::backend::Parser;
use crate::config::{DoclingConfig, FileSearchConfig, LlamaConfig, PdfiumConfig, VisionConfig};
use crate::error::ParseError;
use crate::modality::Modality;
use crate::output::ParserOutput;
use crate::progress::{self, ParseProgressCallback, ProgressCallback};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Every name [`PdfParser::from_name`] accepts (case-insensitive).
pub const BACKEND_NAMES: [&str; 7] = [
    "docling",
    "llama",
    "pymupdf",
    "pdfium",
    "vision",
    "anthropic",
    "openai",
];

/// Backend selection with its options.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Layout model via docling-serve.
    Docling(DoclingConfig),
    /// Native PDFium (`pymupdf` / `pdfium`).
    Pdfium(PdfiumConfig),
    /// LlamaParse.
    Llama(LlamaConfig),
    /// Per-page vision model, OpenAI defaults.
    Vision(VisionConfig),
    /// Per-page vision model, Anthropic defaults.
    Anthropic(VisionConfig),
    /// OpenAI file search.
    FileSearch(FileSearchConfig),
}

impl BackendConfig {
    /// Environment-derived defaults for a backend name.
    pub fn from_env(name: &str) -> Result<Self, ParseError> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "docling" => BackendConfig::Docling(DoclingConfig::from_env()),
            "pymupdf" | "pdfium" => BackendConfig::Pdfium(PdfiumConfig::from_env()),
            "llama" => BackendConfig::Llama(LlamaConfig::from_env()),
            "vision" => BackendConfig::Vision(VisionConfig::from_env()),
            "anthropic" => BackendConfig::Anthropic(VisionConfig {
                pdfium_lib_path: VisionConfig::from_env().pdfium_lib_path,
                ..VisionConfig::anthropic()
            }),
            "openai" => BackendConfig::FileSearch(FileSearchConfig::from_env()),
            _ => {
                return Err(ParseError::UnknownBackend {
                    name: name.to_string(),
                    valid: BACKEND_NAMES.to_vec(),
                })
            }
        })
    }

    /// Overlay a JSON options object onto this config.
    ///
    /// `null` leaves the config untouched; unknown option names are
    /// rejected.
    pub fn with_options(self, options: Value) -> Result<Self, ParseError> {
        Ok(match self {
            BackendConfig::Docling(c) => BackendConfig::Docling(overlay(c, options)?),
            BackendConfig::Pdfium(c) => BackendConfig::Pdfium(overlay(c, options)?),
            BackendConfig::Llama(c) => BackendConfig::Llama(overlay(c, options)?),
            BackendConfig::Vision(c) => BackendConfig::Vision(overlay_vision(c, options)?),
            BackendConfig::Anthropic(c) => BackendConfig::Anthropic(overlay_vision(c, options)?),
            BackendConfig::FileSearch(c) => BackendConfig::FileSearch(overlay(c, options)?),
        })
    }
}

fn overlay<T: Serialize + DeserializeOwned>(base: T, options: Value) -> Result<T, ParseError> {
    let overrides = match options {
        Value::Null => return Ok(base),
        Value::Object(map) => map,
        other => {
            return Err(ParseError::InvalidConfig(format!(
                "backend options must be a JSON object, got {other}"
            )))
        }
    };
    let mut merged = serde_json::to_value(&base)
        .map_err(|e| ParseError::InvalidConfig(format!("cannot serialise defaults: {e}")))?;
    if let Value::Object(fields) = &mut merged {
        fields.extend(overrides);
    }
    serde_json::from_value(merged).map_err(|e| ParseError::InvalidConfig(e.to_string()))
}

/// The provider handle is not serialisable; carry it across the overlay.
fn overlay_vision(base: VisionConfig, options: Value) -> Result<VisionConfig, ParseError> {
    let llm = base.llm.clone();
    let mut merged = overlay(base, options)?;
    merged.llm = llm;
    Ok(merged)
}

/// Anything that names one or more input files.
pub trait Inputs {
    fn into_paths(self) -> Vec<PathBuf>;
}

impl Inputs for &str {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl Inputs for String {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl Inputs for &String {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl Inputs for PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self]
    }
}

impl Inputs for &PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.clone()]
    }
}

impl Inputs for &Path {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.to_path_buf()]
    }
}

impl<T: Into<PathBuf>> Inputs for Vec<T> {
    fn into_paths(self) -> Vec<PathBuf> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: AsRef<Path>> Inputs for &[T] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

impl<T: AsRef<Path>, const N: usize> Inputs for [T; N] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

/// One configured backend plus a progress sink.
pub struct PdfParser {
    backend: Box<dyn Parser>,
    progress: ProgressCallback,
}

impl PdfParser {
    /// Instantiate the backend described by `config`.
    ///
    /// Credential, option and PDFium-binding problems surface here, before
    /// any document is touched.
    pub fn new(config: BackendConfig) -> Result<Self, ParseError> {
        let backend: Box<dyn Parser> = match config {
            BackendConfig::Docling(c) => Box::new(DoclingBackend::new(c)?),
            BackendConfig::Pdfium(c) => Box::new(PdfiumBackend::new(c)?),
            BackendConfig::Llama(c) => Box::new(LlamaBackend::new(c)?),
            BackendConfig::Vision(c) => Box::new(VisionBackend::new("vision", c)?),
            BackendConfig::Anthropic(c) => Box::new(VisionBackend::new("anthropic", c)?),
            BackendConfig::FileSearch(c) => Box::new(FileSearchBackend::new(c)?),
        };
        info!("Selected backend '{}'", backend.name());
        Ok(Self::with_backend(backend))
    }

    /// Select a backend by name, environment defaults overlaid with
    /// `options` (a JSON object or `null`).
    pub fn from_name(name: &str, options: Value) -> Result<Self, ParseError> {
        let config = BackendConfig::from_env(name)?.with_options(options)?;
        Self::new(config)
    }

    /// Wrap an already-built backend.
    pub fn with_backend(backend: Box<dyn Parser>) -> Self {
        Self {
            backend,
            progress: progress::noop(),
        }
    }

    pub fn with_progress(mut self, callback: Arc<dyn ParseProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Parse one or many documents; one output per input, in input order.
    pub async fn parse<I: Inputs>(
        &self,
        inputs: I,
        modalities: &[&str],
    ) -> Result<Vec<ParserOutput>, ParseError> {
        let paths = inputs.into_paths();
        self.backend
            .parse(&paths, modalities, self.progress.as_ref())
            .await
    }

    /// [`parse`](Self::parse) with every modality.
    pub async fn run<I: Inputs>(&self, inputs: I) -> Result<Vec<ParserOutput>, ParseError> {
        let all = Modality::ALL.map(|m| m.as_str());
        self.parse(inputs, &all).await
    }
}
