//! LLM vision backend: every page rendered to PNG and transcribed by a
//! vision chat model into the structured answer shape.
//!
//! Pages are processed one after another. A page whose model call keeps
//! failing (after the retry policy is exhausted) contributes an empty answer
//! and the document carries on; only a rendering failure sinks the whole
//! document. This backend never produces images.

use super::Backend;
use crate::config::VisionConfig;
use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::{BoundingBox, Metadata, ParserOutput, TableElement, TextElement};
use crate::pipeline::postprocess::{self, StructuredAnswer};
use crate::pipeline::{encode, input, render};
use crate::prompts;
use crate::retry::retry;
use crate::table;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rasterises every page of a PDF.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, path: &Path) -> Result<Vec<DynamicImage>, BackendError>;
}

/// Sends one page image to a model and returns its raw answer.
#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, page: &DynamicImage, page_number: u32) -> Result<String, BackendError>;
}

/// [`PageRenderer`] on PDFium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    lib_path: Option<PathBuf>,
    max_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(lib_path: Option<PathBuf>, max_pixels: u32) -> Self {
        Self { lib_path, max_pixels }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, path: &Path) -> Result<Vec<DynamicImage>, BackendError> {
        let path = path.to_path_buf();
        let max_pixels = self.max_pixels;
        render::with_pdfium(self.lib_path.clone(), move |pdfium| {
            render::render_pages_blocking(pdfium, &path, max_pixels)
        })
        .await
    }
}

/// [`PageAnalyzer`] on an `edgequake-llm` provider.
///
/// The provider API has no structured-output switch, so the schema travels
/// in the system prompt and the answer is validated on our side.
pub struct LlmAnalyzer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &VisionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(prompts::vision_system_prompt_with_schema),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PageAnalyzer for LlmAnalyzer {
    async fn analyze(&self, page: &DynamicImage, page_number: u32) -> Result<String, BackendError> {
        let start = Instant::now();
        let image = encode::encode_page(page)
            .map_err(|e| BackendError::Decode(format!("page {page_number} PNG: {e}")))?;
        let prompt = prompts::vision_user_prompt(page_number);
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(prompt.as_str(), vec![image]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| BackendError::Llm(e.to_string()))?;
        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_number,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Per-page answers, in page order.
#[derive(Debug, Clone, Default)]
pub struct VisionDocument {
    pub pages: Vec<StructuredAnswer>,
}

/// The `vision` and `anthropic` backends.
pub struct VisionBackend<R = PdfiumRenderer, A = LlmAnalyzer> {
    name: &'static str,
    renderer: R,
    analyzer: A,
    config: VisionConfig,
}

impl VisionBackend<PdfiumRenderer, LlmAnalyzer> {
    /// Resolve the provider and bind PDFium.
    ///
    /// A pre-built provider in `config.llm` wins; otherwise the named
    /// provider is created through `ProviderFactory`, after checking that its
    /// API key variable is set.
    pub fn new(name: &'static str, config: VisionConfig) -> Result<Self, ParseError> {
        config.validate()?;
        let provider = match &config.llm {
            Some(p) => Arc::clone(p),
            None => {
                if let Some(variable) = config.credential_variable() {
                    if crate::config::credential(variable).is_none() {
                        return Err(ParseError::MissingCredential { backend: name, variable });
                    }
                }
                ProviderFactory::create_llm_provider(&config.provider, &config.model).map_err(|e| {
                    ParseError::InvalidConfig(format!(
                        "cannot create LLM provider '{}' / '{}': {e}",
                        config.provider, config.model
                    ))
                })?
            }
        };
        render::probe_pdfium(config.pdfium_lib_path.as_deref())?;
        info!("{name}: using provider '{}' model '{}'", config.provider, config.model);

        let renderer = PdfiumRenderer::new(config.pdfium_lib_path.clone(), config.max_rendered_pixels);
        let analyzer = LlmAnalyzer::new(provider, &config);
        Ok(Self {
            name,
            renderer,
            analyzer,
            config,
        })
    }
}

impl<R: PageRenderer, A: PageAnalyzer> VisionBackend<R, A> {
    pub fn with_parts(name: &'static str, renderer: R, analyzer: A, config: VisionConfig) -> Self {
        Self {
            name,
            renderer,
            analyzer,
            config,
        }
    }

    async fn analyze_page(&self, page: &DynamicImage, page_number: u32) -> StructuredAnswer {
        let analyzer = &self.analyzer;
        let what = format!("page {page_number}");
        let answer = retry(&self.config.retry, &what, move |_| async move {
            let raw = analyzer.analyze(page, page_number).await?;
            postprocess::parse_structured_answer(&raw)
        })
        .await;
        match answer {
            Ok(a) => a,
            Err(e) => {
                warn!("{}: page {page_number} gave no usable answer, leaving it empty: {e}", self.name);
                StructuredAnswer::default()
            }
        }
    }
}

fn page_tables(page_index: u32, answer: &StructuredAnswer) -> Vec<TableElement> {
    let mut tables = Vec::new();
    for t in &answer.tables {
        let markdown = postprocess::clean_table_markdown(&t.markdown);
        let df = match table::parse_markdown_table(&markdown) {
            Ok(df) => df,
            Err(e) => {
                warn!("page {page_index}: skipping table: {e}");
                continue;
            }
        };
        let bbox = t.bbox.as_deref().map(BoundingBox::from_slice).unwrap_or_default();
        let metadata = Metadata::new(t.page_or(page_index), bbox);
        match TableElement::new(markdown, df, metadata) {
            Ok(el) => tables.push(el),
            Err(e) => warn!("page {page_index}: skipping table: {e}"),
        }
    }
    tables
}

#[async_trait]
impl<R: PageRenderer, A: PageAnalyzer> Backend for VisionBackend<R, A> {
    type Raw = VisionDocument;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn load_one(&self, path: &Path) -> Result<VisionDocument, BackendError> {
        let path = input::check_pdf(path)?;
        let images = self.renderer.render(&path).await?;
        info!("{}: {} page(s) rendered for {}", self.name, images.len(), path.display());

        let mut pages = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            pages.push(self.analyze_page(image, idx as u32 + 1).await);
        }
        Ok(VisionDocument { pages })
    }

    async fn export(&self, raw: VisionDocument, modalities: &Modalities) -> Result<ParserOutput, ParseError> {
        let mut text = String::new();
        let mut tables = Vec::new();
        for (idx, answer) in raw.pages.iter().enumerate() {
            let page_number = idx as u32 + 1;
            if modalities.text() {
                text.push_str(&format!("\n--- Page {page_number} ---\n"));
                text.push_str(&answer.text_content);
            }
            if modalities.tables() {
                tables.extend(page_tables(page_number, answer));
            }
        }
        ParserOutput::new(TextElement::new(text), tables, Vec::new())
    }
}
