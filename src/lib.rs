//! # parsestudio
//!
//! One interface over several PDF extraction back ends. Whichever engine
//! does the work, every document comes back as the same [`ParserOutput`]:
//! its text, its tables (markdown plus a [`DataFrame`]) and its images, each
//! table and image tagged with a page number and bounding box.
//!
//! ## Back ends
//!
//! | Name | Engine | Network |
//! |------|--------|---------|
//! | `docling` | docling-serve layout model (OCR, table structure) | HTTP |
//! | `pymupdf` / `pdfium` | PDFium text layer and embedded images | none |
//! | `llama` | LlamaParse cloud jobs | HTTPS |
//! | `vision` / `anthropic` | page images sent to a vision chat model | HTTPS |
//! | `openai` | OpenAI file search over a vector store | HTTPS |
//!
//! ## Flow
//!
//! ```text
//! paths ─▶ PdfParser ─▶ backend::run ─▶ validate modalities
//!                                     ─▶ load (one raw result per PDF)
//!                                     ─▶ export ─▶ Vec<ParserOutput>
//! ```
//!
//! A document that fails is logged and returned as an empty
//! [`ParserOutput`], so the output list always lines up with the input list.
//! The layout-model backend is the exception: by default a failed
//! conversion aborts the call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parsestudio::{PdfParser, PdfiumConfig, BackendConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let parser = PdfParser::new(BackendConfig::Pdfium(PdfiumConfig::from_env()))?;
//!     let docs = parser.run(vec!["a.pdf", "b.pdf"]).await?;
//!     for doc in &docs {
//!         println!("{} chars, {} tables", doc.text.text.len(), doc.tables.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `parsestudio` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod modality;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{run, Backend, Parser};
pub use config::{
    DoclingConfig, FileSearchConfig, FileSearchMode, LlamaConfig, PdfiumConfig, TableMode,
    VisionConfig, VisionConfigBuilder,
};
pub use error::{BackendError, ParseError};
pub use modality::{Modalities, Modality};
pub use output::{
    BoundingBox, DataFrame, ImageElement, Metadata, ParserOutput, TableElement, TextElement,
};
pub use parse::{BackendConfig, Inputs, PdfParser, BACKEND_NAMES};
pub use poll::{JobStatus, PollPolicy, PollState, Poller};
pub use progress::{NoopProgressCallback, ParseProgressCallback};
pub use retry::{Backoff, RetryPolicy};
pub use table::{grid_table, parse_csv_table, parse_markdown_table, render_markdown, TableParseFailure};
