//! Backend adapters and the batch driver they share.
//!
//! Every adapter implements [`Backend`]: a lazy `load` producing one raw,
//! engine-specific result per input document, and an `export` that turns a
//! raw result into the common [`ParserOutput`] for the requested modalities.
//! [`run`] owns everything around that: modality validation before any I/O,
//! strict input order, per-document failure isolation and progress events.
//!
//! ## Data Flow
//!
//! ```text
//! paths ──▶ validate ──▶ load (stream) ──▶ export ──▶ Vec<ParserOutput>
//!                            │ Err
//!                            └──▶ empty output (or abort when fail-fast)
//! ```
//!
//! Adapters talk to their engines through narrow traits
//! ([`docling::LayoutEngine`], [`pdfium::PdfLibrary`],
//! [`llama::CloudParseApi`], [`vision::PageRenderer`] +
//! [`vision::PageAnalyzer`], [`file_search::FileSearchApi`]) so tests can
//! swap in mocks.

pub mod docling;
pub mod file_search;
pub(crate) mod http;
pub mod llama;
pub mod pdfium;
pub mod vision;

use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::ParserOutput;
use crate::progress::ParseProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The contract every extraction backend fulfils.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Engine-specific result for one document.
    type Raw: Send;

    /// Registry name, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether one failed document aborts the whole call.
    fn fail_fast(&self) -> bool {
        false
    }

    /// Reject unknown modality names before any I/O.
    fn validate_modalities(&self, requested: &[&str]) -> Result<Modalities, ParseError> {
        Modalities::parse(requested)
    }

    /// Produce the raw result for one document.
    async fn load_one(&self, path: &Path) -> Result<Self::Raw, BackendError>;

    /// Lazy, finite stream of raw results, one per path, in input order.
    fn load<'a>(&'a self, paths: &'a [PathBuf]) -> BoxStream<'a, Result<Self::Raw, BackendError>> {
        stream::iter(paths.iter())
            .then(move |p| self.load_one(p))
            .boxed()
    }

    /// Turn one raw result into the common output model.
    ///
    /// Unrequested text is an empty string; unrequested tables and images
    /// are empty lists.
    async fn export(
        &self,
        raw: Self::Raw,
        modalities: &Modalities,
    ) -> Result<ParserOutput, ParseError>;
}

/// Object-safe view of a [`Backend`], used by the facade.
#[async_trait]
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    async fn parse(
        &self,
        paths: &[PathBuf],
        modalities: &[&str],
        progress: &dyn ParseProgressCallback,
    ) -> Result<Vec<ParserOutput>, ParseError>;
}

#[async_trait]
impl<B: Backend> Parser for B {
    fn name(&self) -> &'static str {
        Backend::name(self)
    }

    async fn parse(
        &self,
        paths: &[PathBuf],
        modalities: &[&str],
        progress: &dyn ParseProgressCallback,
    ) -> Result<Vec<ParserOutput>, ParseError> {
        run(self, paths, modalities, progress).await
    }
}

/// Parse every path with `backend`, one [`ParserOutput`] per path, in order.
///
/// A document whose load fails yields [`ParserOutput::empty()`] and a
/// warning, unless the backend is fail-fast, in which case the call returns
/// [`ParseError::ConversionFailed`].
pub async fn run<B: Backend>(
    backend: &B,
    paths: &[PathBuf],
    modalities: &[&str],
    progress: &dyn ParseProgressCallback,
) -> Result<Vec<ParserOutput>, ParseError> {
    let modalities = backend.validate_modalities(modalities)?;
    let name = Backend::name(backend);
    let total = paths.len();
    info!("Parsing {total} document(s) with '{name}' ({modalities})");
    progress.on_parse_start(name, total);

    let mut outputs = Vec::with_capacity(total);
    let mut successes = 0;
    let mut raws = backend.load(paths);

    for (index, path) in paths.iter().enumerate() {
        progress.on_document_start(index, total, path);
        let raw = raws.next().await.ok_or_else(|| {
            ParseError::Internal(format!(
                "backend '{name}' produced fewer results than inputs"
            ))
        })?;

        match raw {
            Ok(raw) => {
                let output = backend.export(raw, &modalities).await?;
                debug!(
                    "{}: {} chars, {} table(s), {} image(s)",
                    path.display(),
                    output.text.text.len(),
                    output.tables.len(),
                    output.images.len()
                );
                progress.on_document_complete(index, total, output.text.text.len());
                successes += 1;
                outputs.push(output);
            }
            Err(e) if backend.fail_fast() => {
                progress.on_document_error(index, total, &e.to_string());
                return Err(ParseError::ConversionFailed {
                    path: path.clone(),
                    source: e,
                });
            }
            Err(e) => {
                warn!("{name}: {} failed, returning empty result: {e}", path.display());
                progress.on_document_error(index, total, &e.to_string());
                outputs.push(ParserOutput::empty());
            }
        }
    }

    progress.on_parse_complete(total, successes);
    Ok(outputs)
}
