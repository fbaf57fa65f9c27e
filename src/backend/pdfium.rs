//! Native backend: PDFium opened in-process, no network.
//!
//! Text comes from the PDF text layer, images from embedded raster objects.
//! PDFium has no table model, so tables are recovered from the text layer:
//! a run of consecutive lines that split into the same number of
//! whitespace-separated columns is taken as one table.

use super::Backend;
use crate::config::PdfiumConfig;
use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::{ImageElement, Metadata, ParserOutput, TableElement, TextElement};
use crate::pipeline::{input, render};
use crate::table;
use async_trait::async_trait;
use pdfium_render::prelude::PdfPageObjectsCommon;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Column gap: a tab or two or more spaces.
static COLUMN_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+|\s{2,}").expect("valid regex"));

/// Everything PDFium gave us for one page.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub text: String,
    pub images: Vec<DynamicImage>,
}

/// Raw result of the native backend: pages in order.
#[derive(Debug, Clone, Default)]
pub struct NativeDocument {
    pub pages: Vec<PageContent>,
}

/// Reads a PDF's text layer and embedded images.
#[async_trait]
pub trait PdfLibrary: Send + Sync {
    async fn read(&self, path: &Path) -> Result<NativeDocument, BackendError>;
}

/// [`PdfLibrary`] backed by `pdfium-render`.
#[derive(Debug, Clone, Default)]
pub struct Pdfium {
    lib_path: Option<PathBuf>,
}

impl Pdfium {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

#[async_trait]
impl PdfLibrary for Pdfium {
    async fn read(&self, path: &Path) -> Result<NativeDocument, BackendError> {
        let path = path.to_path_buf();
        render::with_pdfium(self.lib_path.clone(), move |pdfium| {
            let document = pdfium
                .load_pdf_from_file(&path, None)
                .map_err(|e| render::open_error(&path, e))?;

            let mut pages = Vec::with_capacity(document.pages().len() as usize);
            for (idx, page) in document.pages().iter().enumerate() {
                let text = page
                    .text()
                    .map_err(|e| BackendError::Pdf {
                        path: path.clone(),
                        detail: format!("page {} text: {e:?}", idx + 1),
                    })?
                    .all();

                let mut images = Vec::new();
                for object in page.objects().iter() {
                    let Some(image) = object.as_image_object() else {
                        continue;
                    };
                    match image.get_raw_image() {
                        Ok(img) => images.push(DynamicImage::ImageRgb8(img.to_rgb8())),
                        Err(e) => warn!("page {}: unreadable image object: {e:?}", idx + 1),
                    }
                }
                debug!("page {}: {} chars, {} image(s)", idx + 1, text.len(), images.len());
                pages.push(PageContent { text, images });
            }
            Ok(NativeDocument { pages })
        })
        .await
    }
}

/// Split `text` into whitespace-aligned tables.
///
/// Returns one cell grid per detected run, header row first. Blank lines
/// end a run; so does a change in column count.
pub fn detect_tables(text: &str, min_rows: usize, min_columns: usize) -> Vec<Vec<Vec<String>>> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    let flush = |run: &mut Vec<Vec<String>>, tables: &mut Vec<Vec<Vec<String>>>| {
        if run.len() >= min_rows {
            tables.push(std::mem::take(run));
        } else {
            run.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        let cells: Vec<String> = if trimmed.is_empty() {
            Vec::new()
        } else {
            COLUMN_GAP.split(trimmed).map(str::to_string).collect()
        };

        if cells.len() < min_columns {
            flush(&mut run, &mut tables);
            continue;
        }
        if run.first().is_some_and(|first| first.len() != cells.len()) {
            flush(&mut run, &mut tables);
        }
        run.push(cells);
    }
    flush(&mut run, &mut tables);
    tables
}

/// The `pymupdf` / `pdfium` backend.
pub struct PdfiumBackend<L = Pdfium> {
    library: L,
    config: PdfiumConfig,
}

impl PdfiumBackend<Pdfium> {
    /// Binds PDFium once up front so a missing library fails here.
    pub fn new(config: PdfiumConfig) -> Result<Self, ParseError> {
        config.validate()?;
        render::probe_pdfium(config.lib_path.as_deref())?;
        Ok(Self {
            library: Pdfium::new(config.lib_path.clone()),
            config,
        })
    }
}

impl<L: PdfLibrary> PdfiumBackend<L> {
    pub fn with_library(library: L, config: PdfiumConfig) -> Result<Self, ParseError> {
        config.validate()?;
        Ok(Self { library, config })
    }

    fn page_tables(&self, page_number: u32, text: &str) -> Vec<TableElement> {
        detect_tables(text, self.config.min_table_rows, self.config.min_table_columns)
            .into_iter()
            .filter_map(|grid| {
                let built = table::grid_table(grid)
                    .map_err(|e| e.to_string())
                    .and_then(|(markdown, df)| {
                        TableElement::new(markdown, df, Metadata::page(page_number))
                            .map_err(|e| e.to_string())
                    });
                match built {
                    Ok(t) => Some(t),
                    Err(e) => {
                        warn!("page {page_number}: skipping table: {e}");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl<L: PdfLibrary> Backend for PdfiumBackend<L> {
    type Raw = NativeDocument;

    fn name(&self) -> &'static str {
        "pymupdf"
    }

    async fn load_one(&self, path: &Path) -> Result<NativeDocument, BackendError> {
        let path = input::check_pdf(path)?;
        self.library.read(&path).await
    }

    async fn export(
        &self,
        raw: NativeDocument,
        modalities: &Modalities,
    ) -> Result<ParserOutput, ParseError> {
        let mut text = String::new();
        let mut tables = Vec::new();
        let mut images = Vec::new();

        for (idx, page) in raw.pages.into_iter().enumerate() {
            let page_number = idx as u32 + 1;
            if modalities.tables() {
                tables.extend(self.page_tables(page_number, &page.text));
            }
            if modalities.text() {
                text.push_str(&page.text);
                text.push('\n');
            }
            if modalities.images() {
                for img in page.images {
                    match ImageElement::new(img, Metadata::page(page_number)) {
                        Ok(el) => images.push(el),
                        Err(e) => warn!("page {page_number}: skipping image: {e}"),
                    }
                }
            }
        }
        ParserOutput::new(TextElement::new(text), tables, images)
    }
}
