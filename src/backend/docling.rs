//! Layout-model backend: documents go to a docling-serve instance, which runs
//! layout analysis, OCR and the table-structure model and answers with
//! markdown plus a DoclingDocument JSON tree.
//!
//! Only the slice of DoclingDocument this crate reads is modelled: `tables`
//! (provenance and cell data), `pictures` (provenance and embedded image)
//! and `pages` (for the page-count limit). Everything else is ignored.

use super::http;
use super::Backend;
use crate::config::DoclingConfig;
use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::{BoundingBox, ImageElement, Metadata, ParserOutput, TableElement, TextElement};
use crate::pipeline::{encode, input, input::PdfUpload};
use crate::retry::retry;
use crate::table;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

const SERVICE: &str = "docling-serve";

// ── DoclingDocument subset ───────────────────────────────────────────────

/// Where on which page an item sits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProvenanceItem {
    pub page_no: u32,
    pub bbox: DoclingBox,
}

/// Docling bounding box (`l, t, r, b`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DoclingBox {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub text: String,
    pub start_row_offset_idx: Option<usize>,
    pub end_row_offset_idx: Option<usize>,
    pub start_col_offset_idx: Option<usize>,
    pub end_col_offset_idx: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub num_rows: usize,
    #[serde(default)]
    pub num_cols: usize,
    #[serde(default)]
    pub grid: Vec<Vec<TableCell>>,
    #[serde(default)]
    pub table_cells: Vec<TableCell>,
}

impl TableData {
    /// Cell texts row by row. Uses `grid` when the engine sent one, else
    /// rebuilds it from `table_cells`, repeating spanning cells into every
    /// position they cover.
    pub fn text_grid(&self) -> Vec<Vec<String>> {
        if !self.grid.is_empty() {
            return self
                .grid
                .iter()
                .map(|row| row.iter().map(|c| c.text.clone()).collect())
                .collect();
        }
        let mut grid = vec![vec![String::new(); self.num_cols]; self.num_rows];
        for cell in &self.table_cells {
            let (Some(r0), Some(c0)) = (cell.start_row_offset_idx, cell.start_col_offset_idx) else {
                continue;
            };
            let r1 = cell.end_row_offset_idx.unwrap_or(r0 + 1).max(r0 + 1);
            let c1 = cell.end_col_offset_idx.unwrap_or(c0 + 1).max(c0 + 1);
            for row in grid.iter_mut().take(r1).skip(r0) {
                for slot in row.iter_mut().take(c1).skip(c0) {
                    slot.clone_from(&cell.text);
                }
            }
        }
        grid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableItem {
    #[serde(default)]
    pub prov: Vec<ProvenanceItem>,
    #[serde(default)]
    pub data: TableData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageRef {
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PictureItem {
    #[serde(default)]
    pub prov: Vec<ProvenanceItem>,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DoclingDocument {
    #[serde(default)]
    pub tables: Vec<TableItem>,
    #[serde(default)]
    pub pictures: Vec<PictureItem>,
    #[serde(default)]
    pub pages: BTreeMap<String, serde_json::Value>,
}

fn metadata_of(prov: &[ProvenanceItem]) -> Metadata {
    match prov.first() {
        Some(p) => Metadata::new(
            p.page_no,
            BoundingBox::new(p.bbox.l, p.bbox.t, p.bbox.r, p.bbox.b),
        ),
        None => Metadata::default(),
    }
}

// ── Engine seam ──────────────────────────────────────────────────────────

/// Outcome reported by the layout engine for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Success,
    PartialSuccess,
    Failure,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Success => "success",
            ConversionStatus::PartialSuccess => "partial_success",
            ConversionStatus::Failure => "failure",
            ConversionStatus::Skipped => "skipped",
            ConversionStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The layout engine's answer for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DoclingResult {
    pub status: ConversionStatus,
    pub markdown: String,
    pub document: DoclingDocument,
    pub errors: Vec<String>,
}

/// Converts one PDF into markdown and a DoclingDocument.
#[async_trait]
pub trait LayoutEngine: Send + Sync {
    async fn convert(
        &self,
        upload: &PdfUpload,
        config: &DoclingConfig,
    ) -> Result<DoclingResult, BackendError>;
}

// ── docling-serve client ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct ConvertResponse {
    document: ExportDocument,
    status: ConversionStatus,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ExportDocument {
    #[serde(default)]
    md_content: Option<String>,
    #[serde(default)]
    json_content: Option<DoclingDocument>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    error_message: String,
}

/// `POST /v1/convert/file` on a docling-serve instance.
pub struct DoclingServe {
    client: reqwest::Client,
}

impl DoclingServe {
    pub fn new(config: &DoclingConfig) -> Result<Self, ParseError> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
        })
    }

    fn form(upload: &PdfUpload, config: &DoclingConfig) -> Result<Form, BackendError> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Decode(format!("multipart: {e}")))?;
        let mut form = Form::new()
            .part("files", part)
            .text("to_formats", "md")
            .text("to_formats", "json")
            .text("do_ocr", config.do_ocr.to_string())
            .text("force_ocr", config.force_ocr.to_string())
            .text("do_table_structure", "true")
            .text("table_mode", config.table_mode.as_str())
            .text("do_cell_matching", config.do_cell_matching.to_string())
            .text("include_images", config.include_images.to_string())
            .text("image_export_mode", "embedded")
            .text("images_scale", config.images_scale.to_string())
            .text("abort_on_error", config.raises_on_error.to_string());
        if let Some((first, last)) = config.page_range {
            form = form
                .text("page_range", first.to_string())
                .text("page_range", last.to_string());
        }
        Ok(form)
    }
}

#[async_trait]
impl LayoutEngine for DoclingServe {
    async fn convert(
        &self,
        upload: &PdfUpload,
        config: &DoclingConfig,
    ) -> Result<DoclingResult, BackendError> {
        let mut req = self
            .client
            .post(http::join(&config.base_url, "/v1/convert/file"))
            .multipart(Self::form(upload, config)?);
        if let Some(key) = &config.api_key {
            req = req.header("X-Api-Key", key);
        }
        let resp = req.send().await.map_err(http::send_error(SERVICE))?;
        let body: ConvertResponse = http::json(SERVICE, resp).await?;
        Ok(DoclingResult {
            status: body.status,
            markdown: body.document.md_content.unwrap_or_default(),
            document: body.document.json_content.unwrap_or_default(),
            errors: body.errors.into_iter().map(|e| e.error_message).collect(),
        })
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// The `docling` backend.
pub struct DoclingBackend<E = DoclingServe> {
    engine: E,
    config: DoclingConfig,
}

impl DoclingBackend<DoclingServe> {
    pub fn new(config: DoclingConfig) -> Result<Self, ParseError> {
        config.validate()?;
        let engine = DoclingServe::new(&config)?;
        Ok(Self { engine, config })
    }
}

impl<E: LayoutEngine> DoclingBackend<E> {
    /// Use a custom engine (tests, alternative deployments).
    pub fn with_engine(engine: E, config: DoclingConfig) -> Result<Self, ParseError> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    fn extract_tables(document: &DoclingDocument) -> Vec<TableElement> {
        let mut tables = Vec::with_capacity(document.tables.len());
        for (idx, item) in document.tables.iter().enumerate() {
            let built = table::grid_table(item.data.text_grid())
                .map_err(|e| e.to_string())
                .and_then(|(markdown, df)| {
                    TableElement::new(markdown, df, metadata_of(&item.prov)).map_err(|e| e.to_string())
                });
            match built {
                Ok(t) => tables.push(t),
                Err(e) => warn!("docling: skipping table {idx}: {e}"),
            }
        }
        // page order; tables on one page keep the engine's order
        tables.sort_by_key(|t| t.metadata.page_number);
        tables
    }

    fn extract_images(document: &DoclingDocument) -> Vec<ImageElement> {
        let mut images = Vec::new();
        for (idx, item) in document.pictures.iter().enumerate() {
            let Some(image) = &item.image else {
                debug!("docling: picture {idx} has no embedded image");
                continue;
            };
            let decoded = encode::decode_data_uri(&image.uri)
                .map_err(|e| e.to_string())
                .and_then(|img| ImageElement::new(img, metadata_of(&item.prov)).map_err(|e| e.to_string()));
            match decoded {
                Ok(img) => images.push(img),
                Err(e) => warn!("docling: skipping picture {idx}: {e}"),
            }
        }
        images
    }
}

#[async_trait]
impl<E: LayoutEngine> Backend for DoclingBackend<E> {
    type Raw = DoclingResult;

    fn name(&self) -> &'static str {
        "docling"
    }

    fn fail_fast(&self) -> bool {
        self.config.raises_on_error
    }

    async fn load_one(&self, path: &Path) -> Result<DoclingResult, BackendError> {
        let upload = input::read_pdf(path).await?;
        if let Some(limit) = self.config.max_file_size {
            if upload.len() as u64 > limit {
                return Err(BackendError::LimitExceeded {
                    path: upload.path.clone(),
                    detail: format!("{} bytes > max_file_size {limit}", upload.len()),
                });
            }
        }
        if let Some(limit) = self.config.max_num_pages {
            let pages = input::count_page_objects(&upload.bytes);
            if pages > limit as usize {
                return Err(BackendError::LimitExceeded {
                    path: upload.path.clone(),
                    detail: format!("{pages} pages > max_num_pages {limit}"),
                });
            }
        }

        let upload = &upload;
        let engine = &self.engine;
        let config = &self.config;
        let result = retry(&config.retry, "docling convert", move |_| {
            engine.convert(upload, config)
        })
        .await?;

        if result.status != ConversionStatus::Success {
            return Err(BackendError::Conversion {
                status: result.status.to_string(),
                detail: result.errors.join("; "),
            });
        }
        // page objects hidden in compressed streams only show up here
        if let Some(limit) = self.config.max_num_pages {
            let pages = result.document.pages.len();
            if pages > limit as usize {
                return Err(BackendError::LimitExceeded {
                    path: upload.path.clone(),
                    detail: format!("{pages} pages > max_num_pages {limit}"),
                });
            }
        }
        Ok(result)
    }

    async fn export(
        &self,
        raw: DoclingResult,
        modalities: &Modalities,
    ) -> Result<ParserOutput, ParseError> {
        let text = if modalities.text() {
            TextElement::new(raw.markdown)
        } else {
            TextElement::default()
        };
        let tables = if modalities.tables() {
            Self::extract_tables(&raw.document)
        } else {
            Vec::new()
        };
        let images = if modalities.images() {
            Self::extract_images(&raw.document)
        } else {
            Vec::new()
        };
        ParserOutput::new(text, tables, images)
    }
}
