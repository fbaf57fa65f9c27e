//! The common output model every backend adapter converges on.
//!
//! These are plain value types: created fresh for each parse call, immutable
//! once returned, never cached. The only behaviour is construction-time
//! validation, which guards the adapter → caller contract rather than user
//! input.

use crate::error::ParseError;
use crate::pipeline::encode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView};
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

/// Item position on its page: `[left, top, right, bottom]`.
///
/// Coordinates are in whatever unit the backend reports (PDF points for the
/// layout engine, pixels for vision models). `[0, 0, 0, 0]` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f64; 4]);

impl BoundingBox {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self([left, top, right, bottom])
    }

    pub fn left(&self) -> f64 {
        self.0[0]
    }

    pub fn top(&self) -> f64 {
        self.0[1]
    }

    pub fn right(&self) -> f64 {
        self.0[2]
    }

    pub fn bottom(&self) -> f64 {
        self.0[3]
    }

    /// True for the `[0, 0, 0, 0]` placeholder.
    pub fn is_unknown(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Build from an arbitrary list; anything other than four numbers is
    /// treated as unknown.
    pub fn from_slice(values: &[f64]) -> Self {
        match values {
            [l, t, r, b] => Self::new(*l, *t, *r, *b),
            _ => Self::default(),
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self(v)
    }
}

/// Provenance of one table or image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// 1-based page number.
    pub page_number: u32,
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            page_number: 1,
            bounding_box: BoundingBox::default(),
        }
    }
}

impl Metadata {
    /// Page 0 is clamped to 1.
    pub fn new(page_number: u32, bounding_box: BoundingBox) -> Self {
        Self {
            page_number: page_number.max(1),
            bounding_box,
        }
    }

    pub fn page(page_number: u32) -> Self {
        Self::new(page_number, BoundingBox::default())
    }
}

/// All text of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextElement {
    pub text: String,
}

impl TextElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A small column-oriented table: named columns and rows of nullable cells.
///
/// Rows are not required to have as many cells as there are columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Build from rows of plain strings (every cell present).
    pub fn from_strings(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            columns,
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(Some).collect())
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Cell text at `(row, col)`, `None` when absent or null.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// Values of the first column with the given name.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).and_then(|c| c.as_deref()))
                .collect(),
        )
    }
}

/// One extracted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableElement {
    /// GitHub-flavoured markdown rendering.
    pub markdown: String,
    pub dataframe: DataFrame,
    pub metadata: Metadata,
}

impl TableElement {
    /// Fails when `markdown` is blank.
    pub fn new(
        markdown: impl Into<String>,
        dataframe: DataFrame,
        metadata: Metadata,
    ) -> Result<Self, ParseError> {
        let markdown = markdown.into();
        if markdown.trim().is_empty() {
            return Err(ParseError::InvalidOutputShape(
                "table markdown must be a non-empty string".into(),
            ));
        }
        Ok(Self {
            markdown,
            dataframe,
            metadata,
        })
    }
}

/// One extracted raster image.
#[derive(Debug, Clone)]
pub struct ImageElement {
    pub image: DynamicImage,
    pub metadata: Metadata,
}

impl ImageElement {
    /// Fails when the bitmap has a zero dimension.
    pub fn new(image: DynamicImage, metadata: Metadata) -> Result<Self, ParseError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(ParseError::InvalidOutputShape(format!(
                "image must have non-zero dimensions, got {w}x{h}"
            )));
        }
        Ok(Self { image, metadata })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl Serialize for ImageElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let png = encode::encode_png(&self.image).map_err(S::Error::custom)?;
        let mut s = serializer.serialize_struct("ImageElement", 4)?;
        s.serialize_field("width", &self.width())?;
        s.serialize_field("height", &self.height())?;
        s.serialize_field("png_base64", &STANDARD.encode(png))?;
        s.serialize_field("metadata", &self.metadata)?;
        s.end()
    }
}

/// Everything extracted from one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParserOutput {
    pub text: TextElement,
    pub tables: Vec<TableElement>,
    pub images: Vec<ImageElement>,
}

impl ParserOutput {
    /// Validate and assemble a document result.
    pub fn new(
        text: TextElement,
        tables: Vec<TableElement>,
        images: Vec<ImageElement>,
    ) -> Result<Self, ParseError> {
        if let Some(idx) = tables.iter().position(|t| t.markdown.trim().is_empty()) {
            return Err(ParseError::InvalidOutputShape(format!(
                "table {idx} has an empty markdown string"
            )));
        }
        if let Some(idx) = images
            .iter()
            .position(|i| i.image.width() == 0 || i.image.height() == 0)
        {
            return Err(ParseError::InvalidOutputShape(format!(
                "image {idx} has a zero dimension"
            )));
        }
        Ok(Self {
            text,
            tables,
            images,
        })
    }

    /// The result substituted for a document that failed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tables.is_empty() && self.images.is_empty()
    }
}
