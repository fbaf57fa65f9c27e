//! Input resolution: validate a user-supplied path before any engine sees it.
//!
//! Every backend runs these checks first so a missing file or a renamed
//! `.docx` surfaces as a clear per-document error instead of an opaque
//! failure deep inside PDFium or a remote service. The `%PDF` magic is
//! checked up front for the same reason.

use crate::error::BackendError;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

static PAGE_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/Type\s*/Page\b").expect("valid regex"));

/// A PDF read fully into memory, ready to upload.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    pub path: PathBuf,
    /// Name sent in multipart form data.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn check_pdf(path: &Path) -> Result<PathBuf, BackendError> {
    if !path.exists() {
        return Err(BackendError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let f = std::fs::File::open(path).map_err(|source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut head = Vec::with_capacity(4);
    f.take(4)
        .read_to_end(&mut head)
        .map_err(|source| BackendError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut magic = [0u8; 4];
    magic[..head.len()].copy_from_slice(&head);
    if head.len() < 4 || &magic != b"%PDF" {
        return Err(BackendError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path.to_path_buf())
}

/// Validate and read a PDF for upload to a remote engine.
pub async fn read_pdf(path: &Path) -> Result<PdfUpload, BackendError> {
    let path = check_pdf(path)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| BackendError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(PdfUpload {
        file_name: file_name(&path),
        path,
        bytes,
    })
}

/// Number of page objects (`/Type /Page`) visible in the raw bytes.
///
/// Pages declared inside compressed object streams are not seen, so this
/// is a lower bound.
pub fn count_page_objects(bytes: &[u8]) -> usize {
    PAGE_OBJECT.find_iter(bytes).count()
}

/// Final path component, or `document.pdf` when there is none.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document.pdf".to_string())
}
