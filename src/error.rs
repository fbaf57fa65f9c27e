//! Error types for the parsestudio library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ParseError`]: **Fatal**: the call cannot proceed at all (unknown
//!   backend, invalid modality, missing credential, bad options). Returned
//!   as `Err(ParseError)` from constructors and from `parse`, always before
//!   any backend I/O when it concerns configuration or validation.
//!
//! * [`BackendError`]: **Per-document**: one document (or one page, one
//!   request) failed inside an adapter. The batch driver catches it at the
//!   document boundary and substitutes an empty [`crate::output::ParserOutput`],
//!   except for fail-fast backends where it is wrapped in
//!   [`ParseError::ConversionFailed`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the parsestudio library.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Selection / validation ───────────────────────────────────────────
    /// The requested backend name is not registered.
    #[error("Invalid parser: '{name}'. Valid options are: {}", valid.join(", "))]
    UnknownBackend {
        name: String,
        valid: Vec<&'static str>,
    },

    /// One or more requested modalities are outside the fixed set.
    #[error("Invalid modalities: {invalid:?}. Valid: {valid:?}")]
    InvalidModality {
        invalid: Vec<String>,
        valid: Vec<&'static str>,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// A backend needs a credential that was not supplied.
    #[error("Backend '{backend}' requires an API key.\nSet {variable} or pass `api_key` in the backend options.")]
    MissingCredential {
        backend: &'static str,
        variable: &'static str,
    },

    /// Option validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// An adapter produced a value that violates the common output model.
    #[error("Invalid output shape: {0}")]
    InvalidOutputShape(String),

    /// A fail-fast backend could not convert a document.
    #[error("Failed to parse the document '{path}': {source}")]
    ConversionFailed {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document, page or request.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The file exists but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Local file I/O failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network-level failure talking to an external service.
    #[error("{service}: request failed: {detail}")]
    Transport {
        service: &'static str,
        detail: String,
    },

    /// The external service answered with a non-success HTTP status.
    #[error("{service}: HTTP {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// A remote job or run ended in a failed state.
    #[error("{service}: job {job} failed: {detail}")]
    JobFailed {
        service: &'static str,
        job: String,
        detail: String,
    },

    /// A polling loop hit its wall-clock deadline.
    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    /// A response body, JSON payload or image could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The PDF library rejected the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    Pdf { path: PathBuf, detail: String },

    /// Rasterising a page failed.
    #[error("Rendering failed for page {page}: {detail}")]
    Render { page: usize, detail: String },

    /// The layout engine reported a non-success conversion status.
    #[error("Conversion reported status '{status}': {detail}")]
    Conversion { status: String, detail: String },

    /// The document exceeds a configured limit.
    #[error("Document '{path}' exceeds limit: {detail}")]
    LimitExceeded { path: PathBuf, detail: String },

    /// The LLM provider returned an error.
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

impl BackendError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Client errors (4xx other than 408/409/429), missing files and limit
    /// violations are permanent; everything else counts as transient. A
    /// malformed model answer is transient: the next sample may be valid.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Api { status, .. } => {
                matches!(*status, 408 | 409 | 429) || *status >= 500
            }
            BackendError::FileNotFound { .. }
            | BackendError::NotAPdf { .. }
            | BackendError::Pdf { .. }
            | BackendError::LimitExceeded { .. }
            | BackendError::Conversion { .. } => false,
            _ => true,
        }
    }

    /// Map a reqwest error onto [`BackendError::Api`] or [`BackendError::Transport`].
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            BackendError::Api {
                service,
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BackendError::Transport {
                service,
                detail: err.to_string(),
            }
        }
    }
}
