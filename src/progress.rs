//! Progress-callback trait for per-document parse events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::PdfParser::with_progress`] to receive events as the batch driver
//! works through the input list.
//!
//! Callers can forward events to a channel, a progress bar or a log without
//! the library knowing how the host application communicates. Documents are
//! processed strictly in order, so events for one document never interleave
//! with another's.
//!
//! # Example
//!
//! ```rust
//! use parsestudio::ParseProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ParseProgressCallback for Counter {
//!     fn on_document_complete(&self, index: usize, total: usize, _text_len: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("document {}/{} done ({done} so far)", index + 1, total);
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch driver as it processes each document.
///
/// All methods have no-op defaults so callers only override what they care
/// about. `index` is 0-based; `total` is the number of input paths.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once, after modality validation and before any document.
    fn on_parse_start(&self, backend: &str, total: usize) {
        let _ = (backend, total);
    }

    /// Called before a document's raw result is awaited.
    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called when a document was exported.
    ///
    /// * `text_len`: byte length of the extracted text
    fn on_document_complete(&self, index: usize, total: usize, text_len: usize) {
        let _ = (index, total, text_len);
    }

    /// Called when a document failed and an empty result was substituted
    /// (or, for fail-fast backends, just before the call aborts).
    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every document was attempted.
    fn on_parse_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Shared handle stored by the parser facade.
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;

/// The default handle.
pub fn noop() -> ProgressCallback {
    Arc::new(NoopProgressCallback)
}
