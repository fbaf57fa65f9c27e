//! Shared processing stages the backend adapters compose.
//!
//! None of these know which backend calls them; each does one step and is
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ (model) ──▶ postprocess
//! (path)    (pdfium)   (PNG/b64)              (answer + table cleanup)
//! ```
//!
//! 1. [`input`] : validate a path (`%PDF` magic) and read it for upload
//! 2. [`render`]: bind PDFium and rasterise pages; blocking work goes
//!    through `spawn_blocking`
//! 3. [`encode`]: PNG/base64 out to vision models, bytes and `data:` URIs
//!    back in to RGB images
//! 4. [`postprocess`]: deterministic cleanup of model answers and of the
//!    table markdown inside them

pub mod encode;
pub mod input;
pub mod postprocess;
pub mod render;
