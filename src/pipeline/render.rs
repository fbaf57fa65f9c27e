//! PDFium access: library binding, document opening and page rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the PDFium C++ library, which keeps thread-local
//! state and does CPU-heavy work. Every entry point here is synchronous and
//! callers run it through [`tokio::task::spawn_blocking`] so Tokio worker
//! threads never stall.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. Capping the longest edge keeps memory bounded
//! and matches the image-size sweet spot of vision models.

use crate::error::{BackendError, ParseError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bind to PDFium: `lib_path` may name the library file or the directory
/// holding it; `None` falls back to the system library.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match lib_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("{e:?}"))?;
    Ok(Pdfium::new(bindings))
}

/// Bind once to prove the library is loadable; used by constructors so a
/// missing PDFium is a configuration error, not a per-document one.
pub fn probe_pdfium(lib_path: Option<&Path>) -> Result<(), ParseError> {
    bind_pdfium(lib_path)
        .map(|_| ())
        .map_err(ParseError::PdfiumBindingFailed)
}

/// Map a load failure onto a per-document error.
pub fn open_error(path: &Path, e: PdfiumError) -> BackendError {
    BackendError::Pdf {
        path: path.to_path_buf(),
        detail: format!("{e:?}"),
    }
}

/// Run `f` against a freshly bound PDFium on the blocking pool.
pub async fn with_pdfium<T, F>(lib_path: Option<PathBuf>, f: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce(&Pdfium) -> Result<T, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(lib_path.as_deref()).map_err(BackendError::Task)?;
        f(&pdfium)
    })
    .await
    .map_err(|e| BackendError::Task(format!("PDFium task panicked: {e}")))?
}

/// Rasterise every page of a document, longest edge capped at `max_pixels`.
pub fn render_pages_blocking(
    pdfium: &Pdfium,
    pdf_path: &Path,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, BackendError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| open_error(pdf_path, e))?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| BackendError::Render {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(image);
    }

    Ok(results)
}
