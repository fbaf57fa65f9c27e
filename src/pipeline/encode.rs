//! Image encoding and decoding at the byte boundary.
//!
//! Outbound: `DynamicImage` → PNG bytes, or base64 PNG wrapped in
//! `ImageData` for vision models. Inbound: bytes or `data:` URIs from remote
//! engines → RGB `DynamicImage`.

use crate::error::BackendError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Lossless PNG bytes for an image.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a rasterised page as a base64 PNG ready for a vision model.
///
/// PNG keeps rendered glyphs crisp; `detail: "high"` lets GPT-4-class models
/// tile the image instead of downsampling it to a single overview.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Decode raw image bytes (any format the `image` crate was built with) and
/// convert to RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| BackendError::Decode(format!("image: {e}")))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Decode a `data:<mime>;base64,<payload>` URI into an RGB image.
pub fn decode_data_uri(uri: &str) -> Result<DynamicImage, BackendError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| BackendError::Decode("image uri is not a data: uri".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| BackendError::Decode("data: uri has no payload".into()))?;
    if !header.ends_with(";base64") {
        return Err(BackendError::Decode(format!(
            "unsupported data: uri encoding '{header}'"
        )));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| BackendError::Decode(format!("base64: {e}")))?;
    decode_rgb(&bytes)
}
