//! Image encoding: `DynamicImage` → PNG bytes → inline base64 data URI.
//!
//! Backends receive every page inline in the request body, so the request is
//! self-contained and no page image has to be hosted anywhere. PNG is lossless;
//! JPEG artefacts around small print (weights, phone numbers) hurt recognition
//! more than the extra payload size costs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap raw image bytes in a `data:` URI.
pub fn to_data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}
