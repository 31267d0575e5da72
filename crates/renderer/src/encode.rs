//! Lossy encoders: JPEG via `image`, WebP via libwebp.

use std::io::Cursor;

use crate::error::{RenderError, Result};

/// Encode RGBA pixels as baseline JPEG. The alpha channel is dropped, so
/// callers flatten transparent pixels onto a background first.
pub fn encode_jpeg(pixels: &[u8], width: usize, height: usize, quality: u8) -> Result<Vec<u8>> {
    if pixels.len() != width * height * 4 {
        return Err(RenderError::InvalidInput(format!(
            "expected {} RGBA bytes, got {}",
            width * height * 4,
            pixels.len()
        )));
    }
    let rgb: Vec<u8> = pixels
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut jpeg_data = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_data);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder.encode(
        &rgb,
        width as u32,
        height as u32,
        image::ColorType::Rgb8,
    )?;

    Ok(jpeg_data)
}

/// Encode RGBA pixels as WebP, keeping the alpha channel. A quality of 100
/// selects lossless mode.
pub fn encode_webp(pixels: &[u8], width: usize, height: usize, quality: f32) -> Result<Vec<u8>> {
    if pixels.len() != width * height * 4 {
        return Err(RenderError::InvalidInput(format!(
            "expected {} RGBA bytes, got {}",
            width * height * 4,
            pixels.len()
        )));
    }
    let encoder = webp::Encoder::from_rgba(pixels, width as u32, height as u32);
    let webp_data = if quality >= 100.0 {
        encoder.encode_lossless()
    } else {
        encoder.encode(quality)
    };
    if webp_data.is_empty() {
        return Err(RenderError::encode("libwebp returned no data"));
    }
    Ok(webp_data.to_vec())
}
