//! Tests for PNG encoding.

use renderer::png::{create_png, create_png_auto, create_png_indexed};

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Decode with the `image` crate and return RGBA bytes.
fn decode(png: &[u8]) -> (u32, u32, Vec<u8>) {
    let img = image::load_from_memory_with_format(png, image::ImageFormat::Png)
        .expect("valid PNG")
        .to_rgba8();
    let (w, h) = img.dimensions();
    (w, h, img.into_raw())
}

/// Color type byte from IHDR.
fn color_type(png: &[u8]) -> u8 {
    png[25]
}

// ============================================================================
// Basic encoding tests
// ============================================================================

#[test]
fn test_create_png_indexed_roundtrips_pixels() {
    let pixels = [
        255, 0, 0, 255, // red
        0, 255, 0, 255, // green
        0, 255, 0, 255, // green
        255, 0, 0, 255, // red
    ];

    let png = create_png_auto(&pixels, 2, 2).unwrap();
    assert_eq!(&png[0..8], &PNG_SIGNATURE);
    assert_eq!(color_type(&png), 3);

    let (w, h, decoded) = decode(&png);
    assert_eq!((w, h), (2, 2));
    assert_eq!(decoded, pixels.to_vec());
}

#[test]
fn test_create_png_rgba_roundtrips_pixels() {
    let pixels = [
        255, 0, 0, 255, // red
        0, 255, 0, 255, // green
        0, 0, 255, 255, // blue
        255, 255, 0, 255, // yellow
    ];

    let png = create_png(&pixels, 2, 2).unwrap();
    assert_eq!(color_type(&png), 6);
    assert_eq!(decode(&png).2, pixels.to_vec());
}

#[test]
fn test_transparency_survives_indexed_encoding() {
    let pixels = [
        255, 0, 0, 255, // red, opaque
        0, 0, 0, 0, // transparent
        0, 255, 0, 128, // green, semi-transparent
        0, 0, 255, 255, // blue, opaque
    ];

    let png = create_png_auto(&pixels, 2, 2).unwrap();
    let (_, _, decoded) = decode(&png);
    assert_eq!(decoded[7], 0);
    assert_eq!(decoded[11], 128);
}

// ============================================================================
// Format selection tests
// ============================================================================

#[test]
fn test_rgba_fallback_many_colors() {
    let mut pixels = Vec::with_capacity(300 * 4);
    for i in 0..300u32 {
        pixels.extend_from_slice(&[(i % 256) as u8, (i / 256) as u8, 7, 255]);
    }

    let png = create_png_auto(&pixels, 300, 1).unwrap();
    assert_eq!(color_type(&png), 6);
    assert_eq!(decode(&png).2, pixels);
}

#[test]
fn test_grayscale_gradient_exactly_256_colors() {
    let mut pixels = Vec::with_capacity(256 * 4);
    for i in 0..256 {
        let v = i as u8;
        pixels.extend_from_slice(&[v, v, v, 255]);
    }

    let png = create_png_auto(&pixels, 256, 1).unwrap();
    assert_eq!(color_type(&png), 3);
}

#[test]
fn test_classified_tile_is_smaller_indexed() {
    // Three stripes, like a land cover tile
    let colors = [[0u8, 0, 200, 255], [0, 120, 0, 255], [128, 128, 128, 255]];
    let mut pixels = Vec::with_capacity(256 * 256 * 4);
    for _y in 0..256 {
        for x in 0..256 {
            pixels.extend_from_slice(&colors[x * 3 / 256]);
        }
    }

    let indexed = create_png_auto(&pixels, 256, 256).unwrap();
    let rgba = create_png(&pixels, 256, 256).unwrap();
    assert!(
        indexed.len() <= rgba.len(),
        "Indexed PNG ({} bytes) should not exceed RGBA ({} bytes)",
        indexed.len(),
        rgba.len()
    );
    assert_eq!(decode(&indexed).2, pixels);
}

// ============================================================================
// Edge case tests
// ============================================================================

#[test]
fn test_single_pixel() {
    let png = create_png_auto(&[255, 0, 0, 255], 1, 1).unwrap();
    assert_eq!(decode(&png).2, vec![255, 0, 0, 255]);
}

#[test]
fn test_single_color_image_is_small() {
    let pixels: Vec<u8> = [128u8, 64, 32, 255].repeat(100 * 100);
    let png = create_png_auto(&pixels, 100, 100).unwrap();
    assert!(png.len() < 1000, "Single color 100x100 should be very small");
}

#[test]
fn test_all_transparent() {
    let pixels = vec![0u8; 10 * 10 * 4];
    let png = create_png_auto(&pixels, 10, 10).unwrap();
    assert!(decode(&png).2.iter().all(|b| *b == 0));
}

#[test]
fn test_indexed_rejects_oversized_palette() {
    let palette = vec![(0u8, 0u8, 0u8, 255u8); 257];
    assert!(create_png_indexed(1, 1, &palette, &[0]).is_err());
}
