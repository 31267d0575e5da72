//! Style evaluation: data values to RGBA pixels.
//!
//! NaN samples and values no class matches come out fully transparent;
//! [`flatten`] later replaces them with a background for opaque output.

use rayon::prelude::*;
use tile_common::{Color, StyleDefinition};

/// Minimum pixels to benefit from parallel row processing
const PARALLEL_THRESHOLD: usize = 4096;

/// Apply `style` to a row-major grid, returning RGBA bytes.
pub fn colorize(values: &[f32], width: usize, height: usize, style: &StyleDefinition) -> Vec<u8> {
    let mut pixels = vec![0u8; width * height * 4];
    if width == 0 {
        return pixels;
    }

    let paint_row = |(row, out): (usize, &mut [u8])| {
        let start = row * width;
        for (col, px) in out.chunks_exact_mut(4).enumerate() {
            let color = values
                .get(start + col)
                .and_then(|v| style.color_for(*v as f64))
                .unwrap_or(Color::TRANSPARENT);
            px.copy_from_slice(&color.to_array());
        }
    };

    if width * height >= PARALLEL_THRESHOLD {
        pixels.par_chunks_mut(width * 4).enumerate().for_each(paint_row);
    } else {
        pixels.chunks_mut(width * 4).enumerate().for_each(paint_row);
    }
    pixels
}

/// Composite every pixel over an opaque `background`.
///
/// Used for output without transparency: nodata takes the background color
/// and semi-transparent style colors are blended onto it.
pub fn flatten(pixels: &mut [u8], background: Color) {
    let bg = [background.r, background.g, background.b];
    for px in pixels.chunks_exact_mut(4) {
        let alpha = px[3] as u32;
        if alpha == 255 {
            continue;
        }
        for i in 0..3 {
            px[i] = ((px[i] as u32 * alpha + bg[i] as u32 * (255 - alpha) + 127) / 255) as u8;
        }
        px[3] = 255;
    }
}

/// Force nodata pixels (alpha 0) to all-zero RGBA so identical tiles encode
/// to identical bytes.
pub fn clear_transparent(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        if px[3] == 0 {
            px.copy_from_slice(&[0, 0, 0, 0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_common::{ClassBreak, ColorStop, StyleKind};

    fn ramp() -> StyleDefinition {
        StyleDefinition {
            id: "ramp".to_string(),
            kind: StyleKind::Continuous {
                stops: vec![
                    ColorStop { value: 0.0, color: Color::BLACK },
                    ColorStop { value: 100.0, color: Color::WHITE },
                ],
            },
            hillshade: None,
        }
    }

    #[test]
    fn test_continuous_and_nodata() {
        let pixels = colorize(&[0.0, 50.0, f32::NAN, 500.0], 2, 2, &ramp());
        assert_eq!(&pixels[0..4], &[0, 0, 0, 255]);
        assert_eq!(&pixels[4..8], &[128, 128, 128, 255]);
        assert_eq!(&pixels[8..12], &[0, 0, 0, 0]);
        assert_eq!(&pixels[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_unmatched_class_is_transparent() {
        let style = StyleDefinition {
            id: "classes".to_string(),
            kind: StyleKind::Classified {
                classes: vec![ClassBreak {
                    min: Some(0.0),
                    max: Some(10.0),
                    color: Color::rgba(10, 20, 30, 255),
                    label: None,
                }],
            },
            hillshade: None,
        };
        let pixels = colorize(&[5.0, 15.0], 2, 1, &style);
        assert_eq!(&pixels[0..4], &[10, 20, 30, 255]);
        assert_eq!(pixels[7], 0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let values: Vec<f32> = (0..128 * 64).map(|i| (i % 100) as f32).collect();
        let big = colorize(&values, 128, 64, &ramp());
        let small = colorize(&values[..128], 128, 1, &ramp());
        assert_eq!(&big[..128 * 4], &small[..]);
    }

    #[test]
    fn test_flatten() {
        let mut pixels = vec![0, 0, 0, 0, 255, 0, 0, 128, 1, 2, 3, 255];
        flatten(&mut pixels, Color::WHITE);
        assert_eq!(&pixels[0..4], &[255, 255, 255, 255]);
        assert_eq!(&pixels[4..8], &[255, 127, 127, 255]);
        assert_eq!(&pixels[8..12], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_clear_transparent() {
        let mut pixels = vec![9, 9, 9, 0, 9, 9, 9, 1];
        clear_transparent(&mut pixels);
        assert_eq!(pixels, vec![0, 0, 0, 0, 9, 9, 9, 1]);
    }
}
