//! Tile rendering: sample grid + style to encoded image bytes.

use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use source_reader::SampleGrid;
use tile_common::{Color, StyleDefinition, TileFormat};
use tracing::{debug, instrument};

use crate::colorize::{clear_transparent, colorize, flatten};
use crate::encode::{encode_jpeg, encode_webp};
use crate::error::{RenderError, Result};
use crate::hillshade::{apply_hillshade, compute_hillshade, ground_cell_size};
use crate::png::create_png_auto;

/// Encoder settings shared by every render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 1..=100
    pub jpeg_quality: u8,
    /// 0..=100, 100 selects lossless WebP
    pub webp_quality: f32,
    /// Fill for nodata pixels when the output is opaque
    pub background: Color,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            webp_quality: 85.0,
            background: Color::WHITE,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(RenderError::configuration(format!(
                "jpeg_quality {} outside 1..=100",
                self.jpeg_quality
            )));
        }
        if !(0.0..=100.0).contains(&self.webp_quality) {
            return Err(RenderError::configuration(format!(
                "webp_quality {} outside 0..=100",
                self.webp_quality
            )));
        }
        Ok(())
    }
}

/// Per-request output options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub format: TileFormat,
    pub transparent: bool,
}

impl RenderOptions {
    pub fn new(format: TileFormat, transparent: bool) -> Self {
        Self { format, transparent }
    }

    /// Reject combinations the encoder cannot honor. Transparency in a
    /// format without alpha is an error, never a silent fallback.
    pub fn validate(&self) -> Result<()> {
        if self.format.is_vector() {
            return Err(RenderError::configuration(format!(
                "'{}' is not a raster format",
                self.format
            )));
        }
        if self.transparent && !self.format.supports_alpha() {
            return Err(RenderError::configuration(format!(
                "format '{}' cannot represent transparency",
                self.format
            )));
        }
        Ok(())
    }
}

/// Renders raster tiles from sample grids.
#[derive(Debug, Clone, Default)]
pub struct TileRenderer {
    config: RenderConfig,
}

impl TileRenderer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Style, shade and encode the first band of `grid`.
    ///
    /// The output image has the grid's dimensions.
    #[instrument(skip(self, grid, style), fields(style = %style.id, format = %options.format, width = grid.width, height = grid.height))]
    pub fn render(
        &self,
        grid: &SampleGrid,
        style: &StyleDefinition,
        options: &RenderOptions,
    ) -> Result<Vec<u8>> {
        options.validate()?;
        let start = Instant::now();

        let (width, height) = (grid.width, grid.height);
        let values = grid
            .band(0)
            .ok_or_else(|| RenderError::InvalidInput("sample grid has no bands".to_string()))?;
        if values.len() != width * height {
            return Err(RenderError::InvalidInput(format!(
                "band has {} samples for {}x{}",
                values.len(),
                width,
                height
            )));
        }

        let mut pixels = colorize(values, width, height, style);

        if let Some(params) = &style.hillshade {
            let cell = ground_cell_size(&grid.bbox, grid.crs, width, height);
            let shade = compute_hillshade(values, width, height, cell, params);
            apply_hillshade(&mut pixels, &shade, params.strength);
        }

        if options.transparent {
            clear_transparent(&mut pixels);
        } else {
            flatten(&mut pixels, self.config.background);
        }

        let encoded = match options.format {
            TileFormat::Png => create_png_auto(&pixels, width, height)?,
            TileFormat::Jpeg => encode_jpeg(&pixels, width, height, self.config.jpeg_quality)?,
            TileFormat::Webp => encode_webp(&pixels, width, height, self.config.webp_quality)?,
            TileFormat::Mvt => {
                return Err(RenderError::configuration("'mvt' is not a raster format"))
            }
        };

        let elapsed = start.elapsed();
        histogram!("render_duration_seconds", "format" => options.format.as_str())
            .record(elapsed.as_secs_f64());
        counter!("tiles_rendered_total", "format" => options.format.as_str()).increment(1);
        debug!(bytes = encoded.len(), elapsed_ms = elapsed.as_millis() as u64, "Rendered tile");

        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        assert!(RenderOptions::new(TileFormat::Png, true).validate().is_ok());
        assert!(RenderOptions::new(TileFormat::Webp, true).validate().is_ok());
        assert!(RenderOptions::new(TileFormat::Jpeg, false).validate().is_ok());
        assert!(matches!(
            RenderOptions::new(TileFormat::Jpeg, true).validate(),
            Err(RenderError::Configuration(_))
        ));
        assert!(RenderOptions::new(TileFormat::Mvt, false).validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(RenderConfig::default().validate().is_ok());
        let bad = RenderConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(TileRenderer::new(bad).is_err());
    }
}
