//! Raster tile rendering.
//!
//! Turns a [`source_reader::SampleGrid`] and a style into an encoded tile:
//! - Style evaluation (continuous ramps and classified maps)
//! - Hillshade from the elevation band
//! - PNG (indexed or RGBA), JPEG and WebP encoding

pub mod colorize;
pub mod encode;
pub mod error;
pub mod hillshade;
pub mod png;
pub mod render;

pub use error::{RenderError, Result};
pub use render::{RenderConfig, RenderOptions, TileRenderer};
