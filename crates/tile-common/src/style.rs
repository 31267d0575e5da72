//! Style definitions for raster rendering.
//!
//! A style is either a continuous gradient or a classified map, each a pure
//! `value -> color` function, optionally combined with hillshading.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TileError, TileResult};

/// A complete style definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDefinition {
    pub id: String,

    /// Color mapping
    #[serde(flatten)]
    pub kind: StyleKind,

    /// Optional relief shading computed from the first band
    #[serde(default)]
    pub hillshade: Option<HillshadeParams>,
}

impl StyleDefinition {
    pub fn validate(&self) -> TileResult<()> {
        self.kind
            .validate()
            .map_err(|msg| TileError::ConfigurationError(format!("style '{}': {}", self.id, msg)))?;
        if let Some(hs) = &self.hillshade {
            hs.validate().map_err(|msg| {
                TileError::ConfigurationError(format!("style '{}': {}", self.id, msg))
            })?;
        }
        Ok(())
    }

    /// Color for a data value, `None` when the value maps to nodata.
    pub fn color_for(&self, value: f64) -> Option<Color> {
        self.kind.color_for(value)
    }
}

/// Color mapping variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StyleKind {
    /// Linear interpolation between ordered stops, clamped outside the range.
    Continuous { stops: Vec<ColorStop> },
    /// First matching `[min, max)` bucket wins.
    Classified { classes: Vec<ClassBreak> },
}

impl StyleKind {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StyleKind::Continuous { stops } => {
                if stops.is_empty() {
                    return Err("gradient must have at least 1 color stop".to_string());
                }
                if stops.iter().any(|s| !s.value.is_finite()) {
                    return Err("color stop values must be finite".to_string());
                }
                for pair in stops.windows(2) {
                    if pair[1].value <= pair[0].value {
                        return Err("color stops must be in ascending value order".to_string());
                    }
                }
                Ok(())
            }
            StyleKind::Classified { classes } => {
                if classes.is_empty() {
                    return Err("classification must have at least 1 class".to_string());
                }
                for class in classes {
                    if let (Some(min), Some(max)) = (class.min, class.max) {
                        if min >= max {
                            return Err(format!("class [{}, {}) is empty", min, max));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn color_for(&self, value: f64) -> Option<Color> {
        if !value.is_finite() {
            return None;
        }
        match self {
            StyleKind::Continuous { stops } => interpolate(stops, value),
            StyleKind::Classified { classes } => classes
                .iter()
                .find(|class| class.contains(value))
                .map(|class| class.color),
        }
    }
}

fn interpolate(stops: &[ColorStop], value: f64) -> Option<Color> {
    let first = stops.first()?;
    let last = stops.last()?;
    if value <= first.value {
        return Some(first.color);
    }
    if value >= last.value {
        return Some(last.color);
    }

    let upper = stops.iter().position(|s| s.value >= value)?;
    let high = &stops[upper];
    let low = &stops[upper.saturating_sub(1)];
    if high.value == low.value {
        return Some(high.color);
    }
    let t = (value - low.value) / (high.value - low.value);
    Some(low.color.lerp(&high.color, t))
}

/// A color stop in a gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub value: f64,
    pub color: Color,
}

/// A classification bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBreak {
    /// Minimum value (inclusive), None for negative infinity
    #[serde(default)]
    pub min: Option<f64>,

    /// Maximum value (exclusive), None for positive infinity
    #[serde(default)]
    pub max: Option<f64>,

    pub color: Color,

    #[serde(default)]
    pub label: Option<String>,
}

impl ClassBreak {
    pub fn contains(&self, value: f64) -> bool {
        let above_min = self.min.map(|m| value >= m).unwrap_or(true);
        let below_max = self.max.map(|m| value < m).unwrap_or(true);
        above_min && below_max
    }
}

/// Relief shading parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HillshadeParams {
    /// Light direction, degrees clockwise from north
    #[serde(default = "default_azimuth")]
    pub azimuth: f64,

    /// Light elevation above the horizon, degrees
    #[serde(default = "default_altitude")]
    pub altitude: f64,

    /// Vertical exaggeration
    #[serde(default = "default_z_factor")]
    pub z_factor: f64,

    /// How strongly the shade darkens the base color, 0..=1
    #[serde(default = "default_strength")]
    pub strength: f64,
}

fn default_azimuth() -> f64 {
    315.0
}
fn default_altitude() -> f64 {
    45.0
}
fn default_z_factor() -> f64 {
    1.0
}
fn default_strength() -> f64 {
    0.7
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuth: default_azimuth(),
            altitude: default_altitude(),
            z_factor: default_z_factor(),
            strength: default_strength(),
        }
    }
}

impl HillshadeParams {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=90.0).contains(&self.altitude) {
            return Err(format!("hillshade altitude {} outside [0, 90]", self.altitude));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(format!("hillshade strength {} outside [0, 1]", self.strength));
        }
        if !self.azimuth.is_finite() || !self.z_factor.is_finite() || self.z_factor <= 0.0 {
            return Err("hillshade azimuth and z_factor must be finite, z_factor > 0".to_string());
        }
        Ok(())
    }
}

/// An RGBA color. Serialized as `#RRGGBB`/`#RRGGBBAA` or a CSS color name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Linear interpolation between two colors, `t` clamped to [0, 1].
    pub fn lerp(&self, other: &Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| -> u8 { ((a as f64) * (1.0 - t) + (b as f64) * t).round() as u8 };
        Color {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }
}

impl FromStr for Color {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            return parse_hex(hex)
                .ok_or_else(|| TileError::invalid_parameter("color", format!("bad hex '{}'", s)));
        }
        named_color(trimmed)
            .ok_or_else(|| TileError::invalid_parameter("color", format!("unknown color '{}'", s)))
    }
}

impl TryFrom<String> for Color {
    type Error = TileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

fn named_color(name: &str) -> Option<Color> {
    let rgb = match name.to_lowercase().as_str() {
        "transparent" => return Some(Color::TRANSPARENT),
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "cyan" => (0, 255, 255),
        "magenta" => (255, 0, 255),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "brown" => (165, 42, 42),
        "gray" | "grey" => (128, 128, 128),
        _ => return None,
    };
    Some(Color::rgba(rgb.0, rgb.1, rgb.2, 255))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elevation_style() -> StyleDefinition {
        let json = r##"{"id":"terrain","type":"continuous","stops":[{"value":0,"color":"#0000FF"},{"value":100,"color":"#00FF00"},{"value":200,"color":"#FF0000"}],"hillshade":{"azimuth":315}}"##;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_continuous_style() {
        let style = elevation_style();
        style.validate().unwrap();
        let hs = style.hillshade.as_ref().unwrap();
        assert_eq!(hs.altitude, 45.0);
        assert_eq!(hs.z_factor, 1.0);
    }

    #[test]
    fn test_continuous_interpolation_and_clamp() {
        let style = elevation_style();
        assert_eq!(style.color_for(50.0), Some(Color::rgba(0, 128, 128, 255)));
        assert_eq!(style.color_for(100.0), Some(Color::rgba(0, 255, 0, 255)));
        assert_eq!(style.color_for(-40.0), Some(Color::rgba(0, 0, 255, 255)));
        assert_eq!(style.color_for(1e6), Some(Color::rgba(255, 0, 0, 255)));
        assert_eq!(style.color_for(f64::NAN), None);
    }

    #[test]
    fn test_classified_first_match_and_miss() {
        let json = r##"{"id":"landcover","type":"classified","classes":[{"min":0,"max":10,"color":"#00FF00","label":"grass"},{"min":5,"max":20,"color":"blue"},{"min":30,"color":"red"}]}"##;
        let style: StyleDefinition = serde_json::from_str(json).unwrap();
        style.validate().unwrap();

        assert_eq!(style.color_for(7.0), Some(Color::rgba(0, 255, 0, 255)));
        assert_eq!(style.color_for(10.0), Some(Color::rgba(0, 0, 255, 255)));
        assert_eq!(style.color_for(25.0), None);
        assert_eq!(style.color_for(99.0), Some(Color::rgba(255, 0, 0, 255)));
    }

    #[test]
    fn test_invalid_styles() {
        let unordered = StyleKind::Continuous {
            stops: vec![
                ColorStop { value: 10.0, color: Color::WHITE },
                ColorStop { value: 5.0, color: Color::BLACK },
            ],
        };
        assert!(unordered.validate().is_err());
        assert!(StyleKind::Classified { classes: vec![] }.validate().is_err());
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!("#FF5500".parse::<Color>().unwrap(), Color::rgba(255, 85, 0, 255));
        assert_eq!("#FF550080".parse::<Color>().unwrap(), Color::rgba(255, 85, 0, 128));
        assert_eq!("red".parse::<Color>().unwrap(), Color::rgba(255, 0, 0, 255));
        assert!("#12".parse::<Color>().is_err());
        assert!("chartreuse-ish".parse::<Color>().is_err());
        assert_eq!(Color::rgba(1, 2, 3, 4).to_string(), "#01020304");
    }
}
