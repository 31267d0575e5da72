//! Geometry rows returned by the feature query collaborator.

use geo::Geometry;
use serde::{Deserialize, Serialize};

/// Attribute value carried into a vector tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// One feature: geometry in the query CRS plus its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub id: Option<u64>,
    pub geometry: Geometry<f64>,
    pub properties: Vec<(String, PropertyValue)>,
}

impl FeatureRow {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: None,
            geometry: geometry.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}
