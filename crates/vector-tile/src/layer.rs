//! Layer assembly with key and value tables.

use std::collections::HashMap;

use tile_common::PropertyValue;

use crate::geometry::TileGeometry;
use crate::pbf::PbfWriter;

/// Vector tile spec version written into every layer.
pub const MVT_VERSION: u32 = 2;

// Layer message fields
const LAYER_NAME: u32 = 1;
const LAYER_FEATURES: u32 = 2;
const LAYER_KEYS: u32 = 3;
const LAYER_VALUES: u32 = 4;
const LAYER_EXTENT: u32 = 5;
const LAYER_VERSION: u32 = 15;

// Feature message fields
const FEATURE_ID: u32 = 1;
const FEATURE_TAGS: u32 = 2;
const FEATURE_TYPE: u32 = 3;
const FEATURE_GEOMETRY: u32 = 4;

// Value message fields
pub(crate) const VALUE_STRING: u32 = 1;
pub(crate) const VALUE_FLOAT: u32 = 2;
pub(crate) const VALUE_DOUBLE: u32 = 3;
pub(crate) const VALUE_INT: u32 = 4;
pub(crate) const VALUE_UINT: u32 = 5;
pub(crate) const VALUE_SINT: u32 = 6;
pub(crate) const VALUE_BOOL: u32 = 7;

/// Hashable form of a property value; doubles compare by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    String(String),
    Double(u64),
    Int(i64),
    Bool(bool),
}

impl From<&PropertyValue> for ValueKey {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::String(s) => ValueKey::String(s.clone()),
            PropertyValue::Float(f) => ValueKey::Double(f.to_bits()),
            PropertyValue::Int(i) => ValueKey::Int(*i),
            PropertyValue::Bool(b) => ValueKey::Bool(*b),
        }
    }
}

impl ValueKey {
    fn encode(&self) -> Vec<u8> {
        let mut w = PbfWriter::new();
        match self {
            ValueKey::String(s) => w.write_string_field(VALUE_STRING, s),
            ValueKey::Double(bits) => w.write_double_field(VALUE_DOUBLE, f64::from_bits(*bits)),
            ValueKey::Int(i) if *i >= 0 => w.write_uint_field(VALUE_UINT, *i as u64),
            ValueKey::Int(i) => w.write_sint_field(VALUE_SINT, *i),
            ValueKey::Bool(b) => w.write_bool_field(VALUE_BOOL, *b),
        }
        w.into_bytes()
    }
}

/// Collects features for one named layer, deduplicating keys and values.
#[derive(Debug)]
pub struct LayerBuilder {
    name: String,
    extent: u32,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<ValueKey>,
    value_index: HashMap<ValueKey, u32>,
    features: Vec<Vec<u8>>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
            features: Vec::new(),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn key_id(&mut self, key: &str) -> u32 {
        if let Some(id) = self.key_index.get(key) {
            return *id;
        }
        let id = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), id);
        id
    }

    fn value_id(&mut self, value: &PropertyValue) -> u32 {
        let key = ValueKey::from(value);
        if let Some(id) = self.value_index.get(&key) {
            return *id;
        }
        let id = self.values.len() as u32;
        self.values.push(key.clone());
        self.value_index.insert(key, id);
        id
    }

    /// Add one feature. Properties repeat-keyed within a feature keep the
    /// first occurrence.
    pub fn add_feature(
        &mut self,
        id: Option<u64>,
        geometry: &TileGeometry,
        properties: &[(&str, &PropertyValue)],
    ) {
        let mut tags = Vec::with_capacity(properties.len() * 2);
        let mut seen: Vec<u32> = Vec::with_capacity(properties.len());
        for (key, value) in properties {
            let key_id = self.key_id(key);
            if seen.contains(&key_id) {
                continue;
            }
            seen.push(key_id);
            tags.push(key_id);
            tags.push(self.value_id(value));
        }

        let mut w = PbfWriter::new();
        if let Some(id) = id {
            w.write_uint_field(FEATURE_ID, id);
        }
        w.write_packed_field(FEATURE_TAGS, &tags);
        w.write_uint_field(FEATURE_TYPE, geometry.geom_type() as u64);
        w.write_packed_field(FEATURE_GEOMETRY, &geometry.commands());
        self.features.push(w.into_bytes());
    }

    /// Serialized `Layer` message.
    pub fn build(&self) -> Vec<u8> {
        let mut w = PbfWriter::new();
        w.write_uint_field(LAYER_VERSION, MVT_VERSION as u64);
        w.write_string_field(LAYER_NAME, &self.name);
        for feature in &self.features {
            w.write_bytes_field(LAYER_FEATURES, feature);
        }
        for key in &self.keys {
            w.write_string_field(LAYER_KEYS, key);
        }
        for value in &self.values {
            w.write_bytes_field(LAYER_VALUES, &value.encode());
        }
        w.write_uint_field(LAYER_EXTENT, self.extent as u64);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_values_are_shared() {
        let mut layer = LayerBuilder::new("places", 4096);
        let city = PropertyValue::from("city");
        let pop = PropertyValue::from(1000i64);
        let geom = TileGeometry::Points(vec![(1, 1)]);

        layer.add_feature(Some(1), &geom, &[("kind", &city), ("pop", &pop)]);
        layer.add_feature(Some(2), &geom, &[("kind", &city), ("pop", &PropertyValue::from(5i64))]);

        assert_eq!(layer.feature_count(), 2);
        assert_eq!(layer.keys, vec!["kind", "pop"]);
        assert_eq!(layer.values.len(), 3);
    }

    #[test]
    fn test_duplicate_key_in_feature_keeps_first() {
        let mut layer = LayerBuilder::new("x", 4096);
        let a = PropertyValue::from("a");
        let b = PropertyValue::from("b");
        layer.add_feature(None, &TileGeometry::Points(vec![(0, 0)]), &[("k", &a), ("k", &b)]);
        assert_eq!(layer.values.len(), 1);
    }

    #[test]
    fn test_value_encoding() {
        assert_eq!(ValueKey::Bool(true).encode(), vec![0x38, 0x01]);
        assert_eq!(ValueKey::Int(5).encode(), vec![0x28, 0x05]);
        assert_eq!(ValueKey::Int(-1).encode(), vec![0x30, 0x01]);
        assert_eq!(ValueKey::String("a".into()).encode(), vec![0x0A, 0x01, b'a']);
    }
}
