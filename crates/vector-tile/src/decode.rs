//! Decoding of encoded tiles, for inspecting cached vector tiles.

use tile_common::PropertyValue;

use crate::error::{Result, VectorTileError};
use crate::geometry::GeomType;
use crate::layer::{
    VALUE_BOOL, VALUE_DOUBLE, VALUE_FLOAT, VALUE_INT, VALUE_SINT, VALUE_STRING, VALUE_UINT,
};
use crate::pbf::{unzigzag, PbfReader, WIRE_LEN};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedTile {
    pub layers: Vec<DecodedLayer>,
}

impl DecodedTile {
    pub fn layer(&self, name: &str) -> Option<&DecodedLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedLayer {
    pub version: u32,
    pub name: String,
    pub extent: u32,
    pub keys: Vec<String>,
    pub values: Vec<PropertyValue>,
    pub features: Vec<DecodedFeature>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFeature {
    pub id: Option<u64>,
    pub tags: Vec<u32>,
    pub geom_type: Option<GeomType>,
    pub geometry: Vec<u32>,
}

impl DecodedLayer {
    /// Resolve a feature's tags against the layer's key and value tables.
    pub fn properties(&self, feature: &DecodedFeature) -> Result<Vec<(String, PropertyValue)>> {
        feature
            .tags
            .chunks(2)
            .map(|pair| {
                let (k, v) = match pair {
                    [k, v] => (*k as usize, *v as usize),
                    _ => return Err(VectorTileError::decode("odd number of tags")),
                };
                let key = self
                    .keys
                    .get(k)
                    .ok_or_else(|| VectorTileError::decode(format!("key index {} out of range", k)))?;
                let value = self
                    .values
                    .get(v)
                    .ok_or_else(|| VectorTileError::decode(format!("value index {} out of range", v)))?;
                Ok((key.clone(), value.clone()))
            })
            .collect()
    }
}

impl DecodedFeature {
    /// Geometry as absolute tile coordinates, one path per MoveTo. Rings
    /// are returned without repeating the first point.
    pub fn paths(&self) -> Result<Vec<Vec<(i32, i32)>>> {
        let mut paths: Vec<Vec<(i32, i32)>> = Vec::new();
        let mut cursor = (0i32, 0i32);
        let mut i = 0;
        let next = |i: &mut usize| -> Result<i32> {
            let v = *self
                .geometry
                .get(*i)
                .ok_or_else(|| VectorTileError::decode("truncated geometry"))?;
            *i += 1;
            Ok(unzigzag(v as u64) as i32)
        };

        while i < self.geometry.len() {
            let cmd = self.geometry[i];
            i += 1;
            let (id, count) = (cmd & 0x7, cmd >> 3);
            match id {
                1 | 2 => {
                    for _ in 0..count {
                        cursor.0 += next(&mut i)?;
                        cursor.1 += next(&mut i)?;
                        if id == 1 {
                            paths.push(vec![cursor]);
                        } else {
                            paths
                                .last_mut()
                                .ok_or_else(|| VectorTileError::decode("LineTo before MoveTo"))?
                                .push(cursor);
                        }
                    }
                }
                7 => {}
                other => return Err(VectorTileError::decode(format!("unknown command {}", other))),
            }
        }
        Ok(paths)
    }
}

/// Parse an MVT body. An empty body is a tile without layers.
pub fn decode_tile(data: &[u8]) -> Result<DecodedTile> {
    let mut reader = PbfReader::new(data);
    let mut tile = DecodedTile::default();
    while reader.has_remaining() {
        match reader.read_key()? {
            (3, WIRE_LEN) => tile.layers.push(decode_layer(reader.read_bytes()?)?),
            (_, wire) => reader.skip(wire)?,
        }
    }
    Ok(tile)
}

fn decode_layer(data: &[u8]) -> Result<DecodedLayer> {
    let mut reader = PbfReader::new(data);
    let mut layer = DecodedLayer {
        version: 1,
        extent: 4096,
        ..Default::default()
    };
    while reader.has_remaining() {
        match reader.read_key()? {
            (15, _) => layer.version = reader.read_varint()? as u32,
            (1, WIRE_LEN) => layer.name = reader.read_string()?,
            (2, WIRE_LEN) => layer.features.push(decode_feature(reader.read_bytes()?)?),
            (3, WIRE_LEN) => layer.keys.push(reader.read_string()?),
            (4, WIRE_LEN) => layer.values.push(decode_value(reader.read_bytes()?)?),
            (5, _) => layer.extent = reader.read_varint()? as u32,
            (_, wire) => reader.skip(wire)?,
        }
    }
    Ok(layer)
}

fn decode_feature(data: &[u8]) -> Result<DecodedFeature> {
    let mut reader = PbfReader::new(data);
    let mut feature = DecodedFeature::default();
    while reader.has_remaining() {
        match reader.read_key()? {
            (1, _) => feature.id = Some(reader.read_varint()?),
            (2, WIRE_LEN) => feature.tags = reader.read_packed()?,
            (3, _) => feature.geom_type = GeomType::from_code(reader.read_varint()?),
            (4, WIRE_LEN) => feature.geometry = reader.read_packed()?,
            (_, wire) => reader.skip(wire)?,
        }
    }
    Ok(feature)
}

fn decode_value(data: &[u8]) -> Result<PropertyValue> {
    let mut reader = PbfReader::new(data);
    let mut value = None;
    while reader.has_remaining() {
        let (field, wire) = reader.read_key()?;
        value = Some(match field {
            VALUE_STRING => PropertyValue::String(reader.read_string()?),
            VALUE_FLOAT => PropertyValue::Float(f32::from_bits(reader.read_fixed32()?) as f64),
            VALUE_DOUBLE => PropertyValue::Float(f64::from_bits(reader.read_fixed64()?)),
            VALUE_INT | VALUE_UINT => PropertyValue::Int(reader.read_varint()? as i64),
            VALUE_SINT => PropertyValue::Int(unzigzag(reader.read_varint()?)),
            VALUE_BOOL => PropertyValue::Bool(reader.read_varint()? != 0),
            _ => {
                reader.skip(wire)?;
                continue;
            }
        });
    }
    value.ok_or_else(|| VectorTileError::decode("value message without a value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        assert!(decode_tile(&[]).unwrap().layers.is_empty());
    }

    #[test]
    fn test_paths_from_commands() {
        let feature = DecodedFeature {
            geometry: vec![9, 4, 4, 18, 0, 16, 16, 0],
            ..Default::default()
        };
        assert_eq!(feature.paths().unwrap(), vec![vec![(2, 2), (2, 10), (10, 10)]]);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode_tile(&[0x1A, 0xFF]).is_err());
    }
}
