//! Minimal protobuf wire-format writer and reader.
//!
//! Only the pieces the vector tile schema needs: varints, zigzag, fixed
//! 32/64-bit values and length-delimited fields.

use crate::error::{Result, VectorTileError};

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

#[inline]
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Appends protobuf fields to a byte buffer.
#[derive(Debug, Default)]
pub struct PbfWriter {
    buf: Vec<u8>,
}

impl PbfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn write_key(&mut self, field: u32, wire_type: u8) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    pub fn write_uint_field(&mut self, field: u32, value: u64) {
        self.write_key(field, WIRE_VARINT);
        self.write_varint(value);
    }

    pub fn write_sint_field(&mut self, field: u32, value: i64) {
        self.write_key(field, WIRE_VARINT);
        self.write_varint(zigzag(value));
    }

    pub fn write_bool_field(&mut self, field: u32, value: bool) {
        self.write_uint_field(field, value as u64);
    }

    pub fn write_double_field(&mut self, field: u32, value: f64) {
        self.write_key(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_key(field, WIRE_LEN);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string_field(&mut self, field: u32, value: &str) {
        self.write_bytes_field(field, value.as_bytes());
    }

    /// Packed repeated uint32. Nothing is written for an empty slice.
    pub fn write_packed_field(&mut self, field: u32, values: &[u32]) {
        if values.is_empty() {
            return;
        }
        let mut packed = PbfWriter::new();
        for v in values {
            packed.write_varint(*v as u64);
        }
        self.write_bytes_field(field, &packed.buf);
    }
}

/// Reads protobuf fields from a byte slice.
#[derive(Debug)]
pub struct PbfReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PbfReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| VectorTileError::decode("truncated varint"))?;
            self.pos += 1;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(VectorTileError::decode("varint longer than 10 bytes"))
    }

    /// `(field number, wire type)`
    pub fn read_key(&mut self) -> Result<(u32, u8)> {
        let key = self.read_varint()?;
        Ok(((key >> 3) as u32, (key & 0x7) as u8))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| VectorTileError::decode("field extends past end of buffer"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| VectorTileError::decode(e.to_string()))
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    pub fn read_packed(&mut self) -> Result<Vec<u32>> {
        let bytes = self.read_bytes()?;
        let mut inner = PbfReader::new(bytes);
        let mut values = Vec::new();
        while inner.has_remaining() {
            values.push(inner.read_varint()? as u32);
        }
        Ok(values)
    }

    pub fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            other => return Err(VectorTileError::decode(format!("unknown wire type {}", other))),
        }
        Ok(())
    }
}
