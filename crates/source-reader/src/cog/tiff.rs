//! TIFF header and IFD parsing for tiled GeoTIFFs.
//!
//! Only what a window read needs is parsed: the tiled image layout of the
//! full-resolution image and its reduced-resolution overviews, plus the
//! georeferencing tags of the full-resolution image.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;
use tile_common::{BoundingBox, CrsCode};
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::range::RangeReader;

/// Bytes fetched up front; COG writers place every IFD here.
pub const HEADER_PREFETCH: usize = 64 * 1024;

const MAX_IFDS: usize = 64;
const MAX_TILE_DIM: u64 = 4096;
const MAX_SAMPLES_PER_PIXEL: usize = 64;
/// Largest decoded tile accepted from a header.
const MAX_TILE_BYTES: u64 = 256 * 1024 * 1024;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Byte order declared by the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(buf),
            Endian::Big => BigEndian::read_u64(buf),
        }
    }

    pub fn f32(self, buf: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(buf),
            Endian::Big => BigEndian::read_f32(buf),
        }
    }

    pub fn f64(self, buf: &[u8]) -> f64 {
        match self {
            Endian::Little => LittleEndian::read_f64(buf),
            Endian::Big => BigEndian::read_f64(buf),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], v: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(buf, v),
            Endian::Big => BigEndian::write_u16(buf, v),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], v: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, v),
            Endian::Big => BigEndian::write_u32(buf, v),
        }
    }
}

/// Tile compression schemes the reader can undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
}

impl Compression {
    fn from_code(code: u64) -> Result<Self> {
        match code {
            1 => Ok(Compression::None),
            8 | 32946 => Ok(Compression::Deflate),
            other => Err(SourceError::unsupported(format!(
                "TIFF compression {}",
                other
            ))),
        }
    }
}

/// Numeric interpretation of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleType {
    fn from_tags(format: u64, bits: u64) -> Result<Self> {
        match (format, bits) {
            (1, 8) => Ok(SampleType::U8),
            (1, 16) => Ok(SampleType::U16),
            (1, 32) => Ok(SampleType::U32),
            (2, 8) => Ok(SampleType::I8),
            (2, 16) => Ok(SampleType::I16),
            (2, 32) => Ok(SampleType::I32),
            (3, 32) => Ok(SampleType::F32),
            (3, 64) => Ok(SampleType::F64),
            (f, b) => Err(SourceError::unsupported(format!(
                "sample format {} with {} bits",
                f, b
            ))),
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }
}

/// One resolution level (the full image or an overview).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLevel {
    pub width: u64,
    pub height: u64,
    pub tile_width: u64,
    pub tile_height: u64,
    pub samples_per_pixel: usize,
    pub sample_type: SampleType,
    pub compression: Compression,
    pub predictor: u16,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
}

impl ImageLevel {
    pub fn tiles_across(&self) -> u64 {
        self.width.div_ceil(self.tile_width)
    }

    pub fn tiles_down(&self) -> u64 {
        self.height.div_ceil(self.tile_height)
    }

    /// Offset and length of tile `(tx, ty)`; a zero length marks a sparse tile.
    pub fn tile_location(&self, tx: u64, ty: u64) -> Result<(u64, u64)> {
        let index = (ty * self.tiles_across() + tx) as usize;
        match (self.tile_offsets.get(index), self.tile_byte_counts.get(index)) {
            (Some(&offset), Some(&len)) => Ok((offset, len)),
            _ => Err(SourceError::decode(format!(
                "tile ({}, {}) missing from tile index",
                tx, ty
            ))),
        }
    }

    /// Decoded size of one tile in bytes. Bounded for any parsed level.
    pub fn tile_bytes(&self) -> usize {
        (self.tile_width * self.tile_height) as usize
            * self.samples_per_pixel
            * self.sample_type.byte_size()
    }
}

/// Affine georeferencing of the full-resolution image (north-up only).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn extent(&self, width: u64, height: u64) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - self.pixel_height * height as f64,
            self.origin_x + self.pixel_width * width as f64,
            self.origin_y,
        )
    }
}

/// Parsed header of a tiled GeoTIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct CogHeader {
    pub endian: Endian,
    /// Full resolution first, then overviews from finest to coarsest.
    pub levels: Vec<ImageLevel>,
    pub geo: Option<GeoTransform>,
    pub crs: Option<CrsCode>,
    pub nodata: Option<f64>,
}

impl CogHeader {
    pub fn full(&self) -> &ImageLevel {
        &self.levels[0]
    }

    /// Source pixel size of `level` in CRS units.
    pub fn level_resolution(&self, level: usize, full_res: (f64, f64)) -> (f64, f64) {
        let full = self.full();
        let l = &self.levels[level];
        (
            full_res.0 * full.width as f64 / l.width as f64,
            full_res.1 * full.height as f64 / l.height as f64,
        )
    }

    /// Coarsest level whose resolution still meets `target` (CRS units per
    /// output pixel). Falls back to full resolution.
    pub fn select_level(&self, full_res: (f64, f64), target: f64) -> usize {
        let mut best = 0;
        for level in 1..self.levels.len() {
            let (rx, ry) = self.level_resolution(level, full_res);
            if rx.max(ry) <= target * (1.0 + 1e-9) {
                best = level;
            }
        }
        best
    }
}

/// Header bytes with on-demand fetching of anything past the prefix.
struct HeaderBytes<'a> {
    reader: &'a dyn RangeReader,
    prefix: Bytes,
    size: u64,
}

impl<'a> HeaderBytes<'a> {
    async fn slice(&self, offset: u64, len: usize) -> Result<Bytes> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| SourceError::decode("TIFF offset overflow"))?;
        if end > self.size {
            return Err(SourceError::decode(format!(
                "TIFF structure at {}..{} past end of file ({} bytes)",
                offset, end, self.size
            )));
        }
        if end as usize <= self.prefix.len() {
            return Ok(self.prefix.slice(offset as usize..end as usize));
        }
        self.reader.read_range(offset, len).await
    }
}

struct RawEntry {
    tag: u16,
    field_type: u16,
    count: u64,
    data: Bytes,
}

fn field_size(field_type: u16) -> Result<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Ok(1),
        3 | 8 => Ok(2),
        4 | 9 | 11 => Ok(4),
        5 | 10 | 12 => Ok(8),
        16 | 17 | 18 => Err(SourceError::unsupported("BigTIFF field types")),
        other => Err(SourceError::decode(format!("unknown TIFF field type {}", other))),
    }
}

impl RawEntry {
    fn integers(&self, endian: Endian) -> Result<Vec<u64>> {
        let n = self.count as usize;
        let d = &self.data;
        let values = match self.field_type {
            1 | 7 => d.iter().take(n).map(|&b| b as u64).collect(),
            3 => (0..n).map(|i| endian.u16(&d[i * 2..]) as u64).collect(),
            4 => (0..n).map(|i| endian.u32(&d[i * 4..]) as u64).collect(),
            16 => (0..n).map(|i| endian.u64(&d[i * 8..])).collect(),
            other => {
                return Err(SourceError::decode(format!(
                    "tag {} has non-integer type {}",
                    self.tag, other
                )))
            }
        };
        Ok(values)
    }

    fn integer(&self, endian: Endian) -> Result<u64> {
        self.integers(endian)?
            .first()
            .copied()
            .ok_or_else(|| SourceError::decode(format!("tag {} is empty", self.tag)))
    }

    fn doubles(&self, endian: Endian) -> Result<Vec<f64>> {
        let n = self.count as usize;
        let d = &self.data;
        match self.field_type {
            12 => Ok((0..n).map(|i| endian.f64(&d[i * 8..])).collect()),
            11 => Ok((0..n).map(|i| endian.f32(&d[i * 4..]) as f64).collect()),
            _ => Ok(self.integers(endian)?.into_iter().map(|v| v as f64).collect()),
        }
    }

    fn ascii(&self) -> String {
        let end = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).trim().to_string()
    }
}

async fn read_ifd(
    bytes: &HeaderBytes<'_>,
    endian: Endian,
    offset: u64,
) -> Result<(Vec<RawEntry>, u64)> {
    let count_buf = bytes.slice(offset, 2).await?;
    let count = endian.u16(&count_buf) as usize;
    let table = bytes.slice(offset + 2, count * 12 + 4).await?;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let e = &table[i * 12..i * 12 + 12];
        let tag = endian.u16(&e[0..2]);
        let field_type = endian.u16(&e[2..4]);
        let value_count = endian.u32(&e[4..8]) as u64;
        let size = match field_size(field_type) {
            Ok(size) => size,
            // Unknown types on tags we do not read are harmless.
            Err(_) if !is_known_tag(tag) => continue,
            Err(e) => return Err(e),
        };
        let total = size as u64 * value_count;
        let data = if total <= 4 {
            table.slice(i * 12 + 8..i * 12 + 8 + total as usize)
        } else if is_known_tag(tag) {
            bytes.slice(endian.u32(&e[8..12]) as u64, total as usize).await?
        } else {
            Bytes::new()
        };
        entries.push(RawEntry {
            tag,
            field_type,
            count: value_count,
            data,
        });
    }
    let next = endian.u32(&table[count * 12..]) as u64;
    Ok((entries, next))
}

fn is_known_tag(tag: u16) -> bool {
    matches!(
        tag,
        TAG_NEW_SUBFILE_TYPE
            | TAG_IMAGE_WIDTH
            | TAG_IMAGE_LENGTH
            | TAG_BITS_PER_SAMPLE
            | TAG_COMPRESSION
            | TAG_SAMPLES_PER_PIXEL
            | TAG_PLANAR_CONFIG
            | TAG_PREDICTOR
            | TAG_TILE_WIDTH
            | TAG_TILE_LENGTH
            | TAG_TILE_OFFSETS
            | TAG_TILE_BYTE_COUNTS
            | TAG_SAMPLE_FORMAT
            | TAG_MODEL_PIXEL_SCALE
            | TAG_MODEL_TIEPOINT
            | TAG_GEO_KEY_DIRECTORY
            | TAG_GDAL_NODATA
    )
}

fn find<'e>(entries: &'e [RawEntry], tag: u16) -> Option<&'e RawEntry> {
    entries.iter().find(|e| e.tag == tag)
}

fn level_from_ifd(entries: &[RawEntry], endian: Endian) -> Result<ImageLevel> {
    let get = |tag: u16, name: &str| -> Result<u64> {
        find(entries, tag)
            .ok_or_else(|| {
                SourceError::unsupported(format!("missing {} tag (striped TIFF?)", name))
            })?
            .integer(endian)
    };
    let get_or = |tag: u16, default: u64| -> Result<u64> {
        match find(entries, tag) {
            Some(e) => e.integer(endian),
            None => Ok(default),
        }
    };

    let width = get(TAG_IMAGE_WIDTH, "ImageWidth")?;
    let height = get(TAG_IMAGE_LENGTH, "ImageLength")?;
    let tile_width = get(TAG_TILE_WIDTH, "TileWidth")?;
    let tile_height = get(TAG_TILE_LENGTH, "TileLength")?;
    let samples_per_pixel = get_or(TAG_SAMPLES_PER_PIXEL, 1)? as usize;
    let bits = get_or(TAG_BITS_PER_SAMPLE, 1)?;
    let sample_format = get_or(TAG_SAMPLE_FORMAT, 1)?;
    let compression = Compression::from_code(get_or(TAG_COMPRESSION, 1)?)?;
    let predictor = get_or(TAG_PREDICTOR, 1)? as u16;
    let planar = get_or(TAG_PLANAR_CONFIG, 1)?;

    if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
        return Err(SourceError::decode("zero image or tile dimension"));
    }
    if tile_width > MAX_TILE_DIM || tile_height > MAX_TILE_DIM {
        return Err(SourceError::decode(format!(
            "tile size {}x{} exceeds {}",
            tile_width, tile_height, MAX_TILE_DIM
        )));
    }
    if samples_per_pixel == 0 || samples_per_pixel > MAX_SAMPLES_PER_PIXEL {
        return Err(SourceError::decode(format!(
            "{} samples per pixel",
            samples_per_pixel
        )));
    }
    if planar != 1 && samples_per_pixel > 1 {
        return Err(SourceError::unsupported("planar configuration 2"));
    }
    if predictor != 1 && predictor != 2 {
        return Err(SourceError::unsupported(format!("predictor {}", predictor)));
    }

    let tile_offsets = find(entries, TAG_TILE_OFFSETS)
        .ok_or_else(|| SourceError::unsupported("missing TileOffsets tag"))?
        .integers(endian)?;
    let tile_byte_counts = find(entries, TAG_TILE_BYTE_COUNTS)
        .ok_or_else(|| SourceError::unsupported("missing TileByteCounts tag"))?
        .integers(endian)?;

    let level = ImageLevel {
        width,
        height,
        tile_width,
        tile_height,
        samples_per_pixel,
        sample_type: SampleType::from_tags(sample_format, bits)?,
        compression,
        predictor,
        tile_offsets,
        tile_byte_counts,
    };

    let decoded_bytes = (tile_width * tile_height)
        .checked_mul(samples_per_pixel as u64)
        .and_then(|n| n.checked_mul(level.sample_type.byte_size() as u64))
        .filter(|n| *n <= MAX_TILE_BYTES);
    if decoded_bytes.is_none() {
        return Err(SourceError::decode(format!(
            "{}x{} tiles of {} samples are too large to decode",
            tile_width, tile_height, samples_per_pixel
        )));
    }

    let expected = level
        .tiles_across()
        .checked_mul(level.tiles_down())
        .ok_or_else(|| SourceError::decode("tile grid overflows"))? as usize;
    if level.tile_offsets.len() < expected || level.tile_byte_counts.len() < expected {
        return Err(SourceError::decode(format!(
            "tile index has {} entries, expected {}",
            level.tile_offsets.len().min(level.tile_byte_counts.len()),
            expected
        )));
    }
    Ok(level)
}

fn geo_from_ifd(entries: &[RawEntry], endian: Endian) -> Result<Option<GeoTransform>> {
    let (Some(scale), Some(tie)) = (
        find(entries, TAG_MODEL_PIXEL_SCALE),
        find(entries, TAG_MODEL_TIEPOINT),
    ) else {
        return Ok(None);
    };
    let scale = scale.doubles(endian)?;
    let tie = tie.doubles(endian)?;
    if scale.len() < 2 || tie.len() < 6 {
        return Err(SourceError::decode("malformed georeferencing tags"));
    }
    Ok(Some(GeoTransform {
        origin_x: tie[3] - tie[0] * scale[0],
        origin_y: tie[4] + tie[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    }))
}

fn crs_from_ifd(entries: &[RawEntry], endian: Endian) -> Result<Option<CrsCode>> {
    let Some(dir) = find(entries, TAG_GEO_KEY_DIRECTORY) else {
        return Ok(None);
    };
    let keys = dir.integers(endian)?;
    if keys.len() < 4 {
        return Ok(None);
    }
    let n = keys[3] as usize;
    let mut epsg = None;
    for k in 0..n {
        let base = 4 + k * 4;
        if base + 3 >= keys.len() {
            break;
        }
        let (id, location, value) = (keys[base] as u16, keys[base + 1], keys[base + 3]);
        if location != 0 {
            continue;
        }
        match id {
            GEOKEY_PROJECTED_CS_TYPE => epsg = Some(value),
            GEOKEY_GEOGRAPHIC_TYPE if epsg.is_none() => epsg = Some(value),
            _ => {}
        }
    }
    Ok(match epsg {
        Some(4326) => Some(CrsCode::Epsg4326),
        Some(3857) | Some(900913) => Some(CrsCode::Epsg3857),
        _ => None,
    })
}

/// Read and parse the header of a tiled GeoTIFF.
pub async fn parse_header(reader: &dyn RangeReader) -> Result<CogHeader> {
    let size = reader.size().await?;
    if size < 8 {
        return Err(SourceError::decode("file too small for a TIFF header"));
    }
    let prefix_len = (size as usize).min(HEADER_PREFETCH);
    let prefix = reader.read_range(0, prefix_len).await?;

    let endian = match &prefix[0..2] {
        b"II" => Endian::Little,
        b"MM" => Endian::Big,
        _ => return Err(SourceError::decode("not a TIFF file")),
    };
    match endian.u16(&prefix[2..4]) {
        42 => {}
        43 => return Err(SourceError::unsupported("BigTIFF")),
        other => return Err(SourceError::decode(format!("bad TIFF magic {}", other))),
    }

    let bytes = HeaderBytes {
        reader,
        prefix: prefix.clone(),
        size,
    };

    let mut offset = endian.u32(&prefix[4..8]) as u64;
    let mut levels: Vec<ImageLevel> = Vec::new();
    let mut geo = None;
    let mut crs = None;
    let mut nodata = None;

    let mut seen = 0;
    while offset != 0 {
        seen += 1;
        if seen > MAX_IFDS {
            return Err(SourceError::decode("too many IFDs"));
        }
        let (entries, next) = read_ifd(&bytes, endian, offset).await?;
        offset = next;

        let subfile = match find(&entries, TAG_NEW_SUBFILE_TYPE) {
            Some(e) => e.integer(endian)?,
            None => 0,
        };
        if subfile & 4 != 0 {
            continue;
        }

        let level = level_from_ifd(&entries, endian)?;
        if levels.is_empty() {
            geo = geo_from_ifd(&entries, endian)?;
            crs = crs_from_ifd(&entries, endian)?;
            nodata = find(&entries, TAG_GDAL_NODATA).and_then(|e| e.ascii().parse::<f64>().ok());
        } else if level.samples_per_pixel != levels[0].samples_per_pixel {
            continue;
        }
        levels.push(level);
    }

    if levels.is_empty() {
        return Err(SourceError::decode("TIFF contains no image"));
    }
    let full_width = levels[0].width;
    levels[1..].sort_by(|a, b| b.width.cmp(&a.width));
    levels.retain(|l| l.width <= full_width);

    debug!(
        source = reader.identifier(),
        levels = levels.len(),
        width = full_width,
        height = levels[0].height,
        "Parsed COG header"
    );

    Ok(CogHeader {
        endian,
        levels,
        geo,
        crs,
        nodata,
    })
}
