//! Writer for small tiled GeoTIFFs with internal overviews.
//!
//! Produces classic (non-Big) TIFFs laid out the way COG writers do:
//! every IFD and its tag data first, tile data after.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::path::Path;

/// Sample encoding of the written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CogSampleType {
    U8,
    U16,
    I16,
    F32,
}

impl CogSampleType {
    fn bytes(self) -> usize {
        match self {
            CogSampleType::U8 => 1,
            CogSampleType::U16 | CogSampleType::I16 => 2,
            CogSampleType::F32 => 4,
        }
    }

    fn bits(self) -> u16 {
        self.bytes() as u16 * 8
    }

    fn format_code(self) -> u16 {
        match self {
            CogSampleType::U8 | CogSampleType::U16 => 1,
            CogSampleType::I16 => 2,
            CogSampleType::F32 => 3,
        }
    }
}

/// Builder for a tiled GeoTIFF.
///
/// `bands` hold full-resolution samples, row-major from the top-left.
/// NaN samples are written as the nodata value (or 0 without one).
#[derive(Debug, Clone)]
pub struct CogBuilder {
    width: u32,
    height: u32,
    bands: Vec<Vec<f32>>,
    tile_size: u32,
    sample_type: CogSampleType,
    deflate: bool,
    predictor: bool,
    overviews: usize,
    geo: Option<(f64, f64, f64, f64)>,
    epsg: Option<u16>,
    nodata: Option<f64>,
    big_endian: bool,
    sparse: bool,
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

struct Level {
    width: u32,
    height: u32,
    bands: Vec<Vec<f32>>,
}

impl CogBuilder {
    pub fn new(width: u32, height: u32, band: Vec<f32>) -> Self {
        assert_eq!(band.len(), (width * height) as usize, "band size mismatch");
        Self {
            width,
            height,
            bands: vec![band],
            tile_size: 256,
            sample_type: CogSampleType::F32,
            deflate: false,
            predictor: false,
            overviews: 0,
            geo: None,
            epsg: None,
            nodata: None,
            big_endian: false,
            sparse: false,
        }
    }

    pub fn add_band(mut self, band: Vec<f32>) -> Self {
        assert_eq!(band.len(), (self.width * self.height) as usize, "band size mismatch");
        self.bands.push(band);
        self
    }

    pub fn tile_size(mut self, size: u32) -> Self {
        assert!(size % 16 == 0, "TIFF tile size must be a multiple of 16");
        self.tile_size = size;
        self
    }

    pub fn sample_type(mut self, sample_type: CogSampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.deflate = true;
        self
    }

    /// Horizontal differencing (integer sample types only).
    pub fn predictor(mut self) -> Self {
        self.predictor = true;
        self
    }

    /// Number of half-resolution overviews to add.
    pub fn overviews(mut self, count: usize) -> Self {
        self.overviews = count;
        self
    }

    /// North-up georeferencing: top-left corner and pixel size.
    pub fn georeference(mut self, origin_x: f64, origin_y: f64, pixel_w: f64, pixel_h: f64) -> Self {
        self.geo = Some((origin_x, origin_y, pixel_w, pixel_h));
        self
    }

    pub fn epsg(mut self, code: u16) -> Self {
        self.epsg = Some(code);
        self
    }

    pub fn nodata(mut self, value: f64) -> Self {
        self.nodata = Some(value);
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// Omit tiles that hold only NaN (offset and byte count 0).
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    fn levels(&self) -> Vec<Level> {
        let mut levels = vec![Level {
            width: self.width,
            height: self.height,
            bands: self.bands.clone(),
        }];
        for _ in 0..self.overviews {
            let prev = &levels[levels.len() - 1];
            if prev.width < 2 || prev.height < 2 {
                break;
            }
            let (w, h) = (prev.width / 2, prev.height / 2);
            let bands = prev
                .bands
                .iter()
                .map(|band| downsample(band, prev.width as usize, w as usize, h as usize))
                .collect();
            levels.push(Level {
                width: w,
                height: h,
                bands,
            });
        }
        levels
    }

    fn u16s(&self, values: &[u16]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * 2];
        for (i, v) in values.iter().enumerate() {
            if self.big_endian {
                BigEndian::write_u16(&mut buf[i * 2..], *v);
            } else {
                LittleEndian::write_u16(&mut buf[i * 2..], *v);
            }
        }
        buf
    }

    fn u32s(&self, values: &[u32]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * 4];
        for (i, v) in values.iter().enumerate() {
            if self.big_endian {
                BigEndian::write_u32(&mut buf[i * 4..], *v);
            } else {
                LittleEndian::write_u32(&mut buf[i * 4..], *v);
            }
        }
        buf
    }

    fn f64s(&self, values: &[f64]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * 8];
        for (i, v) in values.iter().enumerate() {
            if self.big_endian {
                BigEndian::write_f64(&mut buf[i * 8..], *v);
            } else {
                LittleEndian::write_f64(&mut buf[i * 8..], *v);
            }
        }
        buf
    }

    fn encode_sample(&self, value: f32, out: &mut [u8]) {
        let fill = self.nodata.unwrap_or(0.0) as f32;
        let v = if value.is_nan() { fill } else { value };
        match self.sample_type {
            CogSampleType::U8 => out[0] = v as u8,
            CogSampleType::U16 => {
                if self.big_endian {
                    BigEndian::write_u16(out, v as u16)
                } else {
                    LittleEndian::write_u16(out, v as u16)
                }
            }
            CogSampleType::I16 => {
                if self.big_endian {
                    BigEndian::write_i16(out, v as i16)
                } else {
                    LittleEndian::write_i16(out, v as i16)
                }
            }
            CogSampleType::F32 => {
                if self.big_endian {
                    BigEndian::write_f32(out, v)
                } else {
                    LittleEndian::write_f32(out, v)
                }
            }
        }
    }

    /// Encoded bytes of tile `(tx, ty)`, or `None` for an omitted sparse tile.
    fn encode_tile(&self, level: &Level, tx: u32, ty: u32) -> Option<Vec<u8>> {
        let ts = self.tile_size as usize;
        let spp = level.bands.len();
        let size = self.sample_type.bytes();
        let mut raw = vec![0u8; ts * ts * spp * size];
        let mut any_valid = false;

        for row in 0..ts {
            for col in 0..ts {
                let x = tx as usize * ts + col;
                let y = ty as usize * ts + row;
                for (b, band) in level.bands.iter().enumerate() {
                    let value = if x < level.width as usize && y < level.height as usize {
                        band[y * level.width as usize + x]
                    } else {
                        f32::NAN
                    };
                    any_valid |= !value.is_nan();
                    let at = ((row * ts + col) * spp + b) * size;
                    self.encode_sample(value, &mut raw[at..at + size]);
                }
            }
        }

        if self.sparse && !any_valid {
            return None;
        }

        if self.predictor {
            difference_rows(&mut raw, ts * spp, spp, size, self.big_endian);
        }

        if self.deflate {
            let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&raw).expect("in-memory write");
            Some(enc.finish().expect("in-memory write"))
        } else {
            Some(raw)
        }
    }

    fn entries(&self, level: &Level, overview: bool, offsets: &[u32], counts: &[u32]) -> Vec<Entry> {
        let spp = level.bands.len() as u16;
        let short = |tag, values: &[u16]| Entry {
            tag,
            field_type: 3,
            count: values.len() as u32,
            data: self.u16s(values),
        };
        let long = |tag, values: &[u32]| Entry {
            tag,
            field_type: 4,
            count: values.len() as u32,
            data: self.u32s(values),
        };
        let double = |tag, values: &[f64]| Entry {
            tag,
            field_type: 12,
            count: values.len() as u32,
            data: self.f64s(values),
        };

        let mut entries = vec![
            long(256, &[level.width]),
            long(257, &[level.height]),
            short(258, &vec![self.sample_type.bits(); spp as usize]),
            short(259, &[if self.deflate { 8 } else { 1 }]),
            short(262, &[1]),
            short(277, &[spp]),
            short(284, &[1]),
            long(322, &[self.tile_size]),
            long(323, &[self.tile_size]),
            long(324, offsets),
            long(325, counts),
            short(339, &vec![self.sample_type.format_code(); spp as usize]),
        ];
        if overview {
            entries.push(long(254, &[1]));
        }
        if self.predictor {
            entries.push(short(317, &[2]));
        }

        if !overview {
            if let Some((ox, oy, pw, ph)) = self.geo {
                entries.push(double(33550, &[pw, ph, 0.0]));
                entries.push(double(33922, &[0.0, 0.0, 0.0, ox, oy, 0.0]));
            }
            if let Some(epsg) = self.epsg {
                let (model, key) = if epsg == 4326 { (2, 2048) } else { (1, 3072) };
                entries.push(short(
                    34735,
                    &[1, 1, 0, 3, 1024, 0, 1, model, 1025, 0, 1, 1, key, 0, 1, epsg],
                ));
            }
            if let Some(nd) = self.nodata {
                let mut text = format!("{}", nd).into_bytes();
                text.push(0);
                entries.push(Entry {
                    tag: 42113,
                    field_type: 2,
                    count: text.len() as u32,
                    data: text,
                });
            }
        }

        entries.sort_by_key(|e| e.tag);
        entries
    }

    /// Serialized size of an IFD including its out-of-line tag data.
    fn ifd_size(entries: &[Entry]) -> usize {
        let external: usize = entries
            .iter()
            .filter(|e| e.data.len() > 4)
            .map(|e| e.data.len() + e.data.len() % 2)
            .sum();
        2 + entries.len() * 12 + 4 + external
    }

    fn write_ifd(&self, out: &mut Vec<u8>, entries: &[Entry], next: u32) {
        let start = out.len();
        let mut external_at = start + 2 + entries.len() * 12 + 4;
        let mut external = Vec::new();

        out.extend(self.u16s(&[entries.len() as u16]));
        for e in entries {
            out.extend(self.u16s(&[e.tag, e.field_type]));
            out.extend(self.u32s(&[e.count]));
            if e.data.len() <= 4 {
                let mut inline = e.data.clone();
                inline.resize(4, 0);
                out.extend(inline);
            } else {
                out.extend(self.u32s(&[external_at as u32]));
                external.extend(&e.data);
                if e.data.len() % 2 == 1 {
                    external.push(0);
                }
                external_at += e.data.len() + e.data.len() % 2;
            }
        }
        out.extend(self.u32s(&[next]));
        out.extend(external);
    }

    /// Serialize the whole file.
    pub fn build(&self) -> Vec<u8> {
        let levels = self.levels();
        let ts = self.tile_size;

        let tiles: Vec<Vec<Option<Vec<u8>>>> = levels
            .iter()
            .map(|level| {
                let across = level.width.div_ceil(ts);
                let down = level.height.div_ceil(ts);
                (0..down)
                    .flat_map(|ty| (0..across).map(move |tx| (tx, ty)))
                    .map(|(tx, ty)| self.encode_tile(level, tx, ty))
                    .collect()
            })
            .collect();

        // IFD sizes do not depend on offset values, so size with zeros first.
        let ifd_sizes: Vec<usize> = levels
            .iter()
            .zip(&tiles)
            .enumerate()
            .map(|(i, (level, t))| {
                let zeros = vec![0u32; t.len()];
                Self::ifd_size(&self.entries(level, i > 0, &zeros, &zeros))
            })
            .collect();

        let mut data_at = 8 + ifd_sizes.iter().sum::<usize>();
        let mut layout = Vec::new();
        for t in &tiles {
            let mut offsets = Vec::with_capacity(t.len());
            let mut counts = Vec::with_capacity(t.len());
            for tile in t {
                match tile {
                    Some(bytes) => {
                        offsets.push(data_at as u32);
                        counts.push(bytes.len() as u32);
                        data_at += bytes.len();
                    }
                    None => {
                        offsets.push(0);
                        counts.push(0);
                    }
                }
            }
            layout.push((offsets, counts));
        }

        let mut out = Vec::with_capacity(data_at);
        out.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        out.extend(self.u16s(&[42]));
        out.extend(self.u32s(&[8]));

        let mut ifd_at = 8;
        for (i, level) in levels.iter().enumerate() {
            let next = if i + 1 < levels.len() {
                (ifd_at + ifd_sizes[i]) as u32
            } else {
                0
            };
            let (offsets, counts) = &layout[i];
            let entries = self.entries(level, i > 0, offsets, counts);
            self.write_ifd(&mut out, &entries, next);
            ifd_at += ifd_sizes[i];
        }

        for tile in tiles.iter().flatten().flatten() {
            out.extend(tile);
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build())
    }
}

/// 2x2 mean, skipping NaN.
fn downsample(band: &[f32], src_w: usize, w: usize, h: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            let mut n = 0;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let v = band[(y * 2 + dy) * src_w + x * 2 + dx];
                if !v.is_nan() {
                    sum += v;
                    n += 1;
                }
            }
            out.push(if n == 0 { f32::NAN } else { sum / n as f32 });
        }
    }
    out
}

fn difference_rows(raw: &mut [u8], row_samples: usize, spp: usize, size: usize, big_endian: bool) {
    let read = |b: &[u8]| -> u32 {
        match (size, big_endian) {
            (1, _) => b[0] as u32,
            (2, true) => BigEndian::read_u16(b) as u32,
            (2, false) => LittleEndian::read_u16(b) as u32,
            _ => unreachable!("predictor only on 8/16 bit samples"),
        }
    };
    for row in raw.chunks_exact_mut(row_samples * size) {
        for i in (spp..row_samples).rev() {
            let cur = read(&row[i * size..]);
            let prev = read(&row[(i - spp) * size..]);
            let diff = cur.wrapping_sub(prev);
            match (size, big_endian) {
                (1, _) => row[i * size] = diff as u8,
                (2, true) => BigEndian::write_u16(&mut row[i * size..], diff as u16),
                _ => LittleEndian::write_u16(&mut row[i * size..], diff as u16),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_first_ifd() {
        let bytes = CogBuilder::new(32, 32, vec![1.0; 32 * 32])
            .tile_size(16)
            .build();
        assert_eq!(&bytes[0..4], &[b'I', b'I', 42, 0]);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 8);
        // 4 tiles of 16x16 f32
        assert!(bytes.len() > 4 * 16 * 16 * 4);
    }

    #[test]
    fn test_overviews_shrink() {
        let builder = CogBuilder::new(64, 32, vec![2.0; 64 * 32]).overviews(2);
        let levels = builder.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!((levels[2].width, levels[2].height), (16, 8));
        assert_eq!(levels[2].bands[0][0], 2.0);
    }

    #[test]
    fn test_sparse_tiles_omitted() {
        let mut band = vec![f32::NAN; 32 * 16];
        band[0] = 1.0;
        let dense = CogBuilder::new(32, 16, band.clone()).tile_size(16).build();
        let sparse = CogBuilder::new(32, 16, band).tile_size(16).sparse().build();
        assert_eq!(dense.len() - sparse.len(), 16 * 16 * 4);
    }
}
