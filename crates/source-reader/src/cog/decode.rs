//! Tile decompression and sample conversion.

use flate2::read::ZlibDecoder;
use std::io::Read;

use super::tiff::{Compression, Endian, ImageLevel, SampleType};
use crate::error::{Result, SourceError};

/// Decode one stored tile into per-band `f32` samples.
///
/// Returned bands are `tile_width * tile_height` long. Samples equal to
/// `nodata` become NaN.
pub fn decode_tile(
    level: &ImageLevel,
    endian: Endian,
    raw: &[u8],
    nodata: Option<f64>,
) -> Result<Vec<Vec<f32>>> {
    let expected = level.tile_bytes();
    let mut data = match level.compression {
        Compression::None => raw.to_vec(),
        Compression::Deflate => {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(raw)
                .take(expected as u64)
                .read_to_end(&mut out)
                .map_err(|e| SourceError::decode(format!("deflate: {}", e)))?;
            out
        }
    };

    if data.len() < expected {
        return Err(SourceError::decode(format!(
            "tile decoded to {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    data.truncate(expected);

    if level.predictor == 2 {
        undo_horizontal_predictor(&mut data, level, endian)?;
    }

    Ok(to_bands(&data, level, endian, nodata))
}

/// Reverse TIFF predictor 2: each sample stores its difference from the
/// same band's previous sample in the row.
fn undo_horizontal_predictor(data: &mut [u8], level: &ImageLevel, endian: Endian) -> Result<()> {
    if level.sample_type.is_float() {
        return Err(SourceError::unsupported(
            "horizontal predictor on floating point samples",
        ));
    }
    let spp = level.samples_per_pixel;
    let size = level.sample_type.byte_size();
    let row_samples = level.tile_width as usize * spp;
    let row_bytes = row_samples * size;

    for row in data.chunks_exact_mut(row_bytes) {
        for i in spp..row_samples {
            let (cur, prev) = (i * size, (i - spp) * size);
            match size {
                1 => row[cur] = row[cur].wrapping_add(row[prev]),
                2 => {
                    let v = endian.u16(&row[cur..]).wrapping_add(endian.u16(&row[prev..]));
                    endian.write_u16(&mut row[cur..cur + 2], v);
                }
                4 => {
                    let v = endian.u32(&row[cur..]).wrapping_add(endian.u32(&row[prev..]));
                    endian.write_u32(&mut row[cur..cur + 4], v);
                }
                other => {
                    return Err(SourceError::unsupported(format!(
                        "horizontal predictor on {}-byte samples",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}

fn to_bands(data: &[u8], level: &ImageLevel, endian: Endian, nodata: Option<f64>) -> Vec<Vec<f32>> {
    let spp = level.samples_per_pixel;
    let size = level.sample_type.byte_size();
    let pixels = (level.tile_width * level.tile_height) as usize;
    let mut bands = vec![Vec::with_capacity(pixels); spp];

    for (i, sample) in data.chunks_exact(size).enumerate() {
        let value = match level.sample_type {
            SampleType::U8 => sample[0] as f64,
            SampleType::I8 => sample[0] as i8 as f64,
            SampleType::U16 => endian.u16(sample) as f64,
            SampleType::I16 => endian.u16(sample) as i16 as f64,
            SampleType::U32 => endian.u32(sample) as f64,
            SampleType::I32 => endian.u32(sample) as i32 as f64,
            SampleType::F32 => endian.f32(sample) as f64,
            SampleType::F64 => endian.f64(sample),
        };
        let is_nodata = match nodata {
            Some(nd) => value == nd,
            None => false,
        };
        bands[i % spp].push(if is_nodata { f32::NAN } else { value as f32 });
    }
    bands
}
