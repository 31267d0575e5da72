//! Mapping output pixels onto a source pixel grid and resampling.

use tile_common::{CrsCode, ResamplingMethod};

use crate::types::WindowRequest;

/// North-up pixel grid of one source resolution level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub res_x: f64,
    pub res_y: f64,
    pub width: u64,
    pub height: u64,
    pub crs: CrsCode,
}

impl PixelGrid {
    /// Continuous pixel coordinates of a point given in `crs`.
    pub fn to_pixel(&self, crs: CrsCode, x: f64, y: f64) -> (f64, f64) {
        let (sx, sy) = crs.transform_point(self.crs, x, y);
        ((sx - self.origin_x) / self.res_x, (self.origin_y - sy) / self.res_y)
    }

    fn covers(&self, u: f64, v: f64) -> bool {
        u >= 0.0 && v >= 0.0 && u < self.width as f64 && v < self.height as f64
    }
}

/// Half-open range of source pixels, `col0..col1` by `row0..row1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRange {
    pub col0: u64,
    pub row0: u64,
    pub col1: u64,
    pub row1: u64,
}

impl PixelRange {
    pub fn width(&self) -> usize {
        (self.col1 - self.col0) as usize
    }

    pub fn height(&self) -> usize {
        (self.row1 - self.row0) as usize
    }
}

/// Source pixels needed to fill `request`, with a one pixel margin for
/// interpolation. `None` when the request misses the grid entirely.
pub fn pixel_window(grid: &PixelGrid, request: &WindowRequest) -> Option<PixelRange> {
    let bbox = request.bbox.transform(request.crs, grid.crs);
    let c0 = ((bbox.min_x - grid.origin_x) / grid.res_x).floor() - 1.0;
    let c1 = ((bbox.max_x - grid.origin_x) / grid.res_x).ceil() + 1.0;
    let r0 = ((grid.origin_y - bbox.max_y) / grid.res_y).floor() - 1.0;
    let r1 = ((grid.origin_y - bbox.min_y) / grid.res_y).ceil() + 1.0;

    let clamp = |v: f64, max: u64| -> u64 {
        if v.is_nan() || v <= 0.0 {
            0
        } else {
            (v as u64).min(max)
        }
    };
    let range = PixelRange {
        col0: clamp(c0, grid.width),
        row0: clamp(r0, grid.height),
        col1: clamp(c1, grid.width),
        row1: clamp(r1, grid.height),
    };
    if range.col0 >= range.col1 || range.row0 >= range.row1 {
        return None;
    }
    Some(range)
}

/// Source samples for a pixel range, one buffer per band.
#[derive(Debug, Clone)]
pub struct SourceWindow {
    pub range: PixelRange,
    pub bands: Vec<Vec<f32>>,
}

impl SourceWindow {
    fn get(&self, band: &[f32], col: i64, row: i64) -> f32 {
        let r = &self.range;
        if col < r.col0 as i64 || row < r.row0 as i64 || col >= r.col1 as i64 || row >= r.row1 as i64 {
            return f32::NAN;
        }
        let idx = (row as u64 - r.row0) as usize * r.width() + (col as u64 - r.col0) as usize;
        band[idx]
    }
}

/// Resample a source window into the output grid of `request`.
pub fn resample(
    window: &SourceWindow,
    grid: &PixelGrid,
    request: &WindowRequest,
    method: ResamplingMethod,
) -> Vec<Vec<f32>> {
    let (w, h) = (request.width, request.height);
    let (dx, dy) = request.pixel_size();
    let mut out = vec![vec![f32::NAN; w * h]; window.bands.len()];

    for row in 0..h {
        for col in 0..w {
            let (x, y) = request.pixel_center(col, row);
            let (u, v) = grid.to_pixel(request.crs, x, y);
            if !grid.covers(u, v) {
                continue;
            }
            let idx = row * w + col;
            match method {
                ResamplingMethod::Nearest => {
                    let (c, r) = (u.floor() as i64, v.floor() as i64);
                    for (b, band) in window.bands.iter().enumerate() {
                        out[b][idx] = window.get(band, c, r);
                    }
                }
                ResamplingMethod::Bilinear => {
                    for (b, band) in window.bands.iter().enumerate() {
                        out[b][idx] = bilinear(window, band, grid, u - 0.5, v - 0.5);
                    }
                }
                ResamplingMethod::Average => {
                    let (ul, _) = grid.to_pixel(request.crs, x - dx / 2.0, y);
                    let (ur, _) = grid.to_pixel(request.crs, x + dx / 2.0, y);
                    let (_, vt) = grid.to_pixel(request.crs, x, y + dy / 2.0);
                    let (_, vb) = grid.to_pixel(request.crs, x, y - dy / 2.0);
                    let c0 = ul.min(ur).floor() as i64;
                    let c1 = (ul.max(ur).ceil() as i64).max(c0 + 1);
                    let r0 = vt.min(vb).floor() as i64;
                    let r1 = (vt.max(vb).ceil() as i64).max(r0 + 1);
                    for (b, band) in window.bands.iter().enumerate() {
                        out[b][idx] = average(window, band, (c0, c1), (r0, r1));
                    }
                }
            }
        }
    }
    out
}

/// Bilinear interpolation between the four pixel centres around `(x, y)`,
/// where integer coordinates sit on pixel centres. Edges clamp.
fn bilinear(window: &SourceWindow, band: &[f32], grid: &PixelGrid, x: f64, y: f64) -> f32 {
    let max_c = grid.width as i64 - 1;
    let max_r = grid.height as i64 - 1;
    let x = x.clamp(0.0, max_c as f64);
    let y = y.clamp(0.0, max_r as f64);

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = (x0 + 1).min(max_c);
    let y1 = (y0 + 1).min(max_r);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = window.get(band, x0, y0);
    let v10 = window.get(band, x1, y0);
    let v01 = window.get(band, x0, y1);
    let v11 = window.get(band, x1, y1);

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Mean of the valid samples in the footprint.
fn average(window: &SourceWindow, band: &[f32], cols: (i64, i64), rows: (i64, i64)) -> f32 {
    let mut sum = 0.0f64;
    let mut n = 0u32;
    for r in rows.0..rows.1 {
        for c in cols.0..cols.1 {
            let v = window.get(band, c, r);
            if !v.is_nan() {
                sum += v as f64;
                n += 1;
            }
        }
    }
    if n == 0 {
        f32::NAN
    } else {
        (sum / n as f64) as f32
    }
}
