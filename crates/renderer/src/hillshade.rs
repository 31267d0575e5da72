//! Relief shading from an elevation grid.
//!
//! Slope and aspect come from Horn's 3x3 finite differences; the shade is
//! the Lambertian term for a light at `azimuth`/`altitude`:
//!
//! ```text
//! shade = cos(zenith) * cos(slope) + sin(zenith) * sin(slope) * cos(azimuth - aspect)
//! ```

use std::f64::consts::{FRAC_PI_2, PI};

use tile_common::{BoundingBox, CrsCode, HillshadeParams};

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Ground size of one pixel in meters, `(dx, dy)`.
///
/// Geographic grids are scaled by the cosine of the center latitude, Web
/// Mercator grids by the Mercator scale factor at the center.
pub fn ground_cell_size(bbox: &BoundingBox, crs: CrsCode, width: usize, height: usize) -> (f64, f64) {
    let dx = bbox.width() / width.max(1) as f64;
    let dy = bbox.height() / height.max(1) as f64;
    let center_y = (bbox.min_y + bbox.max_y) / 2.0;

    match crs {
        CrsCode::Epsg4326 => {
            let lat = center_y.clamp(-89.9, 89.9).to_radians();
            (dx * METERS_PER_DEGREE * lat.cos(), dy * METERS_PER_DEGREE)
        }
        CrsCode::Epsg3857 => {
            let (_, lat) = CrsCode::Epsg3857.transform_point(CrsCode::Epsg4326, 0.0, center_y);
            let scale = lat.to_radians().cos();
            (dx * scale, dy * scale)
        }
    }
}

/// Shade intensity in `[0, 1]` per pixel, NaN where the elevation is nodata.
///
/// Neighbors outside the grid or holding nodata are replaced by the center
/// value, which flattens the surface at edges instead of darkening them.
pub fn compute_hillshade(
    elevation: &[f32],
    width: usize,
    height: usize,
    cell_size: (f64, f64),
    params: &HillshadeParams,
) -> Vec<f32> {
    let zenith = (90.0 - params.altitude).to_radians();
    // Compass azimuth to math angle (counter-clockwise from east)
    let mut azimuth = 360.0 - params.azimuth + 90.0;
    if azimuth >= 360.0 {
        azimuth -= 360.0;
    }
    let azimuth = azimuth.to_radians();
    let (cell_x, cell_y) = cell_size;

    let mut shade = vec![f32::NAN; width * height];
    for row in 0..height {
        for col in 0..width {
            let center = elevation[row * width + col];
            if center.is_nan() {
                continue;
            }
            let z = |dc: isize, dr: isize| -> f64 {
                let c = col as isize + dc;
                let r = row as isize + dr;
                if c < 0 || r < 0 || c >= width as isize || r >= height as isize {
                    return center as f64;
                }
                let v = elevation[r as usize * width + c as usize];
                if v.is_nan() {
                    center as f64
                } else {
                    v as f64
                }
            };

            let (a, b, c) = (z(-1, -1), z(0, -1), z(1, -1));
            let (d, f) = (z(-1, 0), z(1, 0));
            let (g, h, i) = (z(-1, 1), z(0, 1), z(1, 1));

            let dzdx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * cell_x);
            let dzdy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / (8.0 * cell_y);

            let slope = (params.z_factor * (dzdx * dzdx + dzdy * dzdy).sqrt()).atan();
            let aspect = if dzdx != 0.0 {
                let a = dzdy.atan2(-dzdx);
                if a < 0.0 {
                    a + 2.0 * PI
                } else {
                    a
                }
            } else if dzdy > 0.0 {
                FRAC_PI_2
            } else if dzdy < 0.0 {
                2.0 * PI - FRAC_PI_2
            } else {
                0.0
            };

            let value = zenith.cos() * slope.cos()
                + zenith.sin() * slope.sin() * (azimuth - aspect).cos();
            shade[row * width + col] = value.clamp(0.0, 1.0) as f32;
        }
    }
    shade
}

/// Darken RGBA pixels by the shade: `color * (1 - strength + strength * shade)`.
pub fn apply_hillshade(pixels: &mut [u8], shade: &[f32], strength: f64) {
    for (px, s) in pixels.chunks_exact_mut(4).zip(shade) {
        if s.is_nan() || px[3] == 0 {
            continue;
        }
        let factor = 1.0 - strength + strength * *s as f64;
        for channel in px.iter_mut().take(3) {
            *channel = (*channel as f64 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}
