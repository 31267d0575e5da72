//! Geometry preparation for vector tiles.
//!
//! A feature geometry goes through four steps:
//! 1. Clip to the tile bounds grown by the buffer (in source CRS units)
//! 2. Transform to tile space, `0..extent` with y pointing down
//! 3. Optionally simplify with a zoom-dependent tolerance
//! 4. Quantize to integers, drop degenerate parts and fix ring winding
//!
//! [`TileGeometry::commands`] then produces the MVT command stream.

use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, LineString, MapCoords,
    MultiLineString, MultiPolygon, Polygon, Rect, Simplify,
};
use tile_common::BoundingBox;

use crate::pbf::zigzag;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Zoom at and above which the base tolerance applies unchanged.
const DETAIL_ZOOM: u32 = 14;

/// Base simplification tolerance in tile units.
const BASE_TOLERANCE: f64 = 1.0;

/// MVT geometry type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

impl GeomType {
    pub fn from_code(code: u64) -> Option<GeomType> {
        match code {
            1 => Some(GeomType::Point),
            2 => Some(GeomType::LineString),
            3 => Some(GeomType::Polygon),
            _ => None,
        }
    }
}

type Ring = Vec<(i32, i32)>;

/// Quantized geometry in tile coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum TileGeometry {
    Points(Vec<(i32, i32)>),
    Lines(Vec<Vec<(i32, i32)>>),
    /// Each polygon is its exterior ring followed by its holes. Rings are
    /// stored without the closing point.
    Polygons(Vec<Vec<Ring>>),
}

impl TileGeometry {
    pub fn geom_type(&self) -> GeomType {
        match self {
            TileGeometry::Points(_) => GeomType::Point,
            TileGeometry::Lines(_) => GeomType::LineString,
            TileGeometry::Polygons(_) => GeomType::Polygon,
        }
    }

    /// Encode as an MVT command stream with zigzag deltas.
    pub fn commands(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = (0i32, 0i32);
        let mut push_point = |out: &mut Vec<u32>, p: (i32, i32)| {
            out.push(zigzag((p.0 - cursor.0) as i64) as u32);
            out.push(zigzag((p.1 - cursor.1) as i64) as u32);
            cursor = p;
        };

        match self {
            TileGeometry::Points(points) => {
                out.push(command(CMD_MOVE_TO, points.len()));
                for p in points {
                    push_point(&mut out, *p);
                }
            }
            TileGeometry::Lines(lines) => {
                for line in lines {
                    out.push(command(CMD_MOVE_TO, 1));
                    push_point(&mut out, line[0]);
                    out.push(command(CMD_LINE_TO, line.len() - 1));
                    for p in &line[1..] {
                        push_point(&mut out, *p);
                    }
                }
            }
            TileGeometry::Polygons(polygons) => {
                for ring in polygons.iter().flatten() {
                    out.push(command(CMD_MOVE_TO, 1));
                    push_point(&mut out, ring[0]);
                    out.push(command(CMD_LINE_TO, ring.len() - 1));
                    for p in &ring[1..] {
                        push_point(&mut out, *p);
                    }
                    out.push(command(CMD_CLOSE_PATH, 1));
                }
            }
        }
        out
    }
}

#[inline]
fn command(id: u32, count: usize) -> u32 {
    (id & 0x7) | ((count as u32) << 3)
}

/// Simplification tolerance in tile units for `zoom`: the base tolerance at
/// and above zoom 14, growing linearly below it.
pub fn simplify_tolerance(zoom: u32) -> f64 {
    BASE_TOLERANCE * (1.0 + DETAIL_ZOOM.saturating_sub(zoom) as f64 / 4.0)
}

/// Maps source coordinates into tile space.
#[derive(Debug, Clone, Copy)]
pub struct TileTransform {
    bounds: BoundingBox,
    extent: u32,
}

impl TileTransform {
    pub fn new(bounds: BoundingBox, extent: u32) -> Self {
        Self { bounds, extent }
    }

    /// `bounds` grown by `buffer` tile units on every side.
    pub fn buffered_bounds(&self, buffer: u32) -> BoundingBox {
        let dx = self.bounds.width() * buffer as f64 / self.extent as f64;
        let dy = self.bounds.height() * buffer as f64 / self.extent as f64;
        self.bounds.expand(dx, dy)
    }

    fn to_tile(&self, c: Coord<f64>) -> Coord<f64> {
        let e = self.extent as f64;
        Coord {
            x: (c.x - self.bounds.min_x) / self.bounds.width() * e,
            y: (self.bounds.max_y - c.y) / self.bounds.height() * e,
        }
    }

    /// Run the whole pipeline on one geometry. `None` when nothing of it
    /// survives clipping and quantization.
    pub fn prepare(
        &self,
        geometry: &Geometry<f64>,
        buffer: u32,
        tolerance: Option<f64>,
    ) -> Option<TileGeometry> {
        let clip = self.buffered_bounds(buffer);
        let clipped = clip_geometry(geometry, &clip)?;
        let local = clipped.map_coords(|c| self.to_tile(c));
        let simplified = match tolerance {
            Some(eps) if eps > 0.0 => simplify(local, eps),
            _ => local,
        };
        quantize(&simplified)
    }
}

fn clip_rect(bounds: &BoundingBox) -> Rect<f64> {
    Rect::new(
        Coord { x: bounds.min_x, y: bounds.min_y },
        Coord { x: bounds.max_x, y: bounds.max_y },
    )
}

fn rect_overlaps(rect: &Rect<f64>, bounds: &BoundingBox) -> bool {
    rect.max().x >= bounds.min_x
        && rect.min().x <= bounds.max_x
        && rect.max().y >= bounds.min_y
        && rect.min().y <= bounds.max_y
}

fn rect_within(rect: &Rect<f64>, bounds: &BoundingBox) -> bool {
    rect.min().x >= bounds.min_x
        && rect.max().x <= bounds.max_x
        && rect.min().y >= bounds.min_y
        && rect.max().y <= bounds.max_y
}

/// Clip a geometry to `bounds`. Points outside are dropped, lines are cut
/// and polygons intersected with the bounds rectangle.
pub fn clip_geometry(geometry: &Geometry<f64>, bounds: &BoundingBox) -> Option<Geometry<f64>> {
    let rect = geometry.bounding_rect()?;
    if !rect_overlaps(&rect, bounds) {
        return None;
    }
    if rect_within(&rect, bounds) {
        return Some(geometry.clone());
    }

    let clip_poly = clip_rect(bounds).to_polygon();
    match geometry {
        Geometry::Point(p) => bounds.contains_point(p.x(), p.y()).then(|| Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let kept: Vec<_> = mp
                .iter()
                .filter(|p| bounds.contains_point(p.x(), p.y()))
                .copied()
                .collect();
            (!kept.is_empty()).then(|| Geometry::MultiPoint(kept.into()))
        }
        Geometry::Line(line) => clip_lines(&clip_poly, &MultiLineString::new(vec![LineString::from(*line)])),
        Geometry::LineString(ls) => clip_lines(&clip_poly, &MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(mls) => clip_lines(&clip_poly, mls),
        Geometry::Polygon(poly) => clip_polygons(&clip_poly, &MultiPolygon::new(vec![poly.clone()])),
        Geometry::MultiPolygon(mp) => clip_polygons(&clip_poly, mp),
        Geometry::Rect(r) => clip_polygons(&clip_poly, &MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => clip_polygons(&clip_poly, &MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<_> = gc.iter().filter_map(|g| clip_geometry(g, bounds)).collect();
            (!parts.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection(parts)))
        }
    }
}

fn clip_lines(clip_poly: &Polygon<f64>, lines: &MultiLineString<f64>) -> Option<Geometry<f64>> {
    let clipped = clip_poly.clip(lines, false);
    (!clipped.0.is_empty()).then(|| Geometry::MultiLineString(clipped))
}

fn clip_polygons(clip_poly: &Polygon<f64>, polygons: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let clipped = polygons.intersection(&MultiPolygon::new(vec![clip_poly.clone()]));
    (!clipped.0.is_empty()).then(|| Geometry::MultiPolygon(clipped))
}

fn simplify(geometry: Geometry<f64>, eps: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&eps)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&eps)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(&eps)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&eps)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.into_iter().map(|g| simplify(g, eps)).collect(),
        )),
        other => other,
    }
}

fn round(c: &Coord<f64>) -> (i32, i32) {
    (c.x.round() as i32, c.y.round() as i32)
}

/// Rounded coordinates with consecutive duplicates removed.
fn quantize_path(ls: &LineString<f64>) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(ls.0.len());
    for c in &ls.0 {
        let p = round(c);
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Twice the signed area by the surveyor's formula. With y pointing down a
/// positive value means clockwise on screen.
fn signed_area2(ring: &[(i32, i32)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
        })
        .sum()
}

/// Quantized ring without closing point, oriented to `exterior`. `None` for
/// rings that collapse to zero area.
fn quantize_ring(ls: &LineString<f64>, exterior: bool) -> Option<Ring> {
    let mut ring = quantize_path(ls);
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return None;
    }
    let area = signed_area2(&ring);
    if area == 0 {
        return None;
    }
    if (area > 0) != exterior {
        ring.reverse();
    }
    Some(ring)
}

fn quantize_polygon(poly: &Polygon<f64>) -> Option<Vec<Ring>> {
    let exterior = quantize_ring(poly.exterior(), true)?;
    let mut rings = vec![exterior];
    rings.extend(poly.interiors().iter().filter_map(|r| quantize_ring(r, false)));
    Some(rings)
}

fn quantize_lines<'a>(lines: impl Iterator<Item = &'a LineString<f64>>) -> Option<TileGeometry> {
    let lines: Vec<_> = lines.map(quantize_path).filter(|l| l.len() >= 2).collect();
    (!lines.is_empty()).then_some(TileGeometry::Lines(lines))
}

fn quantize_polygons<'a>(polys: impl Iterator<Item = &'a Polygon<f64>>) -> Option<TileGeometry> {
    let polys: Vec<_> = polys.filter_map(quantize_polygon).collect();
    (!polys.is_empty()).then_some(TileGeometry::Polygons(polys))
}

/// Round to integer tile coordinates. Degenerate parts are dropped.
/// Collections keep the parts sharing the type of the first surviving part.
pub fn quantize(geometry: &Geometry<f64>) -> Option<TileGeometry> {
    match geometry {
        Geometry::Point(p) => Some(TileGeometry::Points(vec![round(&p.0)])),
        Geometry::MultiPoint(mp) => {
            let mut points: Vec<(i32, i32)> = Vec::new();
            for p in mp.iter() {
                let q = round(&p.0);
                if !points.contains(&q) {
                    points.push(q);
                }
            }
            (!points.is_empty()).then_some(TileGeometry::Points(points))
        }
        Geometry::Line(line) => quantize_lines(std::iter::once(&LineString::from(*line))),
        Geometry::LineString(ls) => quantize_lines(std::iter::once(ls)),
        Geometry::MultiLineString(mls) => quantize_lines(mls.iter()),
        Geometry::Polygon(p) => quantize_polygons(std::iter::once(p)),
        Geometry::MultiPolygon(mp) => quantize_polygons(mp.iter()),
        Geometry::Rect(r) => quantize_polygons(std::iter::once(&r.to_polygon())),
        Geometry::Triangle(t) => quantize_polygons(std::iter::once(&t.to_polygon())),
        Geometry::GeometryCollection(gc) => {
            let mut parts = gc.iter().filter_map(quantize);
            let first = parts.next()?;
            Some(parts.fold(first, merge))
        }
    }
}

fn merge(acc: TileGeometry, next: TileGeometry) -> TileGeometry {
    match (acc, next) {
        (TileGeometry::Points(mut a), TileGeometry::Points(b)) => {
            a.extend(b);
            TileGeometry::Points(a)
        }
        (TileGeometry::Lines(mut a), TileGeometry::Lines(b)) => {
            a.extend(b);
            TileGeometry::Lines(a)
        }
        (TileGeometry::Polygons(mut a), TileGeometry::Polygons(b)) => {
            a.extend(b);
            TileGeometry::Polygons(a)
        }
        (acc, _) => acc,
    }
}
