//! End-to-end tests for the vector tile encoder, decoding the output back.

use geo::{line_string, point, polygon};
use test_utils::generators::sample_features;
use tile_common::{BoundingBox, FeatureRow, PropertyValue, TileMatrixSetId, VectorLayerSource};
use vector_tile::{decode_tile, GeomType, LayerFeatures, VectorTileConfig, VectorTileEncoder};

fn layer(name: &str, attributes: &[&str]) -> VectorLayerSource {
    VectorLayerSource {
        name: name.to_string(),
        source: format!("{}_table", name),
        attributes: attributes.iter().map(|s| s.to_string()).collect(),
    }
}

fn ring_area2(ring: &[(i32, i32)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
        })
        .sum()
}

#[test]
fn test_sample_features_decode_back() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(-20.0, -20.0, 20.0, 20.0);
    let layers = vec![LayerFeatures::new(layer("places", &[]), sample_features())];

    let body = encoder.encode(&layers, &bounds, 6).unwrap();
    let tile = decode_tile(&body).unwrap();

    assert_eq!(tile.layers.len(), 1);
    let places = tile.layer("places").unwrap();
    assert_eq!(places.version, 2);
    assert_eq!(places.extent, 4096);
    assert_eq!(places.features.len(), 3);

    let point = &places.features[0];
    assert_eq!(point.id, Some(1));
    assert_eq!(point.geom_type, Some(GeomType::Point));
    // x: (10 + 20) / 40 * 4096, y flipped: (20 - 10) / 40 * 4096
    assert_eq!(point.paths().unwrap(), vec![vec![(3072, 1024)]]);

    let props = places.properties(point).unwrap();
    assert!(props.contains(&("name".to_string(), PropertyValue::from("Springfield"))));
    assert!(props.contains(&("population".to_string(), PropertyValue::Int(30_000))));

    let line = &places.features[1];
    assert_eq!(line.geom_type, Some(GeomType::LineString));
    assert!(places
        .properties(line)
        .unwrap()
        .contains(&("paved".to_string(), PropertyValue::Bool(true))));

    let park = &places.features[2];
    assert_eq!(park.geom_type, Some(GeomType::Polygon));
    let props = places.properties(park).unwrap();
    assert!(props.contains(&("area_km2".to_string(), PropertyValue::Float(3.41))));
}

#[test]
fn test_no_layers_or_no_features_is_empty() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(100.0, 40.0, 110.0, 50.0);

    let layers = vec![LayerFeatures::new(layer("places", &[]), sample_features())];
    let body = encoder.encode(&layers, &bounds, 6).unwrap();
    assert!(body.is_empty());
    assert!(decode_tile(&body).unwrap().layers.is_empty());
}

#[test]
fn test_empty_layer_is_omitted() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(-20.0, -20.0, 20.0, 20.0);
    let layers = vec![
        LayerFeatures::new(layer("empty", &[]), vec![]),
        LayerFeatures::new(layer("places", &[]), sample_features()),
    ];

    let tile = decode_tile(&encoder.encode(&layers, &bounds, 4).unwrap()).unwrap();
    assert_eq!(tile.layers.len(), 1);
    assert!(tile.layer("empty").is_none());
}

#[test]
fn test_attribute_selection_limits_keys() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(-20.0, -20.0, 20.0, 20.0);
    let layers = vec![LayerFeatures::new(layer("places", &["name"]), sample_features())];

    let tile = decode_tile(&encoder.encode(&layers, &bounds, 6).unwrap()).unwrap();
    let places = tile.layer("places").unwrap();
    assert_eq!(places.keys, vec!["name".to_string()]);
    for feature in &places.features {
        let props = places.properties(feature).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].0, "name");
    }
}

#[test]
fn test_polygon_winding_after_y_flip() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
    // Exterior listed clockwise in map space with a counter-clockwise hole
    let poly = polygon!(
        exterior: [
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 90.0),
            (x: 90.0, y: 90.0),
            (x: 90.0, y: 10.0),
            (x: 10.0, y: 10.0),
        ],
        interiors: [[
            (x: 40.0, y: 40.0),
            (x: 60.0, y: 40.0),
            (x: 60.0, y: 60.0),
            (x: 40.0, y: 60.0),
            (x: 40.0, y: 40.0),
        ]],
    );
    let layers = vec![LayerFeatures::new(layer("areas", &[]), vec![FeatureRow::new(poly)])];

    let tile = decode_tile(&encoder.encode(&layers, &bounds, 14).unwrap()).unwrap();
    let areas = tile.layer("areas").unwrap();
    let rings = areas.features[0].paths().unwrap();
    assert_eq!(rings.len(), 2);
    assert!(ring_area2(&rings[0]) > 0, "exterior must be positive in tile space");
    assert!(ring_area2(&rings[1]) < 0, "hole must be negative in tile space");
}

#[test]
fn test_line_crossing_tile_edge_is_clipped_into_buffer() {
    let encoder = VectorTileEncoder::default();
    let tms = TileMatrixSetId::WebMercatorQuad;
    let left = tms.tile_to_bounds(2, 1, 1).unwrap();
    let right = tms.tile_to_bounds(2, 1, 2).unwrap();

    let y = (left.min_y + left.max_y) / 2.0;
    let line = line_string![(x: left.min_x + left.width() / 2.0, y: y), (x: right.max_x - right.width() / 2.0, y: y)];
    let rows = vec![FeatureRow::new(line).with_id(7)];
    let layers = vec![LayerFeatures::new(layer("roads", &[]), rows)];

    for (bounds, expected_end) in [(left, 4096 + 64), (right, -64)] {
        let tile = decode_tile(&encoder.encode(&layers, &bounds, 2).unwrap()).unwrap();
        let roads = tile.layer("roads").unwrap();
        assert_eq!(roads.features.len(), 1);
        let paths = roads.features[0].paths().unwrap();
        let xs: Vec<i32> = paths[0].iter().map(|p| p.0).collect();
        assert!(xs.contains(&expected_end), "expected clip at {} in {:?}", expected_end, xs);
    }
}

#[test]
fn test_geometry_collection_splits_into_features() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let collection = geo::Geometry::GeometryCollection(geo::GeometryCollection(vec![
        point!(x: 1.0, y: 1.0).into(),
        line_string![(x: 2.0, y: 2.0), (x: 8.0, y: 8.0)].into(),
    ]));
    let rows = vec![FeatureRow::new(collection).with_id(9).with_property("kind", "mixed")];
    let layers = vec![LayerFeatures::new(layer("misc", &[]), rows)];

    let tile = decode_tile(&encoder.encode(&layers, &bounds, 10).unwrap()).unwrap();
    let misc = tile.layer("misc").unwrap();
    assert_eq!(misc.features.len(), 2);
    assert!(misc.features.iter().all(|f| f.id == Some(9)));
    assert_eq!(misc.values, vec![PropertyValue::from("mixed")]);
}

#[test]
fn test_custom_extent_is_written() {
    let config = VectorTileConfig {
        extent: 512,
        buffer: 8,
        simplify: false,
    };
    let encoder = VectorTileEncoder::new(config).unwrap();
    let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let rows = vec![FeatureRow::new(point!(x: 0.5, y: 0.5))];
    let layers = vec![LayerFeatures::new(layer("p", &[]), rows)];

    let tile = decode_tile(&encoder.encode(&layers, &bounds, 3).unwrap()).unwrap();
    let p = tile.layer("p").unwrap();
    assert_eq!(p.extent, 512);
    assert_eq!(p.features[0].paths().unwrap(), vec![vec![(256, 256)]]);
}

#[test]
fn test_invalid_bounds_rejected() {
    let encoder = VectorTileEncoder::default();
    let bounds = BoundingBox::new(10.0, 0.0, 0.0, 10.0);
    assert!(encoder.encode(&[], &bounds, 0).is_err());
}
