//! Extent metadata: GeoJSON descriptions of where a layer actually has
//! tiles.
use chrono::Utc;
use serde_json::{json, Value};

use crate::core::grid::BBox;

/// Closed exterior ring of a bounding box, counter-clockwise.
fn ring(b: &BBox) -> Value {
    json!([
        [b.left, b.bottom],
        [b.right, b.bottom],
        [b.right, b.top],
        [b.left, b.top],
        [b.left, b.bottom],
    ])
}

/// FeatureCollection with one polygon feature per tile.
pub fn tile_features(dataset: &str, version: &str, grid: &str, tiles: &[(String, BBox)]) -> Value {
    let features: Vec<Value> = tiles
        .iter()
        .map(|(id, bounds)| {
            json!({
                "type": "Feature",
                "properties": { "tile_id": id },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [ring(bounds)],
                },
            })
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "properties": {
            "dataset": dataset,
            "version": version,
            "grid": grid,
            "generated": Utc::now().to_rfc3339(),
        },
        "features": features,
    })
}

/// Single-feature FeatureCollection whose geometry is the union of all tile
/// boxes, expressed as a MultiPolygon (tile boxes are disjoint by
/// construction, so no dissolve is needed).
pub fn union_extent(dataset: &str, version: &str, grid: &str, tiles: &[(String, BBox)]) -> Value {
    let polygons: Vec<Value> = tiles.iter().map(|(_, b)| json!([ring(b)])).collect();
    json!({
        "type": "FeatureCollection",
        "properties": {
            "dataset": dataset,
            "version": version,
            "grid": grid,
            "generated": Utc::now().to_rfc3339(),
        },
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": polygons,
            },
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles() -> Vec<(String, BBox)> {
        vec![
            ("00N_000E".to_string(), BBox::new(0.0, -10.0, 10.0, 0.0)),
            ("00N_010E".to_string(), BBox::new(10.0, -10.0, 20.0, 0.0)),
        ]
    }

    #[test]
    fn one_feature_per_tile_with_exact_bounds() {
        let fc = tile_features("ds", "v1", "10/40000", &tiles());
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["tile_id"], "00N_000E");
        let ring = &features[0]["geometry"]["coordinates"][0];
        assert_eq!(ring.as_array().unwrap().len(), 5);
        assert_eq!(ring[0], json!([0.0, -10.0]));
        assert_eq!(ring[2], json!([10.0, 0.0]));
        assert_eq!(ring[0], ring[4]);
    }

    #[test]
    fn union_is_a_multipolygon_of_tile_boxes() {
        let fc = union_extent("ds", "v1", "10/40000", &tiles());
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        let geom = &features[0]["geometry"];
        assert_eq!(geom["type"], "MultiPolygon");
        assert_eq!(geom["coordinates"].as_array().unwrap().len(), 2);
        assert_eq!(fc["properties"]["dataset"], "ds");
    }
}
