//! Inbound frame normalization.
//!
//! A frame is one JSON object.  It is either:
//!   * legacy      : `data_type` ∈ {Polygon, PolygonVector, Point, Point2d, Line, LineVector, Text}
//!                    with flat `{x, y}` points
//!   * canonical   : `data_type` naming one of the nine GeoJSON kinds, with the
//!                    GeoJSON members inline
//!   * envelope    : `data_type: GeoJSON`, with the GeoJSON object either in a
//!                    `geojson` member or inline in the frame itself
//!   * bare GeoJSON: no `data_type`, discriminated by `type`
//!   * catalog     : `{ "topics": [...] }` with no geometry at all
//!
//! Optional top-level `topic`, `history_limit` and `life_time` apply to all
//! geometry forms.

pub mod canonical;
pub mod legacy;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::geometry::{Geometry, GeometryKind, GeometryRecord, Properties};
use crate::history::PolicyOverride;
use crate::style::{Color, StyleResolver};

pub use legacy::LegacyKind;

/// Topic assigned to frames that do not name one.
pub const DEFAULT_TOPIC: &str = "default";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unsupported geometry kind: {0}")]
    Unsupported(String),
}

impl NormalizeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        NormalizeError::Malformed(msg.into())
    }
}

/// What a `data_type` discriminator names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Legacy(LegacyKind),
    Canonical(GeometryKind),
    Envelope,
}

impl WireKind {
    /// Classify a `data_type`.  Legacy and canonical vocabularies share the
    /// names `Polygon`, `Point` and `LineString`; the geometry-bearing member
    /// decides which one the frame uses.
    pub fn classify(data_type: &str, obj: &Map<String, Value>) -> Result<WireKind, NormalizeError> {
        let legacy = match data_type.to_ascii_lowercase().as_str() {
            "polygonvector" => Some(LegacyKind::PolygonVector),
            "linevector"    => Some(LegacyKind::LineVector),
            "line"          => Some(LegacyKind::Line),
            "text"          => Some(LegacyKind::Text),
            "point2d"       => Some(LegacyKind::Point),
            "geojson"       => return Ok(WireKind::Envelope),
            _               => None,
        };
        if let Some(kind) = legacy {
            return Ok(WireKind::Legacy(kind));
        }
        let kind = data_type.parse::<GeometryKind>().map_err(NormalizeError::Unsupported)?;
        Ok(match kind {
            GeometryKind::Polygon if obj.contains_key("points")    => WireKind::Legacy(LegacyKind::Polygon),
            GeometryKind::LineString if obj.contains_key("points") => WireKind::Legacy(LegacyKind::Line),
            GeometryKind::Point if obj.contains_key("point")       => WireKind::Legacy(LegacyKind::Point),
            other => WireKind::Canonical(other),
        })
    }
}

/// A geometry frame after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub record: GeometryRecord,
    /// Per-message retention override, from the top-level fields.
    pub overrides: PolicyOverride,
    /// Whether the frame carried an explicit `topic`.
    pub tagged: bool,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Geometry(NormalizedFrame),
    Catalog(Vec<String>),
}

/// Decode a text frame.
pub fn parse_frame(
    text: &str,
    received_at: DateTime<Utc>,
    styles: &StyleResolver,
) -> Result<Inbound, NormalizeError> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| NormalizeError::malformed(format!("invalid JSON: {e}")))?;
    if let Some(topics) = catalog_topics(&raw) {
        return Ok(Inbound::Catalog(topics));
    }
    normalize(raw, received_at, styles).map(Inbound::Geometry)
}

/// A frame with a `topics` string array and no geometry is a catalog.
fn catalog_topics(raw: &Value) -> Option<Vec<String>> {
    let obj = raw.as_object()?;
    if ["data_type", "geojson", "type"].iter().any(|k| obj.contains_key(*k)) {
        return None;
    }
    obj.get("topics")?
        .as_array()?
        .iter()
        .map(|t| t.as_str().map(String::from))
        .collect()
}

/// Normalize one geometry payload.  `styles` is consulted only to stamp the
/// record with its resolved style.
pub fn normalize(
    raw: Value,
    received_at: DateTime<Utc>,
    styles: &StyleResolver,
) -> Result<NormalizedFrame, NormalizeError> {
    let Value::Object(mut obj) = raw else {
        return Err(NormalizeError::malformed("frame is not a JSON object"));
    };

    let topic = match obj.remove("topic") {
        Some(Value::String(t)) => Some(t),
        Some(Value::Null) | None => None,
        Some(other) => return Err(NormalizeError::malformed(format!("topic is not a string: {other}"))),
    };
    let overrides = PolicyOverride::from_fields(&obj);
    let data_type = match obj.remove("data_type") {
        Some(Value::String(dt)) => Some(dt),
        Some(other) => return Err(NormalizeError::malformed(format!("data_type is not a string: {other}"))),
        None => None,
    };

    let (geometry, properties) = match data_type {
        Some(dt) => match WireKind::classify(&dt, &obj)? {
            WireKind::Legacy(kind) => legacy::convert(kind, obj)?,
            WireKind::Canonical(kind) => canonical_members(kind, &obj)?,
            WireKind::Envelope => envelope(&mut obj)?,
        },
        None if obj.contains_key("geojson") => envelope(&mut obj)?,
        None if obj.contains_key("type") => {
            let raw = Value::Object(obj);
            let geometry = canonical::parse_geojson(&raw)?;
            let properties = raw.as_object().map(|o| record_properties(&geometry, o)).unwrap_or_default();
            (geometry, properties)
        }
        None => return Err(NormalizeError::malformed("frame has neither data_type, geojson nor type")),
    };

    let tagged = topic.is_some();
    let topic = topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    let inline = properties.get("color").and_then(Color::from_value);
    let style = styles.resolve_with_inline(&topic, geometry.kind(), inline);
    Ok(NormalizedFrame {
        tagged,
        record: GeometryRecord { topic, geometry, properties, style, received_at },
        overrides,
    })
}

fn canonical_members(kind: GeometryKind, obj: &Map<String, Value>) -> Result<(Geometry, Properties), NormalizeError> {
    let geometry = canonical::parse_members(kind, obj)?;
    let properties = record_properties(&geometry, obj);
    Ok((geometry, properties))
}

/// `geojson` member when present, otherwise the frame itself is the GeoJSON
/// object.
fn envelope(obj: &mut Map<String, Value>) -> Result<(Geometry, Properties), NormalizeError> {
    let payload = match obj.remove("geojson") {
        Some(inner) => inner,
        None => Value::Object(std::mem::take(obj)),
    };
    let geometry = canonical::parse_geojson(&payload)?;
    let properties = match payload.as_object() {
        Some(inner) => record_properties(&geometry, inner),
        None => Properties::new(),
    };
    Ok((geometry, properties))
}

/// Properties attached to the record itself: a feature's own properties, or
/// the object's `properties` member.
fn record_properties(geometry: &Geometry, obj: &Map<String, Value>) -> Properties {
    match geometry {
        Geometry::Feature(f) => f.properties.clone(),
        _ => canonical::properties_of(obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use serde_json::json;

    fn norm(v: Value) -> Result<NormalizedFrame, NormalizeError> {
        normalize(v, Utc::now(), &StyleResolver::default())
    }

    fn ring(pts: &[(f64, f64)]) -> Vec<Position> {
        pts.iter().map(|&(x, y)| Position::new(x, y)).collect()
    }

    #[test]
    fn legacy_polygon_is_auto_closed() {
        let f = norm(json!({
            "data_type": "Polygon",
            "points": [{"x": 0, "y": 0}, {"x": 1, "y": 0}, {"x": 1, "y": 1}]
        }))
        .unwrap();
        assert_eq!(
            f.record.geometry,
            Geometry::Polygon(vec![ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)])])
        );
    }

    #[test]
    fn legacy_polygon_with_two_points_is_rejected() {
        let err = norm(json!({
            "data_type": "Polygon",
            "points": [{"x": 0, "y": 0}, {"x": 1, "y": 1}]
        }))
        .unwrap_err();
        assert!(matches!(err, NormalizeError::Malformed(_)), "{err}");
    }

    #[test]
    fn legacy_fields_are_stripped_and_rest_kept() {
        let f = norm(json!({
            "data_type": "Polygon",
            "topic": "car",
            "points": [{"x": 0, "y": 0}, {"x": 4, "y": 0}, {"x": 4, "y": 2}, {"x": 0, "y": 0}],
            "color": "#ff0000",
            "speed": 12.5
        }))
        .unwrap();
        assert_eq!(f.record.topic, "car");
        assert!(f.tagged);
        let keys: Vec<&str> = f.record.properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["color", "speed"]);
        assert_eq!(f.record.style.color, Color(0xFF0000));
        let Geometry::Polygon(rings) = &f.record.geometry else { panic!() };
        assert_eq!(rings[0].len(), 4, "already-closed ring gains no point");
    }

    #[test]
    fn legacy_polygon_vector_ids_default_by_index() {
        let f = norm(json!({
            "data_type": "PolygonVector",
            "polygons": [
                { "points": [{"x": 0, "y": 0}, {"x": 1, "y": 0}, {"x": 1, "y": 1}] },
                { "id": "truck", "points": [{"x": 5, "y": 5}, {"x": 6, "y": 5}, {"x": 6, "y": 6}], "load": 3 }
            ]
        }))
        .unwrap();
        let Geometry::FeatureCollection(features) = &f.record.geometry else { panic!() };
        assert_eq!(features[0].id, Some(json!("polygon_0")));
        assert_eq!(features[1].id, Some(json!("truck")));
        assert_eq!(features[1].properties["load"], 3);
        let Some(Geometry::Polygon(rings)) = &features[0].geometry else { panic!() };
        assert_eq!(rings[0].first(), rings[0].last());
    }

    #[test]
    fn legacy_line_is_not_closed() {
        let f = norm(json!({
            "data_type": "Line",
            "points": [{"x": 0, "y": 0}, {"x": 1, "y": 0}, {"x": 0, "y": 1}]
        }))
        .unwrap();
        assert_eq!(
            f.record.geometry,
            Geometry::LineString(ring(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]))
        );
        assert!(norm(json!({ "data_type": "Line", "points": [{"x": 0, "y": 0}] })).is_err());
    }

    #[test]
    fn legacy_line_vector_ids() {
        let f = norm(json!({
            "data_type": "LineVector",
            "lines": [
                { "points": [{"x": 0, "y": 0}, {"x": 1, "y": 1}] },
                { "points": [{"x": 2, "y": 2}, {"x": 3, "y": 3}] }
            ]
        }))
        .unwrap();
        let Geometry::FeatureCollection(features) = &f.record.geometry else { panic!() };
        assert_eq!(features[1].id, Some(json!("line_1")));
        assert_eq!(features[1].geometry.as_ref().map(Geometry::kind), Some(GeometryKind::LineString));
    }

    #[test]
    fn legacy_point_and_text() {
        let p = norm(json!({ "data_type": "Point", "point": {"x": 3, "y": 4} })).unwrap();
        assert_eq!(p.record.geometry, Geometry::Point(Position::new(3.0, 4.0)));
        assert!(norm(json!({ "data_type": "Point", "point": {"x": "a", "y": 4} })).is_err());

        let p2 = norm(json!({ "data_type": "Point2d", "topic": "point", "point": {"x": 1, "y": 2} })).unwrap();
        assert_eq!(p2.record.geometry, Geometry::Point(Position::new(1.0, 2.0)));
        assert_eq!(p2.record.topic, "point");

        let t = norm(json!({
            "data_type": "Text", "position": {"x": 1, "y": 2}, "text": "ego", "size": 12
        }))
        .unwrap();
        let Geometry::Feature(feature) = &t.record.geometry else { panic!() };
        assert_eq!(feature.geometry, Some(Geometry::Point(Position::new(1.0, 2.0))));
        assert_eq!(feature.properties["label"], "ego");
        assert_eq!(t.record.properties["label"], "ego");
        assert_eq!(t.record.properties["size"], 12);
        assert!(!t.record.properties.contains_key("position"));
        assert!(!t.record.properties.contains_key("text"));
    }

    #[test]
    fn canonical_data_type_with_inline_members() {
        let f = norm(json!({
            "data_type": "LineString",
            "topic": "lane_boundary",
            "coordinates": [[0, 0], [10, 0]],
            "history_limit": 5,
            "life_time": 2.5
        }))
        .unwrap();
        assert_eq!(f.record.kind(), GeometryKind::LineString);
        assert_eq!(f.overrides, PolicyOverride { history_limit: Some(5), life_time: Some(2.5) });
    }

    #[test]
    fn envelope_and_bare_geojson() {
        let env = norm(json!({
            "data_type": "GeoJSON",
            "topic": "roads",
            "geojson": { "type": "Feature",
                         "geometry": { "type": "Point", "coordinates": [1, 1] },
                         "properties": { "color": "0x00ff00" } }
        }))
        .unwrap();
        assert_eq!(env.record.kind(), GeometryKind::Feature);
        assert_eq!(env.record.style.color, Color(0x00FF00));

        let bare = norm(json!({ "type": "MultiPoint", "coordinates": [[0, 0], [1, 1]] })).unwrap();
        assert_eq!(bare.record.kind(), GeometryKind::MultiPoint);
        assert_eq!(bare.record.topic, DEFAULT_TOPIC);
        assert!(!bare.tagged);
    }

    #[test]
    fn geojson_data_type_with_inline_feature() {
        let f = norm(json!({
            "data_type": "GeoJSON",
            "topic": "linestring",
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
            "properties": { "color": "#0055ff", "lineWidth": 2,
                            "description": "Simulation boundary around London" }
        }))
        .unwrap();
        assert_eq!(f.record.topic, "linestring");
        assert_eq!(f.record.kind(), GeometryKind::Feature);
        let Geometry::Feature(feature) = &f.record.geometry else { panic!() };
        assert_eq!(
            feature.geometry,
            Some(Geometry::LineString(vec![Position::new(0.0, 0.0), Position::new(1.0, 1.0)]))
        );
        assert_eq!(f.record.properties["lineWidth"], 2);
        assert_eq!(f.record.style.color, Color(0x0055FF));

        let fc = norm(json!({
            "data_type": "GeoJSON",
            "topic": "feature_collection",
            "type": "FeatureCollection",
            "features": []
        }))
        .unwrap();
        assert_eq!(fc.record.kind(), GeometryKind::FeatureCollection);

        assert!(matches!(
            norm(json!({ "data_type": "GeoJSON", "topic": "x" })),
            Err(NormalizeError::Malformed(_))
        ));
    }

    #[test]
    fn unsupported_and_malformed_frames() {
        assert!(matches!(
            norm(json!({ "data_type": "Hologram", "points": [] })),
            Err(NormalizeError::Unsupported(_))
        ));
        assert!(matches!(norm(json!([1, 2, 3])), Err(NormalizeError::Malformed(_))));
        assert!(matches!(norm(json!({ "topic": "x" })), Err(NormalizeError::Malformed(_))));
        assert!(matches!(
            parse_frame("{not json", Utc::now(), &StyleResolver::default()),
            Err(NormalizeError::Malformed(_))
        ));
    }

    #[test]
    fn invalid_color_is_ignored() {
        let f = norm(json!({
            "data_type": "Point", "point": {"x": 0, "y": 0}, "color": "blue"
        }))
        .unwrap();
        assert_eq!(f.record.style.color, StyleResolver::default().resolve("default", GeometryKind::Point).color);
        assert_eq!(f.record.properties["color"], "blue");
    }

    #[test]
    fn catalog_frame() {
        let inbound = parse_frame(r#"{"topics": ["a", "b"]}"#, Utc::now(), &StyleResolver::default()).unwrap();
        assert_eq!(inbound, Inbound::Catalog(vec!["a".into(), "b".into()]));
    }
}
