//! Legacy flat vocabulary (`{x, y}` point objects) → canonical geometry.
//!
//! The caller has already removed `data_type` and `topic`; each converter
//! removes its own geometry-bearing field and hands the rest back as
//! properties, untouched.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::geometry::{close_ring, Feature, Geometry, Position, Properties};

use super::NormalizeError;

type Result<T> = std::result::Result<T, NormalizeError>;

/// The six legacy `data_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKind {
    Polygon,
    PolygonVector,
    Point,
    Line,
    LineVector,
    Text,
}

#[derive(Deserialize)]
struct Xy {
    x: f64,
    y: f64,
}

/// Convert a legacy payload.  Returns the geometry and the leftover
/// top-level fields as properties.
pub fn convert(kind: LegacyKind, mut obj: Map<String, Value>) -> Result<(Geometry, Properties)> {
    let geometry = match kind {
        LegacyKind::Polygon => {
            let pts = take(&mut obj, "points")?;
            Geometry::Polygon(vec![ring(&pts)?])
        }
        LegacyKind::Line => {
            let pts = take(&mut obj, "points")?;
            Geometry::LineString(line(&pts)?)
        }
        LegacyKind::Point => {
            let pt = take(&mut obj, "point")?;
            Geometry::Point(xy(&pt)?)
        }
        LegacyKind::PolygonVector => {
            let polys = take(&mut obj, "polygons")?;
            Geometry::FeatureCollection(members(&polys, "polygon", |pts| {
                Ok(Geometry::Polygon(vec![ring(pts)?]))
            })?)
        }
        LegacyKind::LineVector => {
            let lines = take(&mut obj, "lines")?;
            Geometry::FeatureCollection(members(&lines, "line", |pts| Ok(Geometry::LineString(line(pts)?)))?)
        }
        LegacyKind::Text => {
            let pos = take(&mut obj, "position")?;
            let text = take(&mut obj, "text")?;
            let label = match text {
                Value::String(s) => Value::String(s),
                Value::Number(n) => Value::String(n.to_string()),
                _ => return Err(NormalizeError::malformed("text payload `text` is not a string")),
            };
            let mut properties = obj.clone();
            properties.insert("label".into(), label.clone());
            obj.insert("label".into(), label);
            Geometry::Feature(Box::new(Feature {
                id: None,
                geometry: Some(Geometry::Point(xy(&pos)?)),
                properties,
            }))
        }
    };
    Ok((geometry, obj))
}

fn take(obj: &mut Map<String, Value>, field: &str) -> Result<Value> {
    obj.remove(field)
        .ok_or_else(|| NormalizeError::malformed(format!("missing `{field}`")))
}

fn xy(v: &Value) -> Result<Position> {
    let p = Xy::deserialize(v)
        .map_err(|e| NormalizeError::malformed(format!("bad point: {e}")))?;
    Ok(Position::new(p.x, p.y))
}

fn points(v: &Value) -> Result<Vec<Position>> {
    v.as_array()
        .ok_or_else(|| NormalizeError::malformed("`points` is not an array"))?
        .iter()
        .map(xy)
        .collect()
}

fn ring(v: &Value) -> Result<Vec<Position>> {
    let mut pts = points(v)?;
    if pts.len() < 3 {
        return Err(NormalizeError::malformed(format!("polygon needs at least 3 points, got {}", pts.len())));
    }
    close_ring(&mut pts);
    Ok(pts)
}

fn line(v: &Value) -> Result<Vec<Position>> {
    let pts = points(v)?;
    if pts.len() < 2 {
        return Err(NormalizeError::malformed(format!("line needs at least 2 points, got {}", pts.len())));
    }
    Ok(pts)
}

/// Convert a vector payload (`polygons` / `lines`) into features, one per
/// member.  Members without an `id` get `<prefix>_<index>`.
fn members(
    v: &Value,
    prefix: &str,
    build: impl Fn(&Value) -> Result<Geometry>,
) -> Result<Vec<Feature>> {
    let items = v
        .as_array()
        .ok_or_else(|| NormalizeError::malformed(format!("`{prefix}s` is not an array")))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut member = item
                .as_object()
                .cloned()
                .ok_or_else(|| NormalizeError::malformed(format!("{prefix} {i} is not an object")))?;
            let pts = take(&mut member, "points")?;
            let geometry = build(&pts).map_err(|e| match e {
                NormalizeError::Malformed(m) => NormalizeError::Malformed(format!("{prefix} {i}: {m}")),
                other => other,
            })?;
            let id = member
                .remove("id")
                .filter(|id| !id.is_null())
                .unwrap_or_else(|| Value::String(format!("{prefix}_{i}")));
            Ok(Feature { id: Some(id), geometry: Some(geometry), properties: member })
        })
        .collect()
}
